//! The bit-mixing function family used by Chia-style proof of space tables.
//!
//! A plot is built from seven tables. The first is filled by [`F1Calculator`],
//! which expands a 32-byte plot id into `2^k` pseudorandom `y` values using a
//! ChaCha8 keystream. Each following table pairs up entries of the previous
//! one: two entries are eligible when their `y` values fall into adjacent
//! buckets and satisfy the match rule in [`matching`], and the paired entry's
//! new `y` and metadata come from [`FxCalculator`], a BLAKE3 compression of
//! the left `y` and both sides' metadata.
//!
//! The functions here are pure: the same inputs always produce the same
//! outputs, and nothing in this crate allocates per call on the hot paths.
//! The plotting engine built on top only depends on the input/output arity
//! of these functions and on the bucket structure of the match rule.

#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod bits;
mod chacha8;
mod f1;
mod fx;
pub mod matching;

pub use f1::F1Calculator;
pub use fx::{FxCalculator, Metadata};

/// Extra bits carried on every `y` value beyond the plot's `k` bits.
///
/// The extra bits reduce the number of spurious matches between tables;
/// they are truncated away when the last table is written.
pub const EXTRA_BITS: u32 = 6;

/// Number of `m` values tried by the match rule, `2^EXTRA_BITS`.
pub const EXTRA_BITS_POW: u64 = 1 << EXTRA_BITS;

/// Match rule modulus for the `b` dimension of a bucket.
pub const PARAM_B: u64 = 119;

/// Match rule modulus for the `c` dimension of a bucket.
pub const PARAM_C: u64 = 127;

/// Width of one match bucket in `y` space, `PARAM_B * PARAM_C`.
pub const PARAM_BC: u64 = PARAM_B * PARAM_C;

/// Metadata length of each table's entries, in multiples of `k` bits.
///
/// Indexed by `table + 1`: the entry metadata of table `t` is
/// `VECTOR_LENS[t + 1] * k` bits wide. Table 1 carries its `x` value,
/// tables 2 and 3 collate both sides, the later tables truncate.
pub const VECTOR_LENS: [u32; 8] = [0, 0, 1, 2, 4, 4, 3, 2];

/// Metadata width in bits for entries of `table`, given the plot size `k`.
pub fn metadata_bits(k: u8, table: u8) -> u32 {
    if table >= 7 {
        0
    } else {
        u32::from(k) * VECTOR_LENS[usize::from(table) + 1]
    }
}
