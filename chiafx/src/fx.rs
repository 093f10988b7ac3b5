//! Pairing function for tables 2 through 7

use crate::bits::{copy_bits, slice_u64, BitPacker};
use crate::{metadata_bits, EXTRA_BITS};

/// Upper bound on metadata width: four `k` chunks at the maximum plot size.
const MAX_METADATA_BYTES: usize = 32;

/// Bit-packed entry metadata, at most `4k` bits.
///
/// Table 1 metadata is the `x` value itself; tables 2 and 3 collate both
/// halves of the pair; later tables truncate to hash output. Stored inline
/// so phase loops can keep metadata in plain arrays without allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Packed big-endian bits, zero beyond `bits`.
    bytes: [u8; MAX_METADATA_BYTES],
    /// Valid bit count.
    bits: u32,
}

impl Metadata {
    /// Metadata of zero width, used for last-table entries.
    pub const EMPTY: Metadata = Metadata {
        bytes: [0; MAX_METADATA_BYTES],
        bits: 0,
    };

    /// Read `num_bits` of metadata out of a packed entry.
    pub fn from_bits(src: &[u8], bit_offset: u64, num_bits: u32) -> Self {
        debug_assert!(num_bits as usize <= MAX_METADATA_BYTES * 8);
        let mut metadata = Self::EMPTY;
        copy_bits(src, bit_offset, &mut metadata.bytes, 0, num_bits);
        metadata.bits = num_bits;
        metadata
    }

    /// Metadata holding the low `num_bits` of a single integer.
    pub fn from_u64(value: u64, num_bits: u32) -> Self {
        let mut metadata = Self::EMPTY;
        crate::bits::write_bits(&mut metadata.bytes, 0, value, num_bits);
        metadata.bits = num_bits;
        metadata
    }

    /// Concatenation `left ‖ right`.
    pub fn collated(left: &Metadata, right: &Metadata) -> Self {
        let mut metadata = Self::EMPTY;
        copy_bits(&left.bytes, 0, &mut metadata.bytes, 0, left.bits);
        copy_bits(
            &right.bytes,
            0,
            &mut metadata.bytes,
            u64::from(left.bits),
            right.bits,
        );
        metadata.bits = left.bits + right.bits;
        metadata
    }

    /// Valid width in bits.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Append this metadata to a packer.
    pub fn append_to(&self, packer: &mut BitPacker) {
        packer.push_bytes(&self.bytes, self.bits);
    }

    /// The metadata as an integer; only valid when `bits <= 64`.
    pub fn as_u64(&self) -> u64 {
        debug_assert!(self.bits <= 64);
        slice_u64(&self.bytes, 0, self.bits)
    }
}

/// Computes `f_t(y_left, c_left, c_right)` for one table.
///
/// The hash input is the bit-packed concatenation of the left side's
/// `k + EXTRA_BITS` bit `y` and both metadata fields; the output `y'` is the
/// leading `k + EXTRA_BITS` bits of the BLAKE3 digest. Output metadata is
/// collated from the inputs for tables 2 and 3 and taken from the digest
/// tail for tables 4 through 6; table 7 entries carry none.
#[derive(Debug)]
pub struct FxCalculator {
    /// Plot size parameter.
    k: u32,
    /// Index of the table whose entries this instance produces (2..=7).
    table_index: u8,
    /// Reused hash input buffer.
    input: BitPacker,
}

impl FxCalculator {
    /// Prepare an `f` calculator producing entries of `table_index`.
    pub fn new(k: u8, table_index: u8) -> Self {
        debug_assert!((2..=7).contains(&table_index));
        Self {
            k: u32::from(k),
            table_index,
            input: BitPacker::new(),
        }
    }

    /// Compute the new `y` (always `k + EXTRA_BITS` bits; the caller
    /// truncates for table 7) and the new entry's metadata.
    pub fn calculate_fn(
        &mut self,
        y_left: u64,
        left: &Metadata,
        right: &Metadata,
    ) -> (u64, Metadata) {
        self.input.clear();
        self.input
            .push(u128::from(y_left), self.k + EXTRA_BITS);
        left.append_to(&mut self.input);
        right.append_to(&mut self.input);

        let digest = blake3::hash(self.input.as_bytes());
        let digest_bytes = digest.as_bytes();
        let new_y = slice_u64(digest_bytes, 0, self.k + EXTRA_BITS);

        let out_bits = metadata_bits(self.k as u8, self.table_index);
        let metadata = if out_bits == 0 {
            Metadata::EMPTY
        } else if self.table_index < 4 {
            Metadata::collated(left, right)
        } else {
            Metadata::from_bits(digest_bytes, u64::from(self.k + EXTRA_BITS), out_bits)
        };
        (new_y, metadata)
    }
}
