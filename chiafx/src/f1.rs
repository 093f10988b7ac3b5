//! First-table function: keystream expansion of the plot id

use crate::bits::slice_u64;
use crate::chacha8::{ChaCha8, BLOCK_SIZE};
use crate::EXTRA_BITS;

/// Sentinel meaning no keystream block is cached yet.
const NO_BLOCK: u64 = u64::MAX;

/// Computes `f1(x)` for the first table.
///
/// The keystream is treated as one long bit string; `f1(x)` is the `k` bits
/// at bit offset `x * k`. The returned `y` additionally carries the top
/// [`EXTRA_BITS`] of `x` in its low bits, which is what makes first-table
/// matches position dependent.
///
/// Consecutive `x` values read overlapping keystream blocks, so the
/// calculator caches the most recent block pair. Scanning `x` in order is
/// the cheap access pattern; random access still works.
#[derive(Debug, Clone)]
pub struct F1Calculator {
    /// Plot size parameter.
    k: u32,
    /// Keyed keystream generator.
    cipher: ChaCha8,
    /// Index of the first of the two cached blocks, or [`NO_BLOCK`].
    cached_block: u64,
    /// Two consecutive keystream blocks, so one `f1` never straddles out.
    buf: [u8; 2 * BLOCK_SIZE],
}

impl F1Calculator {
    /// Prepare an `f1` calculator for plot size `k` and a 32-byte plot id.
    pub fn new(k: u8, id: &[u8; 32]) -> Self {
        Self {
            k: u32::from(k),
            cipher: ChaCha8::new(id),
            cached_block: NO_BLOCK,
            buf: [0; 2 * BLOCK_SIZE],
        }
    }

    /// Compute the `k + EXTRA_BITS` bit `y` value for `x`.
    pub fn calculate_f1(&mut self, x: u64) -> u64 {
        debug_assert!(x < (1u64 << self.k));
        let bit_start = x * u64::from(self.k);
        let block = bit_start / (BLOCK_SIZE as u64 * 8);
        if self.cached_block != block {
            let (first, second) = self.buf.split_at_mut(BLOCK_SIZE);
            self.cipher
                .keystream_block(block, first.try_into().expect("half of the pair buffer"));
            self.cipher.keystream_block(
                block + 1,
                second.try_into().expect("half of the pair buffer"),
            );
            self.cached_block = block;
        }
        let offset_in_buf = bit_start % (BLOCK_SIZE as u64 * 8);
        let f1 = slice_u64(&self.buf, offset_in_buf, self.k);
        (f1 << EXTRA_BITS) | (x >> (self.k - EXTRA_BITS))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deterministic_and_within_range() {
        let id = [0x42u8; 32];
        let k = 17;
        let mut f1 = F1Calculator::new(k, &id);
        let mut f1_again = F1Calculator::new(k, &id);
        for x in (0..1u64 << k).step_by(997) {
            let y = f1.calculate_f1(x);
            assert!(y < 1u64 << (u32::from(k) + EXTRA_BITS));
            assert_eq!(y, f1_again.calculate_f1(x));
        }
    }

    #[test]
    fn carries_top_bits_of_x() {
        let mut f1 = F1Calculator::new(20, &[9u8; 32]);
        for x in [0u64, 1, 0xfffff, 0x80000, 0x12345] {
            let y = f1.calculate_f1(x);
            assert_eq!(y & (EXTRA_BITS_MASK), x >> (20 - EXTRA_BITS));
        }
    }

    const EXTRA_BITS_MASK: u64 = (1 << EXTRA_BITS) - 1;

    #[test]
    fn random_access_agrees_with_sequential() {
        let mut seq = F1Calculator::new(15, &[1u8; 32]);
        let sequential: Vec<u64> = (0..64).map(|x| seq.calculate_f1(x)).collect();
        let mut rand_order = F1Calculator::new(15, &[1u8; 32]);
        for &x in [63u64, 0, 17, 42, 1, 63, 30].iter() {
            assert_eq!(rand_order.calculate_f1(x), sequential[x as usize]);
        }
    }
}
