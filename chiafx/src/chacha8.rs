//! Reduced-round ChaCha keystream for the first table function
//!
//! The first table's `y` values are carved out of a ChaCha8 keystream keyed
//! with the 32-byte plot id. This is the original djb construction rather
//! than the IETF variant: eight rounds, a 64-bit block counter occupying
//! state words 12 and 13, and a zero nonce in words 14 and 15. Crates on
//! crates.io implement either twenty rounds or the IETF counter layout, so
//! the variant is implemented here directly, the same way the SipHash1,3
//! variant is hand-built elsewhere in this workspace.
//!
//! Only random access by block index is needed; there is no streaming state.

/// "expand 32-byte k", the constant first row of the ChaCha state.
const SIGMA: [u32; 4] = [0x6170_7865, 0x3320_646e, 0x7962_2d32, 0x6b20_6574];

/// Number of ChaCha rounds; four double rounds.
const ROUNDS: usize = 8;

/// Bytes of keystream produced per block.
pub(crate) const BLOCK_SIZE: usize = 64;

/// One ChaCha quarter round over four state words.
#[inline(always)]
fn quarter_round(state: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    state[a] = state[a].wrapping_add(state[b]);
    state[d] = (state[d] ^ state[a]).rotate_left(16);
    state[c] = state[c].wrapping_add(state[d]);
    state[b] = (state[b] ^ state[c]).rotate_left(12);
    state[a] = state[a].wrapping_add(state[b]);
    state[d] = (state[d] ^ state[a]).rotate_left(8);
    state[c] = state[c].wrapping_add(state[d]);
    state[b] = (state[b] ^ state[c]).rotate_left(7);
}

/// A keyed ChaCha8 instance supporting random block access.
#[derive(Debug, Clone)]
pub(crate) struct ChaCha8 {
    /// Prepared state template: constants, key words, zeroed counter/nonce.
    state: [u32; 16],
}

impl ChaCha8 {
    /// Key an instance with a 256-bit key and a zero nonce.
    pub(crate) fn new(key: &[u8; 32]) -> Self {
        let mut state = [0u32; 16];
        state[..4].copy_from_slice(&SIGMA);
        for (i, chunk) in key.chunks_exact(4).enumerate() {
            state[4 + i] = u32::from_le_bytes(chunk.try_into().expect("chunk is 4 bytes"));
        }
        Self { state }
    }

    /// Produce the 64 keystream bytes of block `counter`.
    pub(crate) fn keystream_block(&self, counter: u64, out: &mut [u8; BLOCK_SIZE]) {
        let mut state = self.state;
        state[12] = counter as u32;
        state[13] = (counter >> 32) as u32;

        let mut working = state;
        for _ in 0..ROUNDS / 2 {
            quarter_round(&mut working, 0, 4, 8, 12);
            quarter_round(&mut working, 1, 5, 9, 13);
            quarter_round(&mut working, 2, 6, 10, 14);
            quarter_round(&mut working, 3, 7, 11, 15);
            quarter_round(&mut working, 0, 5, 10, 15);
            quarter_round(&mut working, 1, 6, 11, 12);
            quarter_round(&mut working, 2, 7, 8, 13);
            quarter_round(&mut working, 3, 4, 9, 14);
        }
        for i in 0..16 {
            let word = working[i].wrapping_add(state[i]);
            out[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn blocks_are_deterministic_and_distinct() {
        let key = [7u8; 32];
        let cipher = ChaCha8::new(&key);
        let mut a = [0u8; BLOCK_SIZE];
        let mut b = [0u8; BLOCK_SIZE];
        let mut a2 = [0u8; BLOCK_SIZE];
        cipher.keystream_block(0, &mut a);
        cipher.keystream_block(1, &mut b);
        cipher.keystream_block(0, &mut a2);
        assert_eq!(a, a2);
        assert_ne!(a, b);
    }

    #[test]
    fn key_separation() {
        let mut out1 = [0u8; BLOCK_SIZE];
        let mut out2 = [0u8; BLOCK_SIZE];
        ChaCha8::new(&[1u8; 32]).keystream_block(5, &mut out1);
        ChaCha8::new(&[2u8; 32]).keystream_block(5, &mut out2);
        assert_ne!(out1, out2);
    }

    #[test]
    fn counter_occupies_both_words() {
        // A counter above 2^32 must change word 13, not wrap word 12.
        let cipher = ChaCha8::new(&[3u8; 32]);
        let mut low = [0u8; BLOCK_SIZE];
        let mut high = [0u8; BLOCK_SIZE];
        cipher.keystream_block(1, &mut low);
        cipher.keystream_block(1u64 << 32 | 1, &mut high);
        assert_ne!(low, high);
    }
}
