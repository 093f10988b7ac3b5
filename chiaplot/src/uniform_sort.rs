//! In-memory order-preserving sort by expected position
//!
//! Bucketed table entries are close to uniformly distributed in their key
//! bits, so each entry's key predicts where it belongs in the sorted output.
//! The sort exploits that: hash every entry to its expected slot in a
//! sparse destination array, resolve collisions by keeping the smaller
//! entry in place and pushing the larger one forward, then compact the
//! occupied slots to the front. For uniform input this stays close to one
//! probe per entry, far cheaper than a comparison sort of the same arena.
//!
//! An all-zero key region marks an empty slot, so entries must not be
//! all-zero in their key bytes; the sort manager guarantees that by never
//! feeding zero-length or padding entries through here.

use crate::err::Error;
use chiafx::bits::slice_u64;

/// Destination slots per input entry, as a power-of-two factor: the probe
/// space is the smallest power of two holding twice the entry count, plus a
/// fixed slack for probe runs past the last slot.
const PROBE_SLACK: u64 = 50;

/// Size in entries of the destination region needed to sort `num_entries`.
pub(crate) fn round_size(num_entries: u64) -> u64 {
    let mut result = 1u64;
    while result < num_entries * 2 {
        result *= 2;
    }
    result + PROBE_SLACK
}

/// True when the slot at `memory[pos..pos + entry_len]` is unoccupied.
#[inline]
fn is_position_empty(memory: &[u8], pos: usize, entry_len: usize) -> bool {
    memory[pos..pos + entry_len].iter().all(|&b| b == 0)
}

/// Compare two entries by the bits from `bits_begin` to the end.
///
/// The shared prefix before `bits_begin` is equal by construction (it is
/// the bucket id), so only the suffix participates.
#[inline]
fn compare_suffix(left: &[u8], right: &[u8], entry_len: usize, bits_begin: u32) -> std::cmp::Ordering {
    let start_byte = (bits_begin / 8) as usize;
    let mask = if bits_begin % 8 == 0 {
        0xffu8
    } else {
        (1u8 << (8 - bits_begin % 8)) - 1
    };
    (left[start_byte] & mask)
        .cmp(&(right[start_byte] & mask))
        .then_with(|| left[start_byte + 1..entry_len].cmp(&right[start_byte + 1..entry_len]))
}

/// Sort `num_entries` fixed-width entries from `input` into the front of
/// `memory`, ascending by the key bits starting at `bits_begin`.
///
/// `memory` must hold at least [`round_size`]`(num_entries) * entry_len`
/// bytes; its prefix is zeroed here. `input` is used as swap space during
/// collision resolution and does not survive the call.
pub(crate) fn sort_to_memory(
    input: &mut [u8],
    memory: &mut [u8],
    entry_len: usize,
    num_entries: u64,
    bits_begin: u32,
) -> Result<(), Error> {
    let memory_len = (round_size(num_entries) as usize) * entry_len;
    debug_assert!(memory.len() >= memory_len);
    debug_assert!(input.len() >= num_entries as usize * entry_len);

    let bucket_bits = {
        // Smallest power of two with room for twice the entries.
        let mut bits = 0u32;
        while (1u64 << bits) < 2 * num_entries {
            bits += 1;
        }
        bits
    };
    memory[..memory_len].fill(0);

    let mut swap_space = vec![0u8; entry_len];
    for i in 0..num_entries as usize {
        let entry = i * entry_len;
        let mut pos = (slice_u64(&input[entry..entry + entry_len], u64::from(bits_begin), bucket_bits)
            as usize)
            * entry_len;
        // Walk forward from the expected slot, keeping the smaller entry in
        // place and carrying the larger one onward in the input slot.
        while pos < memory_len && !is_position_empty(memory, pos, entry_len) {
            if compare_suffix(
                &memory[pos..pos + entry_len],
                &input[entry..entry + entry_len],
                entry_len,
                bits_begin,
            )
            .is_gt()
            {
                swap_space.copy_from_slice(&memory[pos..pos + entry_len]);
                memory[pos..pos + entry_len].copy_from_slice(&input[entry..entry + entry_len]);
                input[entry..entry + entry_len].copy_from_slice(&swap_space);
            }
            pos += entry_len;
        }
        if pos >= memory_len {
            return Err(Error::InvalidState(
                "uniform sort probe ran past the destination region".into(),
            ));
        }
        memory[pos..pos + entry_len].copy_from_slice(&input[entry..entry + entry_len]);
    }

    // Compact occupied slots to the front, in place.
    let mut written = 0usize;
    let mut pos = 0usize;
    while written < num_entries as usize && pos < memory_len {
        if !is_position_empty(memory, pos, entry_len) {
            let dst = written * entry_len;
            if dst != pos {
                memory.copy_within(pos..pos + entry_len, dst);
                memory[pos..pos + entry_len].fill(0);
            }
            written += 1;
        }
        pos += entry_len;
    }
    if written != num_entries as usize {
        return Err(Error::InvalidState(
            "uniform sort lost entries; key region contained all-zero entries".into(),
        ));
    }
    Ok(())
}
