//! Phase 4: final table and checkpoint indexes
//!
//! The last working table is already sorted by its `k`-bit hash value, and
//! phase 3 left a stream pairing every entry with its final position in the
//! last compressed table. This phase writes that pairing as fixed-width
//! position parks, then three indexes over the hash values: a dense
//! first-level checkpoint every [`CHECKPOINT_1_INTERVAL`] entries, a sparse
//! second level over the first, and per-interval delta parks holding the
//! hash increments between checkpoints. The prover needs nothing else to
//! turn a challenge into table positions.

use crate::constants::{
    CHECKPOINT_1_INTERVAL, CHECKPOINT_2_INTERVAL, ENTRIES_PER_PARK, NUM_TABLE_POINTERS,
};
use crate::entry_sizes::{entry_size, pos_bits};
use crate::err::Error;
use crate::phase3::{rank_entry_size, Phase3Output};
use crate::scratch::{read_entry, BufferedScratch, Scratch};
use chiafx::bits::{slice_u64, BitPacker};
use tracing::debug;

/// Byte width of one serialized checkpoint hash.
pub(crate) fn checkpoint_entry_bytes(k: u8) -> u64 {
    u64::from((u32::from(k) + 7) / 8)
}

/// Byte width of one position park in the final table.
pub(crate) fn position_park_bytes(k: u8) -> u64 {
    u64::from((ENTRIES_PER_PARK as u32 * pos_bits(k) + 7) / 8)
}

/// Byte width of one delta park: a count prefix plus one byte per entry
/// that follows its interval's checkpoint.
pub(crate) fn delta_park_bytes() -> u64 {
    2 + (CHECKPOINT_1_INTERVAL as u64 - 1)
}

/// Write the final table parks and the three checkpoint tables, filling
/// pointer slots 7..=10.
pub(crate) fn run_phase4(
    plot: &mut Vec<u8>,
    pointers: &mut [u64; NUM_TABLE_POINTERS + 1],
    tables: &mut [Vec<u8>],
    table_sizes: &[u64; 8],
    mut phase3: Phase3Output,
    k: u8,
) -> Result<(), Error> {
    let count = table_sizes[7];
    let last_size = entry_size(k, 7);
    let rank_size = rank_entry_size(k);
    let mut reader = BufferedScratch::new(&mut tables[7]);

    // Final table: positions into the last compressed table, parked.
    pointers[7] = plot.len() as u64;
    let mut park_packer = BitPacker::new();
    let mut park_fill = 0usize;

    let mut checkpoints: Vec<u64> = Vec::new();
    let mut delta_parks: Vec<u8> = Vec::new();
    let mut current_deltas: Vec<u8> = Vec::new();
    let mut previous_hash = 0u64;

    for index in 0..count {
        let entry = read_entry(&mut reader, index, last_size)?;
        let hash = slice_u64(entry, 0, u32::from(k));

        let rank_bytes = read_entry(&mut phase3.final_rank_manager, index, rank_size)?;
        debug_assert_eq!(slice_u64(rank_bytes, 0, pos_bits(k)), index);
        let final_position = slice_u64(rank_bytes, u64::from(pos_bits(k)), pos_bits(k));

        park_packer.push(u128::from(final_position), pos_bits(k));
        park_fill += 1;
        if park_fill == ENTRIES_PER_PARK {
            plot.extend_from_slice(park_packer.bytes_padded(position_park_bytes(k) as usize));
            park_packer.clear();
            park_fill = 0;
        }

        if index as usize % CHECKPOINT_1_INTERVAL == 0 {
            if index > 0 {
                flush_delta_park(&mut delta_parks, &current_deltas);
                current_deltas.clear();
            }
            checkpoints.push(hash);
        } else {
            let delta = hash - previous_hash;
            if delta > 0xff {
                return Err(Error::InvalidValue(format!(
                    "hash delta {delta} exceeds the checkpoint park budget"
                )));
            }
            current_deltas.push(delta as u8);
        }
        previous_hash = hash;
    }
    if park_fill > 0 {
        plot.extend_from_slice(park_packer.bytes_padded(position_park_bytes(k) as usize));
    }
    if count > 0 {
        flush_delta_park(&mut delta_parks, &current_deltas);
    }
    phase3.final_rank_manager.free_memory();
    tables[7] = Vec::new();

    // First-level checkpoints.
    pointers[8] = plot.len() as u64;
    let checkpoint_bytes = checkpoint_entry_bytes(k) as usize;
    let mut packer = BitPacker::new();
    for &hash in &checkpoints {
        packer.clear();
        packer.push(u128::from(hash), u32::from(k));
        plot.extend_from_slice(packer.bytes_padded(checkpoint_bytes));
    }

    // Second-level checkpoints over the first.
    pointers[9] = plot.len() as u64;
    for &hash in checkpoints.iter().step_by(CHECKPOINT_2_INTERVAL) {
        packer.clear();
        packer.push(u128::from(hash), u32::from(k));
        plot.extend_from_slice(packer.bytes_padded(checkpoint_bytes));
    }

    // Delta parks.
    pointers[10] = plot.len() as u64;
    plot.extend_from_slice(&delta_parks);

    debug!(
        entries = count,
        checkpoints = checkpoints.len(),
        final_size = plot.len(),
        "checkpoint tables written"
    );
    Ok(())
}

/// Append one fixed-size delta park: big-endian count, deltas, zero pad.
fn flush_delta_park(out: &mut Vec<u8>, deltas: &[u8]) {
    debug_assert!(deltas.len() < CHECKPOINT_1_INTERVAL);
    out.extend_from_slice(&(deltas.len() as u16).to_be_bytes());
    out.extend_from_slice(deltas);
    out.resize(out.len() + (CHECKPOINT_1_INTERVAL - 1 - deltas.len()), 0);
}
