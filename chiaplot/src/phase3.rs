//! Phase 3: compression
//!
//! Rewrites tables 1..6 into their final parked form. Compressed table `t`
//! holds one line point per *surviving* entry of working table `t+1`: the
//! pair of positions that entry references, remapped twice — dead left
//! entries squeezed out via the survivor bitfield's rank, then each left
//! survivor replaced by its final position in compressed table `t-1`
//! (for table 1, by its stored `x` value). Line points are sorted before
//! parking, and that sorted rank becomes the referencing entry's own final
//! position, handed forward to the next iteration as a rank stream.
//!
//! Three sorted streams per table keep memory bounded: the right survivors
//! re-keyed by position, the line points keyed by value, and the rank
//! hand-off keyed by the original right index. Left final positions are
//! consumed through a sliding window whose span is bounded by the offset
//! field's width.

use crate::bitfield::{Bitfield, RankIndex};
use crate::constants::{ENTRIES_PER_PARK, NUM_TABLE_POINTERS, OFFSET_SIZE};
use crate::entry_sizes::{entry_size, pos_bits, y_bits};
use crate::err::Error;
use crate::line_point;
use crate::park;
use crate::scratch::{read_entry, BufferedScratch, FilteredScratch, Scratch};
use crate::sort_manager::SortManager;
use chiafx::bits::{slice_u128, slice_u64, BitPacker};
use std::collections::VecDeque;
use tracing::debug;

/// Slack entries retained in the left-position window beyond the span the
/// offset field can reference.
const WINDOW_SLACK: usize = 64;

/// What compression leaves behind for the checkpoint phase.
pub(crate) struct Phase3Output {
    /// Table begin pointers; slots 1..=6 are filled here.
    pub(crate) pointers: [u64; NUM_TABLE_POINTERS + 1],
    /// Stream of (table-7 index → final position in compressed table 6),
    /// keyed by index.
    pub(crate) final_rank_manager: SortManager,
}

/// Entry layout of the position-keyed right stream: pos | offset | rank.
fn repos_entry_size(k: u8) -> u16 {
    ((2 * pos_bits(k) + OFFSET_SIZE + 7) / 8) as u16
}

/// Entry layout of the line-point stream: line point | rank.
fn lp_entry_size(k: u8) -> u16 {
    ((2 * u32::from(k) + pos_bits(k) + 7) / 8) as u16
}

/// Entry layout of the rank hand-off stream: index | final position.
pub(crate) fn rank_entry_size(k: u8) -> u16 {
    ((2 * pos_bits(k) + 7) / 8) as u16
}

/// Compress tables 1..6 into `plot`, appending parks after the header.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_phase3(
    plot: &mut Vec<u8>,
    tables: &mut [Vec<u8>],
    table_sizes: &[u64; 8],
    bitfields: &[Bitfield],
    k: u8,
    memory_size: u64,
    num_buckets: u32,
    log_num_buckets: u32,
    stripe_size: u64,
) -> Result<Phase3Output, Error> {
    let mut pointers = [0u64; NUM_TABLE_POINTERS + 1];
    let mut rank_manager: Option<SortManager> = None;
    let all_survive = Bitfield::all_set(table_sizes[7]);

    for table in 1..=6u8 {
        let left_size = entry_size(k, table);
        let right_table = table + 1;
        let right_size = entry_size(k, right_table);
        let right_filter = if right_table == 7 {
            &all_survive
        } else {
            &bitfields[usize::from(right_table)]
        };
        let right_survivors = right_filter.count();

        // Pass one: re-key the surviving right entries by the position they
        // reference, remembering each one's compacted index.
        let mut repos_manager = SortManager::new(
            memory_size,
            num_buckets,
            log_num_buckets,
            repos_entry_size(k),
            0,
            stripe_size,
        )?;
        {
            let position_offset = u64::from(y_bits(k, right_table));
            let mut right_reader = FilteredScratch::new(
                BufferedScratch::new(&mut tables[usize::from(right_table)]),
                right_filter,
                right_size,
            );
            let mut packer = BitPacker::new();
            for rank in 0..right_survivors {
                let bytes = read_entry(&mut right_reader, rank, right_size)?;
                let position = slice_u64(bytes, position_offset, pos_bits(k));
                let offset =
                    slice_u64(bytes, position_offset + u64::from(pos_bits(k)), OFFSET_SIZE);
                packer.clear();
                packer.push(u128::from(position), pos_bits(k));
                packer.push(u128::from(offset), OFFSET_SIZE);
                packer.push(u128::from(rank), pos_bits(k));
                repos_manager
                    .add_to_cache(packer.bytes_padded(usize::from(repos_entry_size(k))))?;
            }
        }

        // Pass two: walk the re-keyed stream against the surviving left
        // entries, emitting one line point per right survivor.
        let left_rank = RankIndex::new(&bitfields[usize::from(table)]);
        let mut lp_manager = SortManager::new(
            memory_size,
            num_buckets,
            log_num_buckets,
            lp_entry_size(k),
            0,
            stripe_size,
        )?;
        {
            let mut left_reader = FilteredScratch::new(
                BufferedScratch::new(&mut tables[usize::from(table)]),
                &bitfields[usize::from(table)],
                left_size,
            );
            let left_y_bits = u64::from(y_bits(k, table));
            let mut window: VecDeque<u64> = VecDeque::new();
            let mut window_base = 0u64;
            let mut next_left = 0u64;
            let mut packer = BitPacker::new();
            let repos_size = repos_entry_size(k);

            for i in 0..right_survivors {
                let bytes = read_entry(&mut repos_manager, i, repos_size)?;
                let position = slice_u64(bytes, 0, pos_bits(k));
                let offset = slice_u64(bytes, u64::from(pos_bits(k)), OFFSET_SIZE);
                let rank = slice_u64(
                    bytes,
                    u64::from(pos_bits(k)) + u64::from(OFFSET_SIZE),
                    pos_bits(k),
                );

                let left_a = left_rank.rank(&bitfields[usize::from(table)], position);
                let left_b =
                    left_rank.rank(&bitfields[usize::from(table)], position + offset);
                debug_assert!(bitfields[usize::from(table)].get(position));
                debug_assert!(bitfields[usize::from(table)].get(position + offset));

                // Pull left survivors forward until both ends are resolved.
                while next_left <= left_b {
                    let left_bytes = read_entry(&mut left_reader, next_left, left_size)?;
                    let final_position = if table == 1 {
                        slice_u64(left_bytes, left_y_bits, u32::from(k))
                    } else {
                        let manager = rank_manager
                            .as_mut()
                            .expect("rank stream exists after the first table");
                        let rank_bytes = read_entry(manager, next_left, rank_entry_size(k))?;
                        debug_assert_eq!(slice_u64(rank_bytes, 0, pos_bits(k)), next_left);
                        slice_u64(rank_bytes, u64::from(pos_bits(k)), pos_bits(k))
                    };
                    window.push_back(final_position);
                    next_left += 1;
                }
                // The stream is position-sorted, so everything before the
                // current left end is done for good.
                while window_base < left_a
                    && window.len() > (1usize << OFFSET_SIZE) + WINDOW_SLACK
                {
                    window.pop_front();
                    window_base += 1;
                }

                let a = window[(left_a - window_base) as usize];
                let b = window[(left_b - window_base) as usize];
                let lp = line_point::encode(a, b);
                packer.clear();
                packer.push(lp, 2 * u32::from(k));
                packer.push(u128::from(rank), pos_bits(k));
                lp_manager.add_to_cache(packer.bytes_padded(usize::from(lp_entry_size(k))))?;
            }
        }
        repos_manager.free_memory();
        if let Some(mut manager) = rank_manager.take() {
            manager.free_memory();
        }
        // The left table has been consumed for good.
        tables[usize::from(table)] = Vec::new();

        // Pass three: park the sorted line points and hand each right
        // survivor its final position.
        pointers[usize::from(table)] = plot.len() as u64;
        let mut next_rank_manager = SortManager::new(
            memory_size,
            num_buckets,
            log_num_buckets,
            rank_entry_size(k),
            0,
            stripe_size,
        )?;
        {
            let mut park_buf: Vec<u128> = Vec::with_capacity(ENTRIES_PER_PARK);
            let mut packer = BitPacker::new();
            let lp_size = lp_entry_size(k);
            for final_position in 0..right_survivors {
                let bytes = read_entry(&mut lp_manager, final_position, lp_size)?;
                let lp = slice_u128(bytes, 0, 2 * u32::from(k));
                let rank = slice_u64(bytes, u64::from(2 * u32::from(k)), pos_bits(k));

                park_buf.push(lp);
                if park_buf.len() == ENTRIES_PER_PARK {
                    park::write_park(plot, k, &park_buf)?;
                    park_buf.clear();
                }
                packer.clear();
                packer.push(u128::from(rank), pos_bits(k));
                packer.push(u128::from(final_position), pos_bits(k));
                next_rank_manager
                    .add_to_cache(packer.bytes_padded(usize::from(rank_entry_size(k))))?;
            }
            if !park_buf.is_empty() {
                park::write_park(plot, k, &park_buf)?;
            }
        }
        lp_manager.free_memory();
        rank_manager = Some(next_rank_manager);
        debug!(
            table,
            entries = right_survivors,
            bytes = plot.len() as u64 - pointers[usize::from(table)],
            "table compressed"
        );
    }

    Ok(Phase3Output {
        pointers,
        final_rank_manager: rank_manager
            .take()
            .expect("six tables leave a final rank stream"),
    })
}
