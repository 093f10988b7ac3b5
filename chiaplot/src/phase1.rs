//! Phase 1: forward propagation
//!
//! Builds the seven working tables. Table 1 is the keystream expansion of
//! the plot id; each later table is the set of matches between adjacent
//! y-buckets of its predecessor. Entries are fed unsorted into one sort
//! manager per table; while table `t+1` is being generated, table `t`'s
//! manager is drained forward and the sorted bytes are simultaneously
//! appended to that table's scratch region, so by the end every table sits
//! y-sorted in memory and the managers are gone.
//!
//! The drain runs in stripes: at each stripe boundary the manager is asked
//! whether the next bucket is close, and if so hands off with a bounded
//! look-back window rather than waiting for the read cursor to hit the
//! frontier.

use crate::entry_sizes::{entry_size, pos_bits, y_bits};
use crate::err::Error;
use crate::scratch::Scratch;
use crate::sort_manager::SortManager;
use crate::constants::OFFSET_SIZE;
use chiafx::bits::{slice_u64, BitPacker};
use chiafx::matching::Matcher;
use chiafx::{metadata_bits, F1Calculator, FxCalculator, Metadata, EXTRA_BITS, PARAM_BC};
use tracing::debug;

/// One decoded left-table entry inside the current match window.
struct WindowEntry {
    /// Full `y` value.
    y: u64,
    /// Entry metadata.
    metadata: Metadata,
    /// Index of the entry within its (sorted) table.
    index: u64,
}

/// Layout of the tables produced by phase 1.
pub(crate) struct Phase1Output {
    /// Entry counts per table (index 0 totals the sort working space).
    pub(crate) table_sizes: [u64; 8],
}

/// Generate all seven tables into `tables[1..=7]`.
pub(crate) fn run_phase1(
    tables: &mut [Vec<u8>],
    k: u8,
    id: &[u8; 32],
    memory_size: u64,
    num_buckets: u32,
    log_num_buckets: u32,
    stripe_size: u64,
) -> Result<Phase1Output, Error> {
    let mut table_sizes = [0u64; 8];

    // Table 1: y = f1(x), metadata = x.
    let first_entry_size = entry_size(k, 1);
    let mut right_manager = SortManager::new(
        memory_size,
        num_buckets,
        log_num_buckets,
        first_entry_size,
        0,
        stripe_size,
    )?;
    let mut f1 = F1Calculator::new(k, id);
    let mut packer = BitPacker::new();
    for x in 0..1u64 << k {
        let y = f1.calculate_f1(x);
        packer.clear();
        packer.push(u128::from(y), y_bits(k, 1));
        packer.push(u128::from(x), u32::from(k));
        right_manager.add_to_cache(packer.bytes_padded(usize::from(first_entry_size)))?;
    }
    table_sizes[1] = 1u64 << k;
    table_sizes[0] += right_manager.cached_bytes();
    debug!(table = 1, entries = table_sizes[1], "table generated");

    let mut left_manager = right_manager;
    for table_index in 2..=7u8 {
        let left_table = table_index - 1;
        let left_size = u64::from(entry_size(k, left_table));
        let left_y_bits = y_bits(k, left_table);
        let left_meta_bits = metadata_bits(k, left_table);
        let left_count = table_sizes[usize::from(left_table)];
        let right_size = entry_size(k, table_index);

        let mut right_manager = SortManager::new(
            memory_size,
            num_buckets,
            log_num_buckets,
            right_size,
            0,
            stripe_size,
        )?;
        let mut fx = FxCalculator::new(k, table_index);
        let mut matcher = Matcher::new();
        let mut matches = Vec::new();
        let mut match_count = 0u64;

        // Two adjacent bucket groups of the left table.
        let mut prev_group: Vec<WindowEntry> = Vec::new();
        let mut prev_bucket = 0u64;
        let mut cur_group: Vec<WindowEntry> = Vec::new();
        let mut cur_bucket = u64::MAX;

        let scratch = &mut tables[usize::from(left_table)];
        scratch.reserve((left_count * left_size) as usize);

        for index in 0..left_count {
            let read_position = index * left_size;
            if index % stripe_size == 0
                && read_position >= left_manager.current_bucket_start()
                && left_manager.close_to_new_bucket(read_position)
            {
                left_manager.trigger_new_bucket(read_position)?;
            }
            let bytes = left_manager.read(read_position, left_size)?;
            scratch.extend_from_slice(bytes);
            let y = slice_u64(bytes, 0, left_y_bits);
            let metadata = Metadata::from_bits(bytes, u64::from(left_y_bits), left_meta_bits);

            let bucket = y / PARAM_BC;
            if bucket != cur_bucket {
                if !prev_group.is_empty() && prev_bucket + 1 == cur_bucket {
                    match_count += process_pair(
                        k,
                        table_index,
                        &prev_group,
                        &cur_group,
                        prev_bucket,
                        &mut matcher,
                        &mut matches,
                        &mut fx,
                        &mut right_manager,
                        &mut packer,
                    )?;
                }
                prev_group = std::mem::take(&mut cur_group);
                prev_bucket = cur_bucket;
                cur_bucket = bucket;
            }
            cur_group.push(WindowEntry { y, metadata, index });
        }
        if !prev_group.is_empty() && prev_bucket + 1 == cur_bucket {
            match_count += process_pair(
                k,
                table_index,
                &prev_group,
                &cur_group,
                prev_bucket,
                &mut matcher,
                &mut matches,
                &mut fx,
                &mut right_manager,
                &mut packer,
            )?;
        }

        left_manager.free_memory();
        table_sizes[usize::from(table_index)] = match_count;
        table_sizes[0] += right_manager.cached_bytes();
        debug!(table = table_index, entries = match_count, "table generated");
        left_manager = right_manager;
    }

    // Drain table 7 into its scratch region; nothing joins against it.
    let last_size = u64::from(entry_size(k, 7));
    let last_count = table_sizes[7];
    let scratch = &mut tables[7];
    scratch.reserve((last_count * last_size) as usize);
    for index in 0..last_count {
        let bytes = left_manager.read(index * last_size, last_size)?;
        scratch.extend_from_slice(bytes);
    }
    left_manager.free_memory();

    Ok(Phase1Output { table_sizes })
}

/// Match one adjacent bucket-group pair and feed the resulting entries of
/// `table_index` into its sort manager. Returns the number of matches.
#[allow(clippy::too_many_arguments)]
fn process_pair(
    k: u8,
    table_index: u8,
    left_group: &[WindowEntry],
    right_group: &[WindowEntry],
    left_bucket: u64,
    matcher: &mut Matcher,
    matches: &mut Vec<(u16, u16)>,
    fx: &mut FxCalculator,
    right_manager: &mut SortManager,
    packer: &mut BitPacker,
) -> Result<u64, Error> {
    let left_ys: Vec<u64> = left_group.iter().map(|e| e.y % PARAM_BC).collect();
    let right_ys: Vec<u64> = right_group.iter().map(|e| e.y % PARAM_BC).collect();
    matches.clear();
    matcher.find_matches(&left_ys, &right_ys, left_bucket % 2, matches);

    let right_entry_size = usize::from(entry_size(k, table_index));
    for &(left_index, right_index) in matches.iter() {
        let left = &left_group[usize::from(left_index)];
        let right = &right_group[usize::from(right_index)];
        let (new_y, new_metadata) = fx.calculate_fn(left.y, &left.metadata, &right.metadata);

        let offset = right.index - left.index;
        if offset >= 1u64 << OFFSET_SIZE {
            return Err(Error::InvalidState(format!(
                "match offset {offset} exceeds the offset field"
            )));
        }

        packer.clear();
        if table_index == 7 {
            packer.push(u128::from(new_y >> EXTRA_BITS), y_bits(k, 7));
        } else {
            packer.push(u128::from(new_y), y_bits(k, table_index));
        }
        packer.push(u128::from(left.index), pos_bits(k));
        packer.push(u128::from(offset), OFFSET_SIZE);
        new_metadata.append_to(packer);
        right_manager.add_to_cache(packer.bytes_padded(right_entry_size))?;
    }
    Ok(matches.len() as u64)
}
