//! Bucketed external sort with a byte-addressed sorted read side
//!
//! Entries arrive unsorted; a contiguous slice of their key bits selects one
//! of a power-of-two number of buckets, so bucket order is key order. On the
//! read side the manager serves the *concatenation of sorted buckets* as one
//! logical byte stream: a read past the sorted frontier lazily sorts the
//! next bucket into a single reusable arena. Readers scan forward; a bounded
//! look-back window over the previous bucket's tail supports the join
//! pattern the forward-propagation phase needs when a stripe straddles a
//! bucket boundary.

use crate::err::Error;
use crate::scratch::Scratch;
use crate::uniform_sort;
use chiafx::bits::slice_u64;
use chiafx::{EXTRA_BITS_POW, PARAM_BC};
use tracing::debug;

/// Extra tail bytes on the arena and look-back buffers so a decoder can
/// slice a whole word out of the final entry.
const TAIL_ROOM: usize = 7;

/// External sort manager over fixed-width entries.
///
/// Created per table: filled through [`SortManager::add_to_cache`] during
/// generation, then drained exactly once, forward, through [`Scratch::read`].
/// The first sort closes the write side.
pub(crate) struct SortManager {
    /// Arena one bucket is sorted into; allocated on first use.
    memory: Option<Box<[u8]>>,
    /// Arena capacity in bytes.
    memory_size: u64,
    /// Width of one entry.
    entry_size: u16,
    /// First bit of the bucket-selection slice.
    begin_bits: u32,
    /// Width of the bucket-selection slice.
    log_num_buckets: u32,
    /// Unsorted per-bucket entry bytes.
    buckets: Vec<Vec<u8>>,
    /// Bounded look-back window over the previous bucket's tail.
    prev_bucket_buf: Option<Box<[u8]>>,
    /// Capacity of the look-back window.
    prev_bucket_buf_size: u64,
    /// Logical position the look-back window starts at.
    prev_bucket_position_start: u64,
    /// Set once draining starts; writes are rejected from then on.
    done: bool,
    /// Logical position where the arena's bucket starts.
    final_position_start: u64,
    /// Logical position just past the arena's bucket.
    final_position_end: u64,
    /// Next bucket to be sorted.
    next_bucket_to_sort: usize,
    /// Total bytes accepted, for working-space accounting.
    cached_bytes: u64,
}

impl SortManager {
    /// Configure a sort manager.
    ///
    /// `num_buckets` must equal `2^log_num_buckets`. `stripe_size` (in
    /// entries) sizes the look-back window to cover one stripe plus the
    /// worst-case spill of the match window across a bucket boundary.
    pub(crate) fn new(
        memory_size: u64,
        num_buckets: u32,
        log_num_buckets: u32,
        entry_size: u16,
        begin_bits: u32,
        stripe_size: u64,
    ) -> Result<Self, Error> {
        if num_buckets == 0 || u64::from(num_buckets) != 1u64 << log_num_buckets {
            return Err(Error::InvalidValue(format!(
                "bucket count {num_buckets} does not match 2^{log_num_buckets}"
            )));
        }
        if entry_size == 0 {
            return Err(Error::InvalidValue("entry size must be positive".into()));
        }
        let match_spill = 10 * (PARAM_BC / EXTRA_BITS_POW);
        Ok(Self {
            memory: None,
            memory_size,
            entry_size,
            begin_bits,
            log_num_buckets,
            buckets: (0..num_buckets).map(|_| Vec::new()).collect(),
            prev_bucket_buf: None,
            prev_bucket_buf_size: 2 * (stripe_size + match_spill) * u64::from(entry_size),
            prev_bucket_position_start: 0,
            done: false,
            final_position_start: 0,
            final_position_end: 0,
            next_bucket_to_sort: 0,
            cached_bytes: 0,
        })
    }

    /// Append one entry to its bucket's cache.
    pub(crate) fn add_to_cache(&mut self, entry: &[u8]) -> Result<(), Error> {
        if self.done {
            return Err(Error::InvalidValue(
                "sort manager already finished accepting entries".into(),
            ));
        }
        debug_assert_eq!(entry.len(), usize::from(self.entry_size));
        let bucket =
            slice_u64(entry, u64::from(self.begin_bits), self.log_num_buckets) as usize;
        self.buckets[bucket].extend_from_slice(entry);
        self.cached_bytes += u64::from(self.entry_size);
        Ok(())
    }

    /// Total bytes accepted into bucket caches.
    pub(crate) fn cached_bytes(&self) -> u64 {
        self.cached_bytes
    }

    /// Logical position where the currently sorted bucket begins.
    ///
    /// A bucket handoff is only legal from inside the current bucket, so
    /// scanners compare their cursor against this before triggering.
    pub(crate) fn current_bucket_start(&self) -> u64 {
        self.final_position_start
    }

    /// Whether `position` is within half a look-back window of needing the
    /// next bucket sorted (and one remains).
    pub(crate) fn close_to_new_bucket(&self, position: u64) -> bool {
        if position > self.final_position_end {
            return self.next_bucket_to_sort < self.buckets.len();
        }
        position + self.prev_bucket_buf_size / 2 >= self.final_position_end
            && self.next_bucket_to_sort < self.buckets.len()
    }

    /// Sort the next bucket, first saving `[position, frontier)` of the
    /// current arena as the look-back window.
    ///
    /// `position` must lie within the arena's current bucket; it becomes the
    /// lowest position still readable afterwards.
    pub(crate) fn trigger_new_bucket(&mut self, position: u64) -> Result<(), Error> {
        if position > self.final_position_end {
            return Err(Error::InvalidValue("triggering bucket too late".into()));
        }
        if position < self.final_position_start {
            return Err(Error::InvalidValue("triggering bucket too early".into()));
        }
        if let Some(memory) = &self.memory {
            let cache_size = self.final_position_end - position;
            if cache_size > self.prev_bucket_buf_size {
                return Err(Error::InvalidState(
                    "look-back window smaller than the retained bucket tail".into(),
                ));
            }
            let mut buf =
                vec![0u8; self.prev_bucket_buf_size as usize + TAIL_ROOM].into_boxed_slice();
            let arena_offset = (position - self.final_position_start) as usize;
            buf[..cache_size as usize]
                .copy_from_slice(&memory[arena_offset..arena_offset + cache_size as usize]);
            self.prev_bucket_buf = Some(buf);
        }
        self.sort_bucket()?;
        self.prev_bucket_position_start = position;
        Ok(())
    }

    /// Reset the read frontier and drop the arena.
    pub(crate) fn flush_cache(&mut self) {
        self.final_position_end = 0;
        self.memory = None;
    }

    /// Sort bucket `next_bucket_to_sort` into the arena and advance the
    /// logical frontier over it.
    fn sort_bucket(&mut self) -> Result<(), Error> {
        if self.memory.is_none() {
            // Allocated lazily; released in free_memory() or on drop.
            self.memory = Some(vec![0u8; self.memory_size as usize + TAIL_ROOM].into_boxed_slice());
        }
        self.done = true;
        if self.next_bucket_to_sort >= self.buckets.len() {
            return Err(Error::InvalidValue(
                "no bucket left to sort for this read position".into(),
            ));
        }
        let bucket_index = self.next_bucket_to_sort;
        let entry_size = u64::from(self.entry_size);
        let bucket_bytes = self.buckets[bucket_index].len() as u64;
        let bucket_entries = bucket_bytes / entry_size;

        let entries_fit = self.memory_size / entry_size;
        if bucket_entries > entries_fit {
            return Err(Error::InsufficientMemory(format!(
                "bucket of {bucket_entries} entries exceeds in-memory sort capacity {entries_fit}"
            )));
        }
        if uniform_sort::round_size(bucket_entries) * entry_size > self.memory_size {
            return Err(Error::InsufficientMemory(format!(
                "bucket of {bucket_entries} entries needs a larger sort arena than {} bytes",
                self.memory_size
            )));
        }
        debug!(
            bucket = bucket_index,
            entries = bucket_entries,
            "uniform-sorting bucket"
        );

        let memory = self.memory.as_mut().expect("arena allocated above");
        uniform_sort::sort_to_memory(
            &mut self.buckets[bucket_index],
            memory,
            usize::from(self.entry_size),
            bucket_entries,
            self.begin_bits + self.log_num_buckets,
        )?;
        // The bucket cache has been consumed; release it eagerly.
        self.buckets[bucket_index] = Vec::new();

        self.final_position_start = self.final_position_end;
        self.final_position_end += bucket_bytes;
        self.next_bucket_to_sort += 1;
        Ok(())
    }
}

impl Scratch for SortManager {
    fn read(&mut self, begin: u64, length: u64) -> Result<&[u8], Error> {
        if length > u64::from(self.entry_size) {
            return Err(Error::InvalidValue(format!(
                "sorted stream reads are at most one entry, got {length}"
            )));
        }
        if begin < self.final_position_start {
            // Within the bounded look-back window.
            if begin < self.prev_bucket_position_start {
                return Err(Error::InvalidState(
                    "read behind the look-back window start".into(),
                ));
            }
            let buf = self.prev_bucket_buf.as_ref().ok_or_else(|| {
                Error::InvalidState("look-back read before any bucket handoff".into())
            })?;
            let offset = (begin - self.prev_bucket_position_start) as usize;
            return Ok(&buf[offset..offset + length as usize]);
        }
        while begin >= self.final_position_end {
            self.sort_bucket()?;
        }
        debug_assert!(self.final_position_start <= begin);
        let memory = self
            .memory
            .as_ref()
            .ok_or_else(|| Error::InvalidState("sorted arena not allocated".into()))?;
        let offset = (begin - self.final_position_start) as usize;
        Ok(&memory[offset..offset + length as usize])
    }

    fn write(&mut self, _begin: u64, _bytes: &[u8]) -> Result<(), Error> {
        Err(Error::InvalidState(
            "byte writes on a sort manager; entries go through add_to_cache".into(),
        ))
    }

    fn truncate(&mut self, new_size: u64) -> Result<(), Error> {
        if new_size != 0 {
            return Err(Error::InvalidState(
                "sort managers only support truncation to zero".into(),
            ));
        }
        self.flush_cache();
        self.free_memory();
        Ok(())
    }

    fn free_memory(&mut self) {
        self.prev_bucket_buf = None;
        self.memory = None;
        self.final_position_end = 0;
        self.buckets = Vec::new();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scratch::read_entry;
    use chiafx::bits::BitPacker;
    use rand::{Rng, SeedableRng};

    const ENTRY_SIZE: u16 = 6;

    fn make_entries(n: usize, seed: u64) -> Vec<Vec<u8>> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let mut packer = BitPacker::new();
                packer.push(u128::from(rng.gen::<u64>() & 0xffff_ffff_ffff), 48);
                let mut bytes = packer.as_bytes().to_vec();
                bytes[5] |= 1; // non-zero key suffix
                bytes
            })
            .collect()
    }

    fn drain(manager: &mut SortManager, n: usize) -> Vec<Vec<u8>> {
        (0..n as u64)
            .map(|i| read_entry(manager, i, ENTRY_SIZE).unwrap().to_vec())
            .collect()
    }

    #[test]
    fn sorted_permutation_over_full_range() {
        for &(n, num_buckets, log) in &[(2000usize, 16u32, 4u32), (500, 64, 6), (1, 16, 4)] {
            let entries = make_entries(n, 42 + n as u64);
            let mut manager =
                SortManager::new(1 << 16, num_buckets, log, ENTRY_SIZE, 0, 100).unwrap();
            for entry in &entries {
                manager.add_to_cache(entry).unwrap();
            }
            let drained = drain(&mut manager, n);

            let mut expected = entries.clone();
            expected.sort();
            assert_eq!(drained, expected, "n={n} buckets={num_buckets}");
        }
    }

    #[test]
    fn begin_bits_offset_partitions_consistently() {
        // Key starts at bit 8; the first byte is noise the sort ignores.
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let entries: Vec<Vec<u8>> = (0..800)
            .map(|_| {
                let mut e = vec![0u8; ENTRY_SIZE as usize];
                rng.fill(&mut e[..]);
                e[5] |= 1;
                e
            })
            .collect();
        let mut manager = SortManager::new(1 << 16, 16, 4, ENTRY_SIZE, 8, 100).unwrap();
        for entry in &entries {
            manager.add_to_cache(entry).unwrap();
        }
        let drained = drain(&mut manager, 800);
        let mut expected = entries.clone();
        expected.sort_by(|a, b| a[1..].cmp(&b[1..]));
        assert_eq!(
            drained.iter().map(|e| &e[1..]).collect::<Vec<_>>(),
            expected.iter().map(|e| &e[1..]).collect::<Vec<_>>()
        );
    }

    #[test]
    fn writes_fail_after_draining_starts() {
        let entries = make_entries(10, 1);
        let mut manager = SortManager::new(1 << 16, 16, 4, ENTRY_SIZE, 0, 100).unwrap();
        for entry in &entries {
            manager.add_to_cache(entry).unwrap();
        }
        read_entry(&mut manager, 0, ENTRY_SIZE).unwrap();
        assert!(matches!(
            manager.add_to_cache(&entries[0]),
            Err(Error::InvalidValue(_))
        ));
    }

    #[test]
    fn no_cross_instance_state() {
        let entries = make_entries(10, 2);
        let mut first = SortManager::new(1 << 16, 16, 4, ENTRY_SIZE, 0, 100).unwrap();
        let mut second = SortManager::new(1 << 16, 16, 4, ENTRY_SIZE, 0, 100).unwrap();
        for entry in &entries {
            first.add_to_cache(entry).unwrap();
        }
        let first_drained = drain(&mut first, 10);
        // The other instance must still accept writes.
        for entry in &entries {
            second.add_to_cache(entry).unwrap();
        }
        assert_eq!(drain(&mut second, 10), first_drained);
    }

    #[test]
    fn look_back_window_serves_previous_bucket_tail() {
        let n = 3000usize;
        let entries = make_entries(n, 3);
        let mut manager = SortManager::new(1 << 16, 16, 4, ENTRY_SIZE, 0, 200).unwrap();
        for entry in &entries {
            manager.add_to_cache(entry).unwrap();
        }
        let mut expected = entries.clone();
        expected.sort();

        let entry_size = u64::from(ENTRY_SIZE);
        let mut i = 0u64;
        let mut last_trigger = 0u64;
        while (i as usize) < n {
            let pos = i * entry_size;
            if pos >= manager.current_bucket_start() && manager.close_to_new_bucket(pos) {
                manager.trigger_new_bucket(pos).unwrap();
                last_trigger = i;
            }
            let got = read_entry(&mut manager, i, ENTRY_SIZE).unwrap();
            assert_eq!(got, &expected[i as usize][..]);
            // Anything back to the trigger point stays readable.
            if i > last_trigger {
                let back = manager.read(last_trigger * entry_size, entry_size).unwrap();
                assert_eq!(back, &expected[last_trigger as usize][..]);
            }
            i += 1;
        }
    }

    #[test]
    fn partial_truncate_is_rejected() {
        let mut manager = SortManager::new(1 << 16, 16, 4, ENTRY_SIZE, 0, 100).unwrap();
        assert!(matches!(
            manager.truncate(10),
            Err(Error::InvalidState(_))
        ));
        manager.truncate(0).unwrap();
    }

    #[test]
    fn oversized_bucket_reports_insufficient_memory() {
        // Arena fits only a handful of entries; everything lands in one
        // bucket via identical leading bits.
        let mut manager = SortManager::new(64, 16, 4, ENTRY_SIZE, 0, 100).unwrap();
        for i in 0..100u64 {
            let mut packer = BitPacker::new();
            packer.push(u128::from(i + 1), 48);
            manager.add_to_cache(packer.bytes_padded(6)).unwrap();
        }
        assert!(matches!(
            read_entry(&mut manager, 0, ENTRY_SIZE),
            Err(Error::InsufficientMemory(_))
        ));
    }
}
