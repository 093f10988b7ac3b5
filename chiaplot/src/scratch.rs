//! Buffered and filtered views over a byte-addressed scratch region
//!
//! The plotting phases stream fixed-width entries out of large in-memory
//! regions. [`BufferedScratch`] puts a forward-biased read window and a
//! write-combining cache in front of one region: sequential scans hit the
//! window, sequential writes coalesce, and anything else stays correct but
//! slow. [`FilteredScratch`] layers a bitfield on top so that entries whose
//! bit is cleared simply do not exist in the logical offset space; it is the
//! read side of table compression.
//!
//! A returned slice is only valid until the next call on the same object,
//! which the borrow checker enforces here; the price is that callers copy
//! out anything they need to keep.

use crate::bitfield::Bitfield;
use crate::err::Error;
use tracing::warn;

/// Size of the write-combining cache.
pub(crate) const WRITE_CACHE: u64 = 1024 * 1024;

/// Size of the read-ahead window.
pub(crate) const READ_AHEAD: u64 = 1024 * 1024;

/// Tail slack on every read buffer so a decoder can always slice a whole
/// word out of the final entry of a window.
const TAIL_ROOM: u64 = 7;

/// Fallback buffer size for reads behind the window.
const BACKWARD_BUF: usize = 128;

/// Sentinel for "no window yet".
const NO_WINDOW: u64 = u64::MAX;

/// Common capability set over scratch-backed byte streams.
///
/// Implemented by [`BufferedScratch`], [`FilteredScratch`] and the sort
/// manager; phases are generic over it only where they genuinely do not
/// care which one they are draining.
pub(crate) trait Scratch {
    /// Read `length` bytes at `begin`; the slice lives until the next call.
    fn read(&mut self, begin: u64, length: u64) -> Result<&[u8], Error>;

    /// Write `bytes` at `begin`.
    fn write(&mut self, begin: u64, bytes: &[u8]) -> Result<(), Error>;

    /// Shrink the region to `new_size` bytes.
    fn truncate(&mut self, new_size: u64) -> Result<(), Error>;

    /// Drop all caches; the region itself survives.
    fn free_memory(&mut self);
}

/// Read one fixed-width entry by index from any scratch stream.
#[inline]
pub(crate) fn read_entry<S: Scratch>(
    scratch: &mut S,
    index: u64,
    entry_size: u16,
) -> Result<&[u8], Error> {
    let entry_size = u64::from(entry_size);
    scratch.read(index * entry_size, entry_size)
}

/// Forward-biased read cache plus write coalescer over a mutable region.
#[derive(Debug)]
pub(crate) struct BufferedScratch<'a> {
    /// The underlying region; grown on flush when writes run past its end.
    region: &'a mut Vec<u8>,
    /// Logical size of the region's valid prefix.
    file_size: u64,
    /// Region offset the read window was filled from, or [`NO_WINDOW`].
    read_start: u64,
    /// Valid bytes in the read window.
    read_size: u64,
    /// The read window, allocated on first read.
    read_buf: Option<Box<[u8]>>,
    /// Region offset the write cache will flush to.
    write_start: u64,
    /// Bytes accumulated in the write cache.
    write_size: u64,
    /// The write cache, allocated on first write.
    write_buf: Option<Box<[u8]>>,
    /// Per-object fallback for reads behind the window.
    backward_buf: [u8; BACKWARD_BUF],
}

impl<'a> BufferedScratch<'a> {
    /// Wrap `region`; its current length is the readable size.
    pub(crate) fn new(region: &'a mut Vec<u8>) -> Self {
        let file_size = region.len() as u64;
        Self {
            region,
            file_size,
            read_start: NO_WINDOW,
            read_size: 0,
            read_buf: None,
            write_start: NO_WINDOW,
            write_size: 0,
            write_buf: None,
            backward_buf: [0; BACKWARD_BUF],
        }
    }

    /// Flush the write cache into the region. Idempotent.
    pub(crate) fn flush(&mut self) {
        if self.write_size == 0 {
            return;
        }
        let end = (self.write_start + self.write_size) as usize;
        if self.region.len() < end {
            self.region.resize(end, 0);
        }
        let buf = self.write_buf.as_ref().expect("cache is non-empty");
        self.region[self.write_start as usize..end]
            .copy_from_slice(&buf[..self.write_size as usize]);
        self.write_size = 0;
    }

    /// Copy `bytes` straight into the region, growing it as needed.
    fn write_through(&mut self, begin: u64, bytes: &[u8]) {
        let end = begin as usize + bytes.len();
        if self.region.len() < end {
            self.region.resize(end, 0);
        }
        self.region[begin as usize..end].copy_from_slice(bytes);
    }
}

impl Scratch for BufferedScratch<'_> {
    fn read(&mut self, begin: u64, length: u64) -> Result<&[u8], Error> {
        if length >= READ_AHEAD {
            return Err(Error::InvalidValue(format!(
                "read of {length} bytes exceeds the read-ahead window"
            )));
        }
        if begin + length > self.file_size {
            return Err(Error::InvalidValue(format!(
                "read [{begin}, {}) past region size {}",
                begin + length,
                self.file_size
            )));
        }
        if self.read_buf.is_none() {
            self.read_buf = Some(vec![0u8; (READ_AHEAD + TAIL_ROOM) as usize].into_boxed_slice());
            self.read_start = NO_WINDOW;
            self.read_size = 0;
        }

        if self.read_start <= begin
            && self.read_start + self.read_size >= begin + length
            && self.read_start + READ_AHEAD >= begin + length + TAIL_ROOM
        {
            // Entirely inside the window, tail slack included.
            let offset = (begin - self.read_start) as usize;
            let buf = self.read_buf.as_ref().expect("window exists");
            Ok(&buf[offset..offset + length as usize])
        } else if begin >= self.read_start || begin == 0 || self.read_start == NO_WINDOW {
            // Forward of the window (or no window yet): slide it here. The
            // first read lands in this branch through the sentinel, since a
            // discarded prefix means it may start well above offset zero.
            self.read_start = begin;
            let amount = (self.file_size - begin).min(READ_AHEAD);
            let buf = self.read_buf.as_mut().expect("window exists");
            buf[..amount as usize]
                .copy_from_slice(&self.region[begin as usize..(begin + amount) as usize]);
            let tail_end = ((amount + TAIL_ROOM) as usize).min(buf.len());
            buf[amount as usize..tail_end].fill(0);
            self.read_size = amount;
            Ok(&buf[..length as usize])
        } else {
            // Behind the window. Correct but not the access pattern this
            // cache is shaped for, so say so; the window is left alone on
            // the assumption that the forward scan will resume.
            warn!(
                begin,
                length,
                file_size = self.file_size,
                window_start = self.read_start,
                window_size = self.read_size,
                "scratch read position regressed; optimized for forward scans"
            );
            if length as usize > BACKWARD_BUF - TAIL_ROOM as usize {
                return Err(Error::InvalidValue(format!(
                    "backward read of {length} bytes exceeds the fallback buffer"
                )));
            }
            self.backward_buf[..length as usize]
                .copy_from_slice(&self.region[begin as usize..(begin + length) as usize]);
            Ok(&self.backward_buf[..length as usize])
        }
    }

    fn write(&mut self, begin: u64, bytes: &[u8]) -> Result<(), Error> {
        let length = bytes.len() as u64;
        if self.write_buf.is_none() {
            self.write_buf = Some(vec![0u8; WRITE_CACHE as usize].into_boxed_slice());
            self.write_start = NO_WINDOW;
            self.write_size = 0;
        }
        self.file_size = self.file_size.max(begin + length);

        if begin == self.write_start.wrapping_add(self.write_size) {
            if self.write_size + length <= WRITE_CACHE {
                let buf = self.write_buf.as_mut().expect("cache exists");
                buf[self.write_size as usize..(self.write_size + length) as usize]
                    .copy_from_slice(bytes);
                self.write_size += length;
                return Ok(());
            }
            self.flush();
        }

        if self.write_size == 0 && length <= WRITE_CACHE {
            self.write_start = begin;
            let buf = self.write_buf.as_mut().expect("cache exists");
            buf[..length as usize].copy_from_slice(bytes);
            self.write_size = length;
            return Ok(());
        }

        self.write_through(begin, bytes);
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> Result<(), Error> {
        self.flush();
        self.region.truncate(new_size as usize);
        self.region.shrink_to_fit();
        self.file_size = new_size;
        self.free_memory();
        Ok(())
    }

    fn free_memory(&mut self) {
        self.flush();
        self.read_buf = None;
        self.write_buf = None;
        self.read_size = 0;
        self.write_size = 0;
        self.read_start = NO_WINDOW;
        self.write_start = NO_WINDOW;
    }
}

/// Read-only view that skips entries whose filter bit is cleared.
///
/// Offsets handed to [`Scratch::read`] are logical: entry `i` of the view is
/// the `i`-th surviving entry of the underlying region. The cursor only
/// moves forward, which is all the compression pass needs.
#[derive(Debug)]
pub(crate) struct FilteredScratch<'a, 'f> {
    /// Entries whose bit is cleared are skipped.
    filter: &'f Bitfield,
    /// The region being filtered.
    underlying: BufferedScratch<'a>,
    /// Width of one entry in bytes.
    entry_size: u64,
    /// Underlying offset of the cursor; always `last_idx * entry_size`.
    last_physical: u64,
    /// Logical offset of the cursor.
    last_logical: u64,
    /// Filter index of the cursor; its bit is set unless the view is empty.
    last_idx: u64,
}

impl<'a, 'f> FilteredScratch<'a, 'f> {
    /// Build a view over `underlying` that exposes only entries whose bit
    /// is set in `filter`.
    pub(crate) fn new(
        underlying: BufferedScratch<'a>,
        filter: &'f Bitfield,
        entry_size: u16,
    ) -> Self {
        let mut view = Self {
            filter,
            underlying,
            entry_size: u64::from(entry_size),
            last_physical: 0,
            last_logical: 0,
            last_idx: 0,
        };
        // Park the cursor on the first surviving entry.
        while view.last_idx < view.filter.len() && !view.filter.get(view.last_idx) {
            view.last_physical += view.entry_size;
            view.last_idx += 1;
        }
        view
    }
}

impl Scratch for FilteredScratch<'_, '_> {
    fn read(&mut self, begin: u64, length: u64) -> Result<&[u8], Error> {
        if begin % self.entry_size != 0 {
            return Err(Error::InvalidState(format!(
                "filtered read at {begin} is not entry aligned"
            )));
        }
        if begin < self.last_logical {
            return Err(Error::InvalidState(
                "filtered scratch only supports a single forward pass".into(),
            ));
        }

        if begin > self.last_logical {
            // The cursor sits on a surviving entry, so advancing takes at
            // least one step on every counter before re-checking bits.
            self.last_logical += self.entry_size;
            self.last_physical += self.entry_size;
            self.last_idx += 1;

            while begin > self.last_logical {
                if self.last_idx >= self.filter.len() {
                    return Err(Error::InvalidValue(
                        "filtered read past the last surviving entry".into(),
                    ));
                }
                if self.filter.get(self.last_idx) {
                    self.last_logical += self.entry_size;
                }
                self.last_physical += self.entry_size;
                self.last_idx += 1;
            }
            while self.last_idx < self.filter.len() && !self.filter.get(self.last_idx) {
                self.last_physical += self.entry_size;
                self.last_idx += 1;
            }
        }

        if self.last_idx >= self.filter.len() {
            return Err(Error::InvalidValue(
                "filtered read past the last surviving entry".into(),
            ));
        }
        debug_assert!(self.filter.get(self.last_idx));
        debug_assert_eq!(self.last_physical, self.last_idx * self.entry_size);
        debug_assert_eq!(begin, self.last_logical);
        self.underlying.read(self.last_physical, length)
    }

    fn write(&mut self, _begin: u64, _bytes: &[u8]) -> Result<(), Error> {
        Err(Error::InvalidState(
            "write on a read-only filtered scratch".into(),
        ))
    }

    fn truncate(&mut self, new_size: u64) -> Result<(), Error> {
        self.underlying.truncate(new_size)
    }

    fn free_memory(&mut self) {
        self.underlying.free_memory();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn region_of(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn reads_equal_direct_memory_access() {
        // Larger than one read-ahead window so every branch is reachable.
        let mut region = region_of((READ_AHEAD + READ_AHEAD / 2) as usize);
        let expected = region.clone();
        let mut scratch = BufferedScratch::new(&mut region);
        // Forward scan, window hits, a slide, and a regression behind the
        // window (which must stay correct, just slow).
        let spans = [
            (0u64, 100u64),
            (50, 100),
            (100, 17),
            (READ_AHEAD - 10, 1000),
            (READ_AHEAD + 1000, 4096),
            (10, 100),
            (READ_AHEAD + 5000, 500),
        ];
        for (begin, length) in spans {
            let got = scratch.read(begin, length).unwrap();
            assert_eq!(got, &expected[begin as usize..(begin + length) as usize]);
        }
    }

    #[test]
    fn read_to_exact_end_of_region() {
        let mut region = region_of(256);
        let expected = region.clone();
        let mut scratch = BufferedScratch::new(&mut region);
        let got = scratch.read(200, 56).unwrap();
        assert_eq!(got, &expected[200..256]);
        assert!(scratch.read(200, 57).is_err());
    }

    #[test]
    fn write_flush_read_round_trip() {
        let mut region = Vec::new();
        let mut scratch = BufferedScratch::new(&mut region);
        let payload: Vec<u8> = (0..300u32).map(|i| (i % 251) as u8).collect();
        scratch.write(0, &payload[..100]).unwrap();
        scratch.write(100, &payload[100..200]).unwrap();
        scratch.write(200, &payload[200..]).unwrap();
        scratch.flush();
        assert_eq!(scratch.read(0, 300).unwrap(), &payload[..]);
    }

    #[test]
    fn non_sequential_writes_land_correctly() {
        let mut region = vec![0u8; 64];
        {
            let mut scratch = BufferedScratch::new(&mut region);
            scratch.write(32, &[1; 8]).unwrap();
            scratch.write(0, &[2; 8]).unwrap();
            scratch.write(8, &[3; 8]).unwrap();
            scratch.flush();
        }
        assert_eq!(&region[32..40], &[1; 8]);
        assert_eq!(&region[0..8], &[2; 8]);
        assert_eq!(&region[8..16], &[3; 8]);
    }

    #[test]
    fn large_write_bypasses_the_cache() {
        let big = vec![9u8; (WRITE_CACHE + 10) as usize];
        let mut region = Vec::new();
        let mut scratch = BufferedScratch::new(&mut region);
        scratch.write(5, &big).unwrap();
        assert_eq!(scratch.read(5, 100).unwrap(), &big[..100]);
    }

    #[test]
    fn truncate_flushes_first() {
        let mut region = vec![0u8; 100];
        {
            let mut scratch = BufferedScratch::new(&mut region);
            scratch.write(0, &[7; 10]).unwrap();
            scratch.truncate(10).unwrap();
        }
        assert_eq!(region, vec![7u8; 10]);
    }

    /// Reference model: the filtered view must equal the surviving entries
    /// in order.
    #[test]
    fn filtered_view_is_the_compacted_sequence() {
        let entry_size = 4u16;
        let entries: Vec<[u8; 4]> = (0..100u32).map(|i| i.to_be_bytes()).collect();
        let mut region: Vec<u8> = entries.iter().flatten().copied().collect();

        let mut filter = Bitfield::new(100);
        for i in 0..100u64 {
            if i % 3 == 0 || i % 7 == 0 {
                filter.set(i);
            }
        }
        let surviving: Vec<[u8; 4]> = (0..100u64)
            .filter(|&i| filter.get(i))
            .map(|i| entries[i as usize])
            .collect();

        let mut view = FilteredScratch::new(BufferedScratch::new(&mut region), &filter, entry_size);
        for (logical, expected) in surviving.iter().enumerate() {
            let got = read_entry(&mut view, logical as u64, entry_size).unwrap();
            assert_eq!(got, expected);
        }
        assert!(view
            .read(surviving.len() as u64 * u64::from(entry_size), 4)
            .is_err());
    }

    #[test]
    fn filtered_view_rejects_backward_and_misaligned_reads() {
        let mut region = vec![0u8; 40];
        let filter = Bitfield::all_set(10);
        let mut view = FilteredScratch::new(BufferedScratch::new(&mut region), &filter, 4);
        view.read(8, 4).unwrap();
        assert!(matches!(view.read(4, 4), Err(Error::InvalidState(_))));
        assert!(matches!(view.read(10, 4), Err(Error::InvalidState(_))));
    }

    #[test]
    fn filtered_view_rejects_writes() {
        let mut region = vec![0u8; 8];
        let filter = Bitfield::all_set(2);
        let mut view = FilteredScratch::new(BufferedScratch::new(&mut region), &filter, 4);
        assert!(matches!(view.write(0, &[0; 4]), Err(Error::InvalidState(_))));
    }
}
