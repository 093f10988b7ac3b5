//! Challenge lookups against a finished plot
//!
//! The prover works off the plot bytes alone. A challenge's leading `k`
//! bits select final-table entries through the checkpoint indexes: a
//! binary search over the in-memory second-level checkpoints narrows to a
//! run of first-level checkpoints, and the delta parks pinpoint every
//! entry whose hash equals the target. From there the position parks and
//! the compressed tables walk the pairing tree down to leaf `x` values,
//! either along one challenge-selected branch (a quality) or exhaustively
//! (a full proof).

use crate::constants::*;
use crate::entry_sizes::pos_bits;
use crate::err::Error;
use crate::line_point;
use crate::park;
use crate::phase4::{checkpoint_entry_bytes, delta_park_bytes, position_park_bytes};
use crate::verifier::{quality_hash, PROOF_XS};
use arrayvec::ArrayVec;
use chiafx::bits::{slice_u64, BitPacker};

/// Read-only prover over one plot's bytes.
#[derive(Debug)]
pub struct Prover<'a> {
    /// The full plot file.
    plot: &'a [u8],
    /// Plot size parameter from the header.
    k: u8,
    /// Plot id from the header.
    id: [u8; ID_LEN],
    /// Table begin pointers; slot 0 unused.
    pointers: [u64; NUM_TABLE_POINTERS + 1],
    /// Second-level checkpoints, small enough to keep decoded.
    second_checkpoints: Vec<u64>,
}

impl<'a> Prover<'a> {
    /// Parse a plot header and prepare for challenge lookups.
    pub fn new(plot: &'a [u8]) -> Result<Self, Error> {
        let magic_len = HEADER_MAGIC.len();
        if plot.len() < magic_len + ID_LEN + 3 {
            return Err(Error::InvalidValue("plot shorter than its header".into()));
        }
        if &plot[..magic_len] != HEADER_MAGIC {
            return Err(Error::InvalidValue("plot magic mismatch".into()));
        }
        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(&plot[magic_len..magic_len + ID_LEN]);
        let k = plot[magic_len + ID_LEN];
        if !(MIN_PLOT_SIZE..=MAX_PLOT_SIZE).contains(&k) {
            return Err(Error::InvalidValue(format!(
                "plot header carries unsupported size k={k}"
            )));
        }
        let description_len = usize::from(u16::from_be_bytes(
            plot[magic_len + ID_LEN + 1..magic_len + ID_LEN + 3]
                .try_into()
                .expect("two bytes"),
        ));
        let pointer_area = magic_len + ID_LEN + 3 + description_len;
        if plot.len() < pointer_area + NUM_TABLE_POINTERS * 8 {
            return Err(Error::InvalidValue("plot pointer area truncated".into()));
        }
        let mut pointers = [0u64; NUM_TABLE_POINTERS + 1];
        for slot in 0..NUM_TABLE_POINTERS {
            pointers[slot + 1] = u64::from_be_bytes(
                plot[pointer_area + slot * 8..pointer_area + slot * 8 + 8]
                    .try_into()
                    .expect("eight bytes"),
            );
        }

        let mut prover = Self {
            plot,
            k,
            id,
            pointers,
            second_checkpoints: Vec::new(),
        };
        let entry_bytes = checkpoint_entry_bytes(k);
        let second_count = (prover.pointers[10] - prover.pointers[9]) / entry_bytes;
        for i in 0..second_count {
            let bytes = prover.bytes_at(prover.pointers[9] + i * entry_bytes, entry_bytes)?;
            let checkpoint = slice_u64(bytes, 0, u32::from(k));
            prover.second_checkpoints.push(checkpoint);
        }
        Ok(prover)
    }

    /// Plot size parameter.
    pub fn k(&self) -> u8 {
        self.k
    }

    /// Plot id.
    pub fn id(&self) -> &[u8; ID_LEN] {
        &self.id
    }

    /// Quality strings of every final-table entry matching `challenge`.
    ///
    /// The order is stable: qualities line up with the proof indexes
    /// accepted by [`Prover::get_full_proof`].
    pub fn get_qualities_for_challenge(
        &self,
        challenge: &[u8; 32],
    ) -> Result<Vec<[u8; 32]>, Error> {
        let target = slice_u64(challenge, 0, u32::from(self.k));
        let branch_bits = challenge[31] & 0x1f;
        let mut qualities = Vec::new();
        for entry_index in self.matching_entries(target)? {
            let mut position = self.final_table_position(entry_index)?;
            for table in (2..=6u8).rev() {
                let (larger, smaller) = self.pair_at(table, position)?;
                position = if (branch_bits >> (table - 2)) & 1 == 0 {
                    smaller
                } else {
                    larger
                };
            }
            let (larger, smaller) = self.pair_at(1, position)?;
            qualities.push(quality_hash(challenge, self.k, smaller, larger));
        }
        Ok(qualities)
    }

    /// The full proof at `index` among the challenge's matching entries.
    pub fn get_full_proof(&self, challenge: &[u8; 32], index: usize) -> Result<Vec<u8>, Error> {
        let target = slice_u64(challenge, 0, u32::from(self.k));
        let matches = self.matching_entries(target)?;
        let entry_index = *matches.get(index).ok_or_else(|| {
            Error::InvalidValue(format!("no proof at index {index} for this challenge"))
        })?;
        let position = self.final_table_position(entry_index)?;
        let mut xs: ArrayVec<u64, PROOF_XS> = ArrayVec::new();
        self.gather_leaves(6, position, &mut xs)?;

        let mut packer = BitPacker::new();
        for &x in &xs {
            packer.push(u128::from(x), u32::from(self.k));
        }
        Ok(packer.bytes_padded(usize::from(self.k) * 8).to_vec())
    }

    /// Collect the leaf `x` values under `position` of `table`, in plot
    /// order (smaller-position subtree first).
    fn gather_leaves(
        &self,
        table: u8,
        position: u64,
        out: &mut ArrayVec<u64, PROOF_XS>,
    ) -> Result<(), Error> {
        let (larger, smaller) = self.pair_at(table, position)?;
        if table == 1 {
            out.push(smaller);
            out.push(larger);
            return Ok(());
        }
        self.gather_leaves(table - 1, smaller, out)?;
        self.gather_leaves(table - 1, larger, out)
    }

    /// Decode the pair referenced by `position` of compressed `table`.
    fn pair_at(&self, table: u8, position: u64) -> Result<(u64, u64), Error> {
        let line_point = park::read_line_point(
            self.plot,
            self.pointers[usize::from(table)],
            self.k,
            position,
        )?;
        Ok(line_point::decode(line_point))
    }

    /// Final-table park lookup: entry index → position in the last
    /// compressed table.
    fn final_table_position(&self, entry_index: u64) -> Result<u64, Error> {
        let park = entry_index / ENTRIES_PER_PARK as u64;
        let slot = entry_index % ENTRIES_PER_PARK as u64;
        let park_bytes = position_park_bytes(self.k);
        let base = self.pointers[7] + park * park_bytes;
        let bytes = self.bytes_at(base, park_bytes)?;
        let width = pos_bits(self.k);
        Ok(slice_u64(bytes, slot * u64::from(width), width))
    }

    /// Indexes of every final-table entry whose hash equals `target`,
    /// ascending.
    fn matching_entries(&self, target: u64) -> Result<Vec<u64>, Error> {
        let entry_bytes = checkpoint_entry_bytes(self.k);
        let first_count = (self.pointers[9] - self.pointers[8]) / entry_bytes;
        if first_count == 0 {
            return Ok(Vec::new());
        }

        // Narrow to one second-level interval, widened by one first-level
        // park since an equal run can cross the interval boundary.
        let second_index = self
            .second_checkpoints
            .partition_point(|&hash| hash <= target)
            .saturating_sub(1);
        let first_lo = (second_index * CHECKPOINT_2_INTERVAL).saturating_sub(1) as u64;
        let first_hi =
            ((second_index + 1) * CHECKPOINT_2_INTERVAL + 1).min(first_count as usize) as u64;

        let mut matches = Vec::new();
        for park in first_lo..first_hi {
            let first = self.first_checkpoint(park)?;
            if first > target {
                break;
            }
            let next_first = if park + 1 < first_count {
                Some(self.first_checkpoint(park + 1)?)
            } else {
                None
            };
            if let Some(next) = next_first {
                if next < target {
                    continue;
                }
            }
            self.scan_delta_park(park, first, target, &mut matches)?;
        }
        Ok(matches)
    }

    /// First-level checkpoint hash of `park`.
    fn first_checkpoint(&self, park: u64) -> Result<u64, Error> {
        let entry_bytes = checkpoint_entry_bytes(self.k);
        let bytes = self.bytes_at(self.pointers[8] + park * entry_bytes, entry_bytes)?;
        Ok(slice_u64(bytes, 0, u32::from(self.k)))
    }

    /// Walk one delta park accumulating hashes, collecting indexes whose
    /// hash equals `target`.
    fn scan_delta_park(
        &self,
        park: u64,
        first_hash: u64,
        target: u64,
        matches: &mut Vec<u64>,
    ) -> Result<(), Error> {
        let base = self.pointers[10] + park * delta_park_bytes();
        let bytes = self.bytes_at(base, delta_park_bytes())?;
        let count = usize::from(u16::from_be_bytes(
            bytes[..2].try_into().expect("two bytes"),
        ));
        if count > CHECKPOINT_1_INTERVAL - 1 {
            return Err(Error::InvalidValue("delta park count out of range".into()));
        }

        let mut hash = first_hash;
        let mut entry_index = park * CHECKPOINT_1_INTERVAL as u64;
        if hash == target {
            matches.push(entry_index);
        }
        for &delta in &bytes[2..2 + count] {
            hash += u64::from(delta);
            entry_index += 1;
            if hash > target {
                break;
            }
            if hash == target {
                matches.push(entry_index);
            }
        }
        Ok(())
    }

    /// Bounds-checked plot slice.
    fn bytes_at(&self, offset: u64, length: u64) -> Result<&[u8], Error> {
        let end = offset
            .checked_add(length)
            .ok_or_else(|| Error::InvalidValue("plot offset overflow".into()))?;
        self.plot
            .get(offset as usize..end as usize)
            .ok_or_else(|| Error::InvalidValue("plot read past end of file".into()))
    }
}
