//! Fixed-size park encoding of sorted line points
//!
//! Compressed tables are arrays of parks, each covering a fixed run of
//! entries so position lookups need no index: `park = position / EPP`.
//! Within a park the first line point is stored whole as a checkpoint;
//! every later entry is a delta against its predecessor, split into a
//! low-bits stub of `k - STUB_MINUS_BITS` bits and a high-bits byte. Sorted
//! line points over a `2k`-bit space leave average deltas near `2^k`, so
//! the high byte is small on average and a single byte bounds it; a delta
//! that cannot fit fails the plot rather than corrupting it.

use crate::constants::{ENTRIES_PER_PARK, STUB_MINUS_BITS};
use crate::err::Error;
use chiafx::bits::{slice_u128, slice_u64, BitPacker};

/// Byte width of the checkpoint line point.
pub(crate) fn checkpoint_bytes(k: u8) -> u64 {
    u64::from((2 * u32::from(k) + 7) / 8)
}

/// Width in bits of one delta stub.
fn stub_bits(k: u8) -> u32 {
    u32::from(k) - STUB_MINUS_BITS
}

/// Byte width of the stub section.
pub(crate) fn stubs_bytes(k: u8) -> u64 {
    u64::from(((ENTRIES_PER_PARK as u32 - 1) * stub_bits(k) + 7) / 8)
}

/// Total byte width of one park.
pub(crate) fn park_size(k: u8) -> u64 {
    checkpoint_bytes(k) + stubs_bytes(k) + (ENTRIES_PER_PARK as u64 - 1)
}

/// Append one park holding `line_points` (sorted ascending, at most one
/// park's worth; a final short park is zero-padded).
pub(crate) fn write_park(out: &mut Vec<u8>, k: u8, line_points: &[u128]) -> Result<(), Error> {
    debug_assert!(!line_points.is_empty());
    debug_assert!(line_points.len() <= ENTRIES_PER_PARK);

    let mut packer = BitPacker::new();
    packer.push(line_points[0], 2 * u32::from(k));
    out.extend_from_slice(packer.bytes_padded(checkpoint_bytes(k) as usize));

    let stub_width = stub_bits(k);
    let mut stubs = BitPacker::new();
    let mut high_bytes = vec![0u8; ENTRIES_PER_PARK - 1];
    for (i, pair) in line_points.windows(2).enumerate() {
        let delta = pair[1] - pair[0];
        let stub = delta & ((1u128 << stub_width) - 1);
        let high = delta >> stub_width;
        if high > 0xff {
            return Err(Error::InvalidValue(format!(
                "line point delta {delta} exceeds the park delta budget"
            )));
        }
        stubs.push(stub, stub_width);
        high_bytes[i] = high as u8;
    }
    out.extend_from_slice(stubs.bytes_padded(stubs_bytes(k) as usize));
    out.extend_from_slice(&high_bytes);
    Ok(())
}

/// Read the line point at `index` of the table whose parks begin at
/// `table_start`.
pub(crate) fn read_line_point(
    plot: &[u8],
    table_start: u64,
    k: u8,
    index: u64,
) -> Result<u128, Error> {
    let park = index / ENTRIES_PER_PARK as u64;
    let slot = (index % ENTRIES_PER_PARK as u64) as usize;
    let base = (table_start + park * park_size(k)) as usize;
    if base + park_size(k) as usize > plot.len() {
        return Err(Error::InvalidValue(format!(
            "park for entry {index} lies past the end of the plot"
        )));
    }

    let mut line_point = slice_u128(&plot[base..], 0, 2 * u32::from(k));
    let stub_width = stub_bits(k);
    let stubs_base = base + checkpoint_bytes(k) as usize;
    let highs_base = stubs_base + stubs_bytes(k) as usize;
    for i in 0..slot {
        let stub = slice_u64(
            &plot[stubs_base..highs_base],
            i as u64 * u64::from(stub_width),
            stub_width,
        );
        let high = plot[highs_base + i];
        line_point += (u128::from(high) << stub_width) + u128::from(stub);
    }
    Ok(line_point)
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn random_access_over_several_parks(){
        let k = 17u8;
        let mut rng = rand::rngs::StdRng::seed_from_u64(23);
        let n = ENTRIES_PER_PARK * 2 + 700;
        let mut line_points: Vec<u128> = (0..n)
            .map(|_| u128::from(rng.gen::<u64>() % (1u64 << (2 * k as u32 - 5))))
            .collect();
        line_points.sort_unstable();
        line_points.dedup();

        let mut plot = vec![0u8; 37]; // arbitrary leading content
        let table_start = plot.len() as u64;
        for chunk in line_points.chunks(ENTRIES_PER_PARK) {
            write_park(&mut plot, k, chunk).unwrap();
        }

        for &i in &[0usize, 1, 100, ENTRIES_PER_PARK - 1, ENTRIES_PER_PARK, n - 700, line_points.len() - 1] {
            assert_eq!(
                read_line_point(&plot, table_start, k, i as u64).unwrap(),
                line_points[i],
                "index {i}"
            );
        }
    }

    #[test]
    fn short_final_park_reads_back() {
        let k = 15u8;
        let line_points: Vec<u128> = (0..5u128).map(|i| i * 1000 + 3).collect();
        let mut plot = Vec::new();
        write_park(&mut plot, k, &line_points).unwrap();
        assert_eq!(plot.len() as u64, park_size(k));
        for (i, &lp) in line_points.iter().enumerate() {
            assert_eq!(read_line_point(&plot, 0, k, i as u64).unwrap(), lp);
        }
    }

    #[test]
    fn oversized_delta_is_rejected() {
        let k = 15u8;
        let huge_gap = vec![0u128, 1u128 << (2 * k as u32 - 1)];
        let mut plot = Vec::new();
        assert!(matches!(
            write_park(&mut plot, k, &huge_gap),
            Err(Error::InvalidValue(_))
        ));
    }
}
