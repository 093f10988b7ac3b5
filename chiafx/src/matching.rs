//! The kBC match rule between adjacent y-buckets
//!
//! Entries of one table are grouped by `bucket = y / PARAM_BC`. Only entries
//! in adjacent buckets can pair, and within an adjacent pair the rule is a
//! pair of congruences over the `(b, c)` decomposition of `y mod PARAM_BC`:
//! for some `m < EXTRA_BITS_POW`,
//!
//! ```text
//! r_b ≡ l_b + m                     (mod PARAM_B)
//! r_c ≡ l_c + (2m + parity)²        (mod PARAM_C)
//! ```
//!
//! where `parity` is the left bucket's parity. The constants derive from the
//! proof-of-space paper's matching window and are not tunable.
//!
//! [`Matcher`] finds all matches between two bucket groups using a reverse
//! map over the right group, the bounded-memory structure the table joins
//! rely on; [`is_match`] checks a single candidate pair, which is all a
//! proof verifier needs.

use crate::{EXTRA_BITS_POW, PARAM_B, PARAM_BC, PARAM_C};

/// One slot of the reverse map: where entries with a given `y mod PARAM_BC`
/// start in the right-hand group, and how many there are.
///
/// Groups are sorted by `y`, so equal values are always consecutive and a
/// (start, count) pair is enough.
#[derive(Clone, Copy, Default)]
struct RmapSlot {
    /// Index of the first right-group entry with this residue.
    start: u16,
    /// Number of consecutive entries with this residue.
    count: u16,
}

/// Reusable state for matching one pair of adjacent bucket groups.
///
/// The reverse map covers all `PARAM_BC` residues; the dirty list lets it be
/// cleared in time proportional to the previous group's size instead of the
/// map's.
pub struct Matcher {
    /// Residue → (start, count) over the current right group.
    rmap: Vec<RmapSlot>,
    /// Residues touched by the current right group.
    dirty: Vec<u16>,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher {
    /// Allocate a matcher; the backing map is sized once and reused.
    pub fn new() -> Self {
        Self {
            rmap: vec![RmapSlot::default(); PARAM_BC as usize],
            dirty: Vec::new(),
        }
    }

    /// Find all matches between a left and an adjacent right bucket group.
    ///
    /// `left_ys` and `right_ys` are the `y mod PARAM_BC` residues of the two
    /// groups, each sorted ascending; `parity` is the left bucket's parity.
    /// Matches are appended to `out` as `(left_index, right_index)` pairs,
    /// ordered by left index.
    pub fn find_matches(
        &mut self,
        left_ys: &[u64],
        right_ys: &[u64],
        parity: u64,
        out: &mut Vec<(u16, u16)>,
    ) {
        debug_assert!(left_ys.len() < usize::from(u16::MAX));
        debug_assert!(right_ys.len() < usize::from(u16::MAX));

        for &residue in &self.dirty {
            self.rmap[usize::from(residue)] = RmapSlot::default();
        }
        self.dirty.clear();

        for (i, &ry) in right_ys.iter().enumerate() {
            let slot = &mut self.rmap[ry as usize];
            if slot.count == 0 {
                slot.start = i as u16;
                self.dirty.push(ry as u16);
            }
            slot.count += 1;
        }

        for (l_idx, &ly) in left_ys.iter().enumerate() {
            let l_b = ly / PARAM_C;
            let l_c = ly % PARAM_C;
            for m in 0..EXTRA_BITS_POW {
                let target_b = (l_b + m) % PARAM_B;
                let shift = 2 * m + parity;
                let target_c = (l_c + shift * shift) % PARAM_C;
                let slot = self.rmap[(target_b * PARAM_C + target_c) as usize];
                for j in 0..slot.count {
                    out.push((l_idx as u16, slot.start + j));
                }
            }
        }
    }
}

/// Check whether a single `(y_left, y_right)` pair satisfies the match rule.
pub fn is_match(y_left: u64, y_right: u64) -> bool {
    let bucket_left = y_left / PARAM_BC;
    if y_right / PARAM_BC != bucket_left + 1 {
        return false;
    }
    let l_mod = y_left % PARAM_BC;
    let r_mod = y_right % PARAM_BC;
    let (l_b, l_c) = (l_mod / PARAM_C, l_mod % PARAM_C);
    let (r_b, r_c) = (r_mod / PARAM_C, r_mod % PARAM_C);

    // The b congruence pins m uniquely because PARAM_B exceeds the m range.
    let m = (r_b + PARAM_B - l_b) % PARAM_B;
    if m >= EXTRA_BITS_POW {
        return false;
    }
    let shift = 2 * m + bucket_left % 2;
    r_c == (l_c + shift * shift) % PARAM_C
}

#[cfg(test)]
mod test {
    use super::*;

    /// Brute-force reference for one candidate pair.
    fn is_match_slow(y_left: u64, y_right: u64) -> bool {
        if y_right / PARAM_BC != y_left / PARAM_BC + 1 {
            return false;
        }
        let parity = (y_left / PARAM_BC) % 2;
        let (l_b, l_c) = ((y_left % PARAM_BC) / PARAM_C, y_left % PARAM_C);
        let (r_b, r_c) = ((y_right % PARAM_BC) / PARAM_C, y_right % PARAM_C);
        (0..EXTRA_BITS_POW).any(|m| {
            let shift = 2 * m + parity;
            r_b == (l_b + m) % PARAM_B && r_c == (l_c + shift * shift) % PARAM_C
        })
    }

    #[test]
    fn direct_check_matches_brute_force() {
        // A deterministic scatter of candidate pairs across bucket space.
        let mut state = 0x12345u64;
        for _ in 0..20_000 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let y_left = state % (PARAM_BC * 8);
            let y_right = (state >> 17) % (PARAM_BC * 10);
            assert_eq!(is_match(y_left, y_right), is_match_slow(y_left, y_right));
        }
    }

    #[test]
    fn matcher_agrees_with_direct_check() {
        let bucket = 6u64;
        let base_l = bucket * PARAM_BC;
        let base_r = (bucket + 1) * PARAM_BC;
        // Sorted residues with duplicates on the right side.
        let left: Vec<u64> = (0..400).map(|i| (i * 37) % PARAM_BC).collect();
        let mut left = left;
        left.sort_unstable();
        let mut right: Vec<u64> = (0..400).map(|i| (i * 53) % PARAM_BC).collect();
        right.push(right[7]);
        right.sort_unstable();

        let mut out = Vec::new();
        let mut matcher = Matcher::new();
        matcher.find_matches(&left, &right, bucket % 2, &mut out);

        let mut expected = Vec::new();
        for (li, &ly) in left.iter().enumerate() {
            for (ri, &ry) in right.iter().enumerate() {
                if is_match(base_l + ly, base_r + ry) {
                    expected.push((li as u16, ri as u16));
                }
            }
        }
        out.sort_unstable();
        expected.sort_unstable();
        assert_eq!(out, expected);
    }

    #[test]
    fn non_adjacent_buckets_never_match() {
        assert!(!is_match(0, 0));
        assert!(!is_match(PARAM_BC * 2, PARAM_BC));
        assert!(!is_match(0, PARAM_BC * 2));
    }

    #[test]
    fn matcher_reuse_is_clean() {
        let mut matcher = Matcher::new();
        let mut out = Vec::new();
        matcher.find_matches(&[0, 1, 2], &[5, 6, 7], 0, &mut out);
        let first = out.len();
        out.clear();
        // A second run over empty groups must see a cleared reverse map.
        matcher.find_matches(&[0, 1, 2], &[], 0, &mut out);
        assert!(out.is_empty());
        out.clear();
        matcher.find_matches(&[0, 1, 2], &[5, 6, 7], 0, &mut out);
        assert_eq!(out.len(), first);
    }
}
