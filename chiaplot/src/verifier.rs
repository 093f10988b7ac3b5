//! Stateless proof verification
//!
//! A proof is the 64 leaf `x` values of one entry of the final table,
//! bit-packed in plot order. Verification rebuilds the pairing tree from
//! scratch: hash every leaf, then fold adjacent pairs upward, checking the
//! match rule at every node and recomputing the table functions, until a
//! single hash remains to compare against the challenge. Nothing from the
//! plot itself is needed, only the plot id.
//!
//! Plot order does not record which side of a pair was the match rule's
//! left: the rule itself does, since exactly one orientation can place the
//! buckets adjacently. The quality string is derived from the same
//! canonical plot ordering the prover reads off the plot, reconstructed
//! here from leaf values alone.

use arrayvec::ArrayVec;
use chiafx::bits::{slice_u64, BitPacker};
use chiafx::matching::is_match;
use chiafx::{F1Calculator, FxCalculator, Metadata, EXTRA_BITS};
use std::cmp::Ordering;

/// Leaves in one proof.
pub(crate) const PROOF_XS: usize = 64;

/// Validate `proof` against a challenge, returning its quality string.
///
/// `None` means the proof is malformed or does not satisfy the plot's
/// pairing constraints for this challenge.
pub fn validate_proof(
    id: &[u8; 32],
    k: u8,
    challenge: &[u8; 32],
    proof: &[u8],
) -> Option<[u8; 32]> {
    if proof.len() != usize::from(k) * 8 {
        return None;
    }
    let mut xs: ArrayVec<u64, PROOF_XS> = ArrayVec::new();
    for i in 0..PROOF_XS {
        xs.push(slice_u64(proof, i as u64 * u64::from(k), u32::from(k)));
    }

    let mut f1 = F1Calculator::new(k, id);
    let mut ys: ArrayVec<u64, PROOF_XS> = ArrayVec::new();
    let mut metas: ArrayVec<Metadata, PROOF_XS> = ArrayVec::new();
    for &x in &xs {
        ys.push(f1.calculate_f1(x));
        metas.push(Metadata::from_u64(x, u32::from(k)));
    }

    for table in 2..=7u8 {
        let mut fx = FxCalculator::new(k, table);
        let mut next_ys: ArrayVec<u64, PROOF_XS> = ArrayVec::new();
        let mut next_metas: ArrayVec<Metadata, PROOF_XS> = ArrayVec::new();
        for i in (0..ys.len()).step_by(2) {
            // Exactly one orientation can satisfy the adjacency rule.
            let (left, right) = if is_match(ys[i], ys[i + 1]) {
                (i, i + 1)
            } else if is_match(ys[i + 1], ys[i]) {
                (i + 1, i)
            } else {
                return None;
            };
            let (y, meta) = fx.calculate_fn(ys[left], &metas[left], &metas[right]);
            next_ys.push(y);
            next_metas.push(meta);
        }
        ys = next_ys;
        metas = next_metas;
    }

    let target = slice_u64(challenge, 0, u32::from(k));
    if ys[0] >> EXTRA_BITS != target {
        return None;
    }

    let mut ordered = xs;
    to_plot_order(&mut ordered);
    let pair_index = usize::from(challenge[31] & 0x1f);
    Some(quality_hash(
        challenge,
        k,
        ordered[2 * pair_index],
        ordered[2 * pair_index + 1],
    ))
}

/// Quality string of one challenge and its selected leaf pair.
pub(crate) fn quality_hash(challenge: &[u8; 32], k: u8, first_x: u64, second_x: u64) -> [u8; 32] {
    let mut packer = BitPacker::new();
    packer.push(u128::from(first_x), u32::from(k));
    packer.push(u128::from(second_x), u32::from(k));
    let mut hasher = blake3::Hasher::new();
    hasher.update(challenge);
    hasher.update(packer.as_bytes());
    hasher.finalize().into()
}

/// Compare two equally sized, already canonicalized subtrees by the order
/// their entries take in a compressed table.
///
/// An entry's position is its line point's sorted rank, and the line point
/// encoding is monotone in (larger child, smaller child); after
/// canonicalization the larger child is the second half, so the comparison
/// walks second halves before first halves down to the leaves.
fn cmp_subtree(a: &[u64], b: &[u64]) -> Ordering {
    if a.len() == 1 {
        return a[0].cmp(&b[0]);
    }
    let half = a.len() / 2;
    cmp_subtree(&a[half..], &b[half..]).then_with(|| cmp_subtree(&a[..half], &b[..half]))
}

/// Reorder a leaf array in place into plot order: at every node the
/// smaller-position subtree comes first.
pub(crate) fn to_plot_order(xs: &mut [u64]) {
    if xs.len() == 2 {
        if xs[0] > xs[1] {
            xs.swap(0, 1);
        }
        return;
    }
    let half = xs.len() / 2;
    let (first, second) = xs.split_at_mut(half);
    to_plot_order(first);
    to_plot_order(second);
    if cmp_subtree(first, second) == Ordering::Greater {
        first.swap_with_slice(second);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plot_order_is_idempotent_and_sorts_each_node() {
        let mut xs: Vec<u64> = (0..64u64).map(|i| (i * 2654435761) % 100003).collect();
        to_plot_order(&mut xs);
        let once = xs.clone();
        to_plot_order(&mut xs);
        assert_eq!(xs, once);
        for pair in xs.chunks(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn plot_order_ignores_input_permutation_of_siblings() {
        let mut a: Vec<u64> = (0..64u64).map(|i| i * 31 % 977).collect();
        let mut b = a.clone();
        // Swap a few sibling pairs and second-level branches.
        b.swap(0, 1);
        b.swap(6, 7);
        let (x, y) = b.split_at_mut(32);
        x.swap_with_slice(y);
        to_plot_order(&mut a);
        to_plot_order(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn wrong_length_proofs_are_rejected() {
        let id = [1u8; 32];
        let challenge = [2u8; 32];
        assert!(validate_proof(&id, 17, &challenge, &[0u8; 10]).is_none());
        // A right-sized but arbitrary proof fails the match rule.
        assert!(validate_proof(&id, 17, &challenge, &[0u8; 17 * 8]).is_none());
    }
}
