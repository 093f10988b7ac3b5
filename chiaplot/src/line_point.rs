//! Combinatorial pair encoding
//!
//! A compressed table stores, per surviving entry, the two positions it
//! references in the previous table. An unordered pair of distinct values
//! below `2^n` packs into `2n` bits via the triangular pairing
//! `lp(a, b) = a(a-1)/2 + b` with `a > b`, and consecutive sorted line
//! points compress well because the encoding is monotone in `(a, b)`.

/// Encode an unordered pair of distinct values into one line point.
pub(crate) fn encode(x: u64, y: u64) -> u128 {
    debug_assert_ne!(x, y);
    let (a, b) = if x > y { (x, y) } else { (y, x) };
    let a = u128::from(a);
    a * (a - 1) / 2 + u128::from(b)
}

/// Decode a line point back into `(larger, smaller)`.
pub(crate) fn decode(line_point: u128) -> (u64, u64) {
    // a is the largest value with a(a-1)/2 <= lp.
    let mut a = isqrt(2 * line_point + 1);
    while a * (a - 1) / 2 > line_point {
        a -= 1;
    }
    while (a + 1) * a / 2 <= line_point {
        a += 1;
    }
    let b = line_point - a * (a - 1) / 2;
    (a as u64, b as u64)
}

/// Integer square root, rounded down.
fn isqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    // A float seed is within a few ulps for the 100-bit values used here;
    // the adjustment loops finish in a handful of steps.
    let mut x = (n as f64).sqrt() as u128;
    while x.checked_mul(x).map_or(true, |sq| sq > n) {
        x -= 1;
    }
    while (x + 1) * (x + 1) <= n {
        x += 1;
    }
    x
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip_small_pairs() {
        for a in 1u64..60 {
            for b in 0..a {
                let (da, db) = decode(encode(a, b));
                assert_eq!((da, db), (a, b));
            }
        }
    }

    #[test]
    fn round_trip_large_pairs() {
        let big = (1u64 << 50) - 1;
        for (a, b) in [
            (big, big - 1),
            (big, 0),
            (1u64 << 49, 12345),
            ((1 << 50) - 7, (1 << 49) + 3),
        ] {
            assert_eq!(decode(encode(a, b)), (a, b));
        }
    }

    #[test]
    fn encoding_is_order_agnostic_and_monotone() {
        assert_eq!(encode(5, 9), encode(9, 5));
        // Lexicographic order on (max, min) matches numeric order on lp.
        assert!(encode(9, 5) < encode(9, 6));
        assert!(encode(9, 8) < encode(10, 0));
    }

    #[test]
    fn isqrt_exact_at_boundaries() {
        for v in [0u128, 1, 2, 3, 4, 8, 9, 15, 16, (1 << 100) - 1, 1 << 100] {
            let r = isqrt(v);
            assert!(r * r <= v);
            assert!((r + 1) * (r + 1) > v);
        }
    }
}
