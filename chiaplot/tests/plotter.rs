//! Plotter parameter validation and end-to-end format checks

use chiaplot::constants::{HEADER_MAGIC, MAX_BUCKETS, MIN_BUCKETS};
use chiaplot::{create_plot, Error, Plotter};

const PLOT_ID: [u8; 32] = [
    35, 2, 52, 4, 51, 55, 23, 84, 91, 10, 111, 12, 13, 222, 151, 16, 228, 211, 254, 45, 92, 198,
    204, 10, 9, 10, 11, 129, 139, 171, 15, 23,
];

#[test]
fn rejects_out_of_range_k() {
    assert!(matches!(
        create_plot(10, &PLOT_ID, 11, 0, 2000),
        Err(Error::InvalidValue(_))
    ));
    assert!(matches!(
        create_plot(60, &PLOT_ID, 11, 0, 2000),
        Err(Error::InvalidValue(_))
    ));
}

#[test]
fn rejects_explicit_bucket_counts_out_of_bounds() {
    assert!(matches!(
        create_plot(17, &PLOT_ID, 11, MIN_BUCKETS / 4, 2000),
        Err(Error::InvalidValue(_))
    ));
    assert!(matches!(
        create_plot(17, &PLOT_ID, 11, MAX_BUCKETS * 2, 2000),
        Err(Error::InvalidValue(_))
    ));
}

#[test]
fn rejects_budget_equal_to_fixed_overheads() {
    // A stripe this long pushes the fixed overhead to exactly 10 MiB.
    assert!(matches!(
        create_plot(17, &PLOT_ID, 10, 0, 170_000),
        Err(Error::InsufficientMemory(_))
    ));
}

#[test]
fn rejects_tiny_budget() {
    assert!(matches!(
        create_plot(17, &PLOT_ID, 9, 0, 2000),
        Err(Error::InsufficientMemory(_))
    ));
}

#[test]
fn rejects_oversized_stripe() {
    assert!(matches!(
        create_plot(17, &PLOT_ID, 11, 0, 100_000),
        Err(Error::InvalidValue(_))
    ));
}

#[test]
fn rejects_disabling_the_bitfield() {
    let result = Plotter::new()
        .buf_megabytes(11)
        .stripe_size(2000)
        .phases_flags(0)
        .create_plot(17, &PLOT_ID);
    assert!(matches!(result, Err(Error::InvalidValue(_))));
}

#[test]
fn produced_plots_are_deterministic_with_valid_headers() {
    let first = create_plot(17, &PLOT_ID, 11, 0, 2000).unwrap();
    let second = create_plot(17, &PLOT_ID, 11, 0, 2000).unwrap();
    assert_eq!(first, second);

    assert!(!first.is_empty());
    assert_eq!(&first[..19], HEADER_MAGIC);
    assert_eq!(&first[19..51], &PLOT_ID);
    assert_eq!(first[51], 17);

    // All ten table pointers must be filled, ordered, and in bounds.
    let description_len = usize::from(u16::from_be_bytes([first[52], first[53]]));
    let pointer_area = 54 + description_len;
    let pointers: Vec<u64> = (0..10)
        .map(|slot| {
            u64::from_be_bytes(
                first[pointer_area + slot * 8..pointer_area + slot * 8 + 8]
                    .try_into()
                    .unwrap(),
            )
        })
        .collect();
    for pair in pointers.windows(2) {
        assert!(pair[0] < pair[1], "pointers out of order: {pointers:?}");
    }
    assert!(pointers[0] as usize >= pointer_area + 80);
    assert!((pointers[9] as usize) < first.len());
}

#[test]
fn different_ids_give_different_plots() {
    let mut other_id = PLOT_ID;
    other_id[0] ^= 0xff;
    let first = create_plot(17, &PLOT_ID, 11, 0, 2000).unwrap();
    let second = create_plot(17, &other_id, 11, 0, 2000).unwrap();
    assert_ne!(first, second);
}
