//! Plot construction entry point
//!
//! Validates the memory and bucket configuration, writes the plot header,
//! and runs the four phases in order. The caller gets back one owned byte
//! vector holding the finished plot; on any error every working buffer has
//! already been dropped with it.

use crate::constants::*;
use crate::entry_sizes::max_entry_size;
use crate::err::Error;
use crate::phase1::run_phase1;
use crate::phase2::run_phase2;
use crate::phase3::run_phase3;
use crate::phase4::run_phase4;
use std::time::Instant;
use tracing::{debug, info};

/// Phase behavior flags.
pub mod flags {
    /// Back-propagate through survivor bitfields (the only supported mode).
    pub const ENABLE_BITFIELD: u8 = 1 << 0;
}

/// Builder-style plot construction configuration.
///
/// Zero values mean "use the default": a 4608 MiB buffer, an automatic
/// bucket count, and a 65536-entry stripe.
#[derive(Debug, Clone)]
pub struct Plotter {
    /// Working-memory budget in MiB.
    buf_megabytes: u32,
    /// Requested bucket count; rounded up to a power of two when explicit.
    num_buckets: u32,
    /// Stripe length in entries for the forward-propagation scan.
    stripe_size: u64,
    /// Phase behavior flags.
    phases_flags: u8,
}

impl Default for Plotter {
    fn default() -> Self {
        Self::new()
    }
}

impl Plotter {
    /// A plotter with all defaults.
    pub fn new() -> Self {
        Self {
            buf_megabytes: 0,
            num_buckets: 0,
            stripe_size: 0,
            phases_flags: flags::ENABLE_BITFIELD,
        }
    }

    /// Set the working-memory budget in MiB (0 = default 4608).
    pub fn buf_megabytes(&mut self, megabytes: u32) -> &mut Self {
        self.buf_megabytes = megabytes;
        self
    }

    /// Set the bucket count (0 = choose from the memory budget).
    pub fn num_buckets(&mut self, buckets: u32) -> &mut Self {
        self.num_buckets = buckets;
        self
    }

    /// Set the stripe size in entries (0 = default 65536).
    pub fn stripe_size(&mut self, entries: u64) -> &mut Self {
        self.stripe_size = entries;
        self
    }

    /// Set the phase behavior flags.
    pub fn phases_flags(&mut self, phases_flags: u8) -> &mut Self {
        self.phases_flags = phases_flags;
        self
    }

    /// Build a plot for size `k` and the given 32-byte plot id.
    pub fn create_plot(&self, k: u8, id: &[u8; ID_LEN]) -> Result<Vec<u8>, Error> {
        if !(MIN_PLOT_SIZE..=MAX_PLOT_SIZE).contains(&k) {
            return Err(Error::InvalidValue(format!("plot size k={k} is invalid")));
        }
        let stripe_size = if self.stripe_size != 0 {
            self.stripe_size
        } else {
            65536
        };
        let buf_megabytes = if self.buf_megabytes != 0 {
            self.buf_megabytes
        } else {
            4608
        };
        if buf_megabytes < 10 {
            return Err(Error::InsufficientMemory(
                "provide at least 10 MiB of working memory".into(),
            ));
        }
        if self.phases_flags & flags::ENABLE_BITFIELD == 0 {
            return Err(Error::InvalidValue(
                "only bitfield back-propagation is supported".into(),
            ));
        }

        // Reserve room for the fixed allocations the phases make outside
        // the sort arena: the match window per stripe and a slice of the
        // budget for bucket caches.
        let max_entry = u64::from(max_entry_size(k));
        let thread_memory = 2 * (stripe_size + 5000) * max_entry / (1024 * 1024);
        let sub_mbytes = 5 + (f64::from(buf_megabytes) * 0.05).min(50.0) as u64 + thread_memory;
        if sub_mbytes >= u64::from(buf_megabytes) {
            return Err(Error::InsufficientMemory(format!(
                "provide more than {sub_mbytes} MiB of working memory"
            )));
        }
        let memory_size = (u64::from(buf_megabytes) - sub_mbytes) * 1024 * 1024;

        let max_table_size = (1..=7u8)
            .map(|table| {
                1.3 * (1u64 << k) as f64 * f64::from(crate::entry_sizes::entry_size(k, table))
            })
            .fold(0.0f64, f64::max);

        let num_buckets = if self.num_buckets != 0 {
            round_pow2(self.num_buckets)
        } else {
            2 * round_pow2(
                (max_table_size / (memory_size as f64 * MEM_SORT_PROPORTION)).ceil() as u32,
            )
        };
        let num_buckets = if num_buckets < MIN_BUCKETS {
            if self.num_buckets != 0 {
                return Err(Error::InvalidValue(format!(
                    "minimum bucket count is {MIN_BUCKETS}"
                )));
            }
            MIN_BUCKETS
        } else if num_buckets > MAX_BUCKETS {
            if self.num_buckets != 0 {
                return Err(Error::InvalidValue(format!(
                    "maximum bucket count is {MAX_BUCKETS}"
                )));
            }
            let required = (max_table_size / f64::from(MAX_BUCKETS)) / MEM_SORT_PROPORTION
                / (1024.0 * 1024.0)
                + sub_mbytes as f64;
            return Err(Error::InsufficientMemory(format!(
                "not enough memory for any bucket layout; need {required:.0} MiB"
            )));
        } else {
            num_buckets
        };
        let log_num_buckets = num_buckets.trailing_zeros();
        debug_assert!(num_buckets.is_power_of_two());

        if max_table_size / f64::from(num_buckets) < stripe_size as f64 * 30.0 {
            return Err(Error::InvalidValue("stripe size too large".into()));
        }

        info!(
            k,
            id = ?id,
            buf_megabytes,
            num_buckets,
            stripe_size,
            "starting plot construction"
        );

        let mut plot = Vec::new();
        let header_size = write_header(&mut plot, k, id);

        // Index 0 is working-space accounting; 1..=7 hold the tables.
        let mut tables: Vec<Vec<u8>> = vec![Vec::new(); 8];

        let timer = Instant::now();
        let phase1 = run_phase1(
            &mut tables,
            k,
            id,
            memory_size,
            num_buckets,
            log_num_buckets,
            stripe_size,
        )?;
        debug!(elapsed = ?timer.elapsed(), "phase 1 (forward propagation) done");

        let timer = Instant::now();
        let bitfields = run_phase2(&mut tables, &phase1.table_sizes, k)?;
        debug!(elapsed = ?timer.elapsed(), "phase 2 (back-propagation) done");

        let timer = Instant::now();
        let phase3 = run_phase3(
            &mut plot,
            &mut tables,
            &phase1.table_sizes,
            &bitfields,
            k,
            memory_size,
            num_buckets,
            log_num_buckets,
            stripe_size,
        )?;
        debug!(elapsed = ?timer.elapsed(), "phase 3 (compression) done");

        let timer = Instant::now();
        let mut pointers = phase3.pointers;
        run_phase4(
            &mut plot,
            &mut pointers,
            &mut tables,
            &phase1.table_sizes,
            phase3,
            k,
        )?;
        debug!(elapsed = ?timer.elapsed(), "phase 4 (checkpoints) done");

        // Fill in the pointer area reserved by the header.
        let pointer_area = header_size as usize - NUM_TABLE_POINTERS * 8;
        for (slot, pointer) in pointers[1..].iter().enumerate() {
            plot[pointer_area + slot * 8..pointer_area + slot * 8 + 8]
                .copy_from_slice(&pointer.to_be_bytes());
        }

        let working_space: u64 = phase1.table_sizes[0]
            + (1..=7)
                .map(|t| {
                    phase1.table_sizes[t] * u64::from(crate::entry_sizes::entry_size(k, t as u8))
                })
                .sum::<u64>();
        debug!(
            approximate_working_space = working_space,
            final_size = plot.len(),
            "plot construction finished"
        );
        Ok(plot)
    }
}

/// One-call construction with explicit parameters (zero means default).
pub fn create_plot(
    k: u8,
    id: &[u8; ID_LEN],
    buf_megabytes: u32,
    num_buckets: u32,
    stripe_size: u64,
) -> Result<Vec<u8>, Error> {
    Plotter::new()
        .buf_megabytes(buf_megabytes)
        .num_buckets(num_buckets)
        .stripe_size(stripe_size)
        .create_plot(k, id)
}

/// Round up to the next power of two.
fn round_pow2(value: u32) -> u32 {
    value.max(1).next_power_of_two()
}

/// Write the plot header; returns its size.
///
/// Layout: 19-byte magic, 32-byte id, the size parameter, a two-byte
/// length-prefixed format description, then the zeroed pointer area that
/// phases 3 and 4 fill in.
fn write_header(plot: &mut Vec<u8>, k: u8, id: &[u8; ID_LEN]) -> u64 {
    plot.extend_from_slice(HEADER_MAGIC);
    plot.extend_from_slice(id);
    plot.push(k);
    let description = FORMAT_DESCRIPTION.as_bytes();
    plot.extend_from_slice(&(description.len() as u16).to_be_bytes());
    plot.extend_from_slice(description);
    plot.resize(plot.len() + NUM_TABLE_POINTERS * 8, 0);
    plot.len() as u64
}
