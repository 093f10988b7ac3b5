//! Bounded-memory plot construction for a Chia-style proof of space.
//!
//! A plot is a persistent table structure answering arbitrary 32-byte
//! challenges with proofs that are cheap to verify. The hard part is not
//! the proof format but building the tables: billions of fixed-width
//! bit-packed entries are generated, joined, back-propagated and
//! compressed in four phases, using a fixed memory budget and large
//! in-memory scratch regions, while preserving sort order by specific bit
//! ranges throughout.
//!
//! The public surface is small: [`Plotter`] (or [`create_plot`]) turns a
//! size parameter and a 32-byte id into an owned plot byte vector,
//! [`Prover`] answers challenges against those bytes, and
//! [`validate_proof`] checks a proof with nothing but the id. The
//! machinery underneath — the external sort manager, the buffered and
//! filtered scratch views, the survivor bitfields and the park coders —
//! stays private to this crate.

#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![warn(clippy::all)]
#![allow(clippy::uninlined_format_args)]

mod bitfield;
pub mod constants;
mod entry_sizes;
mod err;
mod line_point;
mod park;
mod phase1;
mod phase2;
mod phase3;
mod phase4;
mod plotter;
mod prover;
mod scratch;
mod sort_manager;
mod uniform_sort;
mod verifier;

pub use err::Error;
pub use plotter::{create_plot, flags, Plotter};
pub use prover::Prover;
pub use verifier::validate_proof;
