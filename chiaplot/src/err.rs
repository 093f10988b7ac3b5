//! Error types for the `chiaplot` crate

/// Errors surfaced while building or reading a plot
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A parameter or operand is outside its valid domain.
    ///
    /// Covers plot sizes outside the supported range, explicitly requested
    /// bucket counts outside their bounds, stripe sizes too large for the
    /// chosen bucket layout, a cleared bitfield flag, and malformed plot
    /// bytes handed to the prover. Earlier implementations also refused
    /// bitfield plotting here on CPUs without a POPCNT instruction; the
    /// bit counting used for survivor ranks is portable in Rust, so that
    /// condition no longer exists.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The configured memory budget cannot hold the working set.
    ///
    /// Raised up front when the buffer budget does not cover the fixed
    /// overheads, and during sorting when one bucket outgrows the in-memory
    /// sort arena.
    #[error("insufficient memory: {0}")]
    InsufficientMemory(String),

    /// An operation was invoked in a phase that does not permit it.
    ///
    /// Writing through a read-only view, adding entries to a sort that has
    /// begun draining, and partial truncation of a sort manager all land
    /// here. These indicate a sequencing bug in the caller rather than a
    /// recoverable condition.
    #[error("invalid state: {0}")]
    InvalidState(String),
}
