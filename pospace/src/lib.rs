//! Seed-keyed proof-of-space tables
//!
//! A thin, fixed-parameter surface over the `chiaplot` engine: generate a
//! table set from a 32-byte seed, look up the quality of a proof at a
//! challenge index, create the full proof for a quality, and check a proof
//! against the seed alone. Challenge indexes stand in for full challenges
//! the way the consumer protocol uses them: the index's little-endian
//! bytes, zero-extended to 32.

#![warn(rust_2018_idioms, missing_debug_implementations, missing_docs)]

use chiaplot::{validate_proof, Prover};

pub use chiaplot::Error;

/// Plot size parameter all tables use.
pub const K: u8 = 17;

/// Working-memory budget for table generation, in MiB.
const BUF_MEGABYTES: u32 = 11;

/// Stripe length for table generation, in entries.
const STRIPE_SIZE: u64 = 2000;

/// Bytes in a proof at size [`K`].
pub const PROOF_LEN: usize = K as usize * 8;

/// Build the 32-byte challenge a challenge index denotes.
fn challenge_for(challenge_index: u32) -> [u8; 32] {
    let mut challenge = [0u8; 32];
    challenge[..4].copy_from_slice(&challenge_index.to_le_bytes());
    challenge
}

/// Quality of one solution in the table
///
/// Holding a `Quality` proves the lookup succeeded, so proof creation
/// cannot fail afterwards.
#[derive(Debug)]
pub struct Quality<'a> {
    /// Quality string bytes.
    bytes: [u8; 32],
    /// Challenge index the quality answers.
    challenge_index: u32,
    /// Position among the challenge's matching proofs.
    quality_index: usize,
    /// The table the quality was found in.
    table: &'a Table,
}

impl Quality<'_> {
    /// Get underlying bytes representation of the quality
    pub fn to_bytes(&self) -> [u8; 32] {
        self.bytes
    }

    /// Create proof for this solution
    pub fn create_proof(&self) -> [u8; PROOF_LEN] {
        let prover = Prover::new(&self.table.plot)
            .expect("table was produced by the plotter; header is valid");
        let proof = prover
            .get_full_proof(&challenge_for(self.challenge_index), self.quality_index)
            .expect("quality exists, so its proof does too");
        proof
            .try_into()
            .expect("proofs at a fixed k have a fixed length")
    }
}

/// Data structure essentially representing a plot's table set
#[derive(Debug)]
pub struct Table {
    /// The finished plot bytes.
    plot: Vec<u8>,
}

impl Table {
    /// Generate new table with 32 bytes seed
    pub fn generate(seed: &[u8; 32]) -> Result<Self, Error> {
        let plot = chiaplot::create_plot(K, seed, BUF_MEGABYTES, 0, STRIPE_SIZE)?;
        Ok(Self { plot })
    }

    /// Try to find quality of the proof at `challenge_index` if proof exists
    pub fn find_quality(&self, challenge_index: u32) -> Option<Quality<'_>> {
        let prover = Prover::new(&self.plot).ok()?;
        let qualities = prover
            .get_qualities_for_challenge(&challenge_for(challenge_index))
            .ok()?;
        qualities.first().map(|&bytes| Quality {
            bytes,
            challenge_index,
            quality_index: 0,
            table: self,
        })
    }

    /// The raw plot bytes backing this table.
    pub fn as_bytes(&self) -> &[u8] {
        &self.plot
    }
}

/// Check whether proof created earlier is valid
///
/// Validity means the verifier derives a non-empty quality from the proof;
/// which quality index produced the proof does not participate.
pub fn is_proof_valid(seed: &[u8; 32], challenge_index: u32, proof: &[u8; PROOF_LEN]) -> bool {
    validate_proof(seed, K, &challenge_for(challenge_index), proof).is_some()
}
