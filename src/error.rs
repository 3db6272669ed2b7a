//! Typed failures of the construction pipeline.
//!
//! Functions return `anyhow::Result`; these variants are what ends up inside
//! the `anyhow::Error` when a run fails for a reason other than plain I/O, so
//! callers and tests can `downcast_ref::<BwtError>()`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BwtError {
    #[error("input file {0} is empty")]
    EmptyInput(String),

    #[error("cannot read input file {path}: {reason}")]
    UnreadableInput { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("block [{start}, {end}) needs ~{footprint} bytes, memory budget is {budget} bytes")]
    BudgetTooSmall {
        start: u64,
        end: u64,
        footprint: u64,
        budget: u64,
    },

    #[error("gap array of node {node} sums to {actual}, expected {expected}")]
    GapSumMismatch { node: usize, expected: u64, actual: u64 },

    #[error("GT bit vector of block at {block_start} has {actual} bits, expected {expected}")]
    GtLengthMismatch {
        block_start: u64,
        expected: u64,
        actual: u64,
    },

    #[error("GT bit at position {position} disagrees with the merge walk")]
    GtBoundaryMismatch { position: u64 },

    #[error("merged BWT of node {node} has {actual} symbols, expected {expected}")]
    StreamLengthMismatch { node: usize, expected: u64, actual: u64 },

    #[error("merged ISA of node {node} has {actual} samples, expected {expected}")]
    IsaSizeMismatch { node: usize, expected: u64, actual: u64 },

    #[error("merged ISA of node {node} has {found} samples at the block start")]
    IsaAnchorMismatch { node: usize, found: u64 },

    #[error("LF mismatch at text position {position}: BWT has {found:#04x}, text has {expected:#04x}")]
    LfSymbolMismatch { position: u64, expected: u8, found: u8 },

    #[error("LF chain from position {position} reached rank {actual}, sample says {expected}")]
    LfRankMismatch {
        position: u64,
        expected: u64,
        actual: u64,
    },

    #[error("sampled ISA of block at {block_start} has no sample reachable from rank {rank}")]
    UnreachableSample { block_start: u64, rank: u64 },

    #[error("{file}: {reason}")]
    BadFile { file: String, reason: String },
}
