//! Gap arrays.
//!
//! `gap[i]` is the number of from-block suffixes that sort between the
//! into-block suffixes of rank `i - 1` and `i`; there are `into_len + 1`
//! slots. Three layouts produce the same logical array:
//!
//! - [`dense`]: one atomic `u32` per slot
//! - [`byte`]: one saturating atomic byte per slot plus an on-disk sparse
//!   run of the increments past 255
//! - [`sparse`]: per-segment sorted runs, gamma coded on disk and merged by a
//!   background consumer into a single run file
//!
//! Consumers read any layout through a [`GapCursor`].

pub mod byte;
pub mod dense;
pub mod engine;
pub mod sparse;

use crate::error::BwtError;
use crate::utils::WorkspaceContext;
use anyhow::{Result, bail};
use sparse::{RunCursor, SparseRun};

pub use engine::{GapJob, GapOutcome, SuffixLocator, ZBlock, compute_gap};

/// Slot indexes a walking task holds in memory before writing them out
pub const TASK_BUFFER_ENTRIES: usize = 1 << 16;

/// Memory held by the task buffers of `threads` concurrent walks
pub fn task_buffer_bytes(threads: usize) -> u64 {
    (threads * TASK_BUFFER_ENTRIES * std::mem::size_of::<u64>()) as u64
}

/// Destination of gap increments produced by parallel walks.
///
/// Each walking task gets its own `Local` state, which is handed back
/// through `flush` when the task finishes.
pub trait GapSink: Sync {
    type Local: Send;

    fn local(&self) -> Self::Local;

    fn record(&self, local: &mut Self::Local, idx: u64) -> Result<()>;

    fn flush(&self, local: Self::Local) -> Result<()>;
}

#[derive(Debug)]
pub enum GapArray {
    Dense(Vec<u32>),
    Byte {
        counts: Vec<u8>,
        overflow: Option<SparseRun>,
    },
    Sparse(SparseRun),
}

impl GapArray {
    /// Number of slots, `into_len + 1`
    pub fn slots(&self) -> u64 {
        match self {
            GapArray::Dense(counts) => counts.len() as u64,
            GapArray::Byte { counts, .. } => counts.len() as u64,
            GapArray::Sparse(run) => run.slots,
        }
    }

    pub fn cursor_at(&self, start: u64) -> Result<GapCursor<'_>> {
        if start > self.slots() {
            bail!("gap cursor start {start} past {} slots", self.slots());
        }
        Ok(match self {
            GapArray::Dense(counts) => GapCursor::Dense {
                counts: counts.as_slice(),
                idx: start,
            },
            GapArray::Byte { counts, overflow } => GapCursor::Byte {
                counts: counts.as_slice(),
                overflow: overflow
                    .as_ref()
                    .map(|run| RunCursor::seek(run, start))
                    .transpose()?,
                idx: start,
            },
            GapArray::Sparse(run) => GapCursor::Sparse {
                run: RunCursor::seek(run, start)?,
                idx: start,
                slots: run.slots,
            },
        })
    }

    pub fn cursor(&self) -> Result<GapCursor<'_>> {
        self.cursor_at(0)
    }

    /// Sum of all slots
    pub fn total(&self) -> Result<u64> {
        Ok(match self {
            GapArray::Dense(counts) => counts.iter().map(|&c| c as u64).sum(),
            GapArray::Byte { counts, overflow } => {
                counts.iter().map(|&c| c as u64).sum::<u64>()
                    + overflow.as_ref().map_or(0, |run| run.total)
            }
            GapArray::Sparse(run) => run.total,
        })
    }

    /// Check that the array accounts for every from-block suffix
    pub fn verify_sum(&self, expected: u64, node: usize) -> Result<()> {
        let actual = match self {
            // The stored totals are the producers' own counts; re-read the files
            GapArray::Sparse(_) | GapArray::Byte { overflow: Some(_), .. } => {
                let mut cursor = self.cursor()?;
                let mut sum = 0u64;
                for _ in 0..self.slots() {
                    sum += cursor.next_count()?;
                }
                sum
            }
            _ => self.total()?,
        };
        if actual != expected {
            return Err(BwtError::GapSumMismatch {
                node,
                expected,
                actual,
            }
            .into());
        }
        Ok(())
    }

    /// Materialise all slots
    pub fn to_vec(&self) -> Result<Vec<u64>> {
        let mut cursor = self.cursor()?;
        (0..self.slots()).map(|_| cursor.next_count()).collect()
    }

    /// Remove any backing file
    pub fn release(self, ctx: &WorkspaceContext) -> Result<()> {
        match self {
            GapArray::Sparse(run)
            | GapArray::Byte {
                overflow: Some(run),
                ..
            } => ctx.release(&run.path),
            _ => Ok(()),
        }
    }
}

/// Sequential reader of gap slots starting from any index
pub enum GapCursor<'a> {
    Dense {
        counts: &'a [u32],
        idx: u64,
    },
    Byte {
        counts: &'a [u8],
        overflow: Option<RunCursor>,
        idx: u64,
    },
    Sparse {
        run: RunCursor,
        idx: u64,
        slots: u64,
    },
}

impl GapCursor<'_> {
    /// Count of the current slot; advances to the next one
    pub fn next_count(&mut self) -> Result<u64> {
        match self {
            GapCursor::Dense { counts, idx } => {
                let Some(&count) = counts.get(*idx as usize) else {
                    bail!("gap cursor ran past slot {idx}");
                };
                *idx += 1;
                Ok(count as u64)
            }
            GapCursor::Byte {
                counts,
                overflow,
                idx,
            } => {
                let Some(&count) = counts.get(*idx as usize) else {
                    bail!("gap cursor ran past slot {idx}");
                };
                let extra = match overflow {
                    Some(run) => run.count_at(*idx)?,
                    None => 0,
                };
                *idx += 1;
                Ok(count as u64 + extra)
            }
            GapCursor::Sparse { run, idx, slots } => {
                if *idx >= *slots {
                    bail!("gap cursor ran past slot {idx}");
                }
                let count = run.count_at(*idx)?;
                *idx += 1;
                Ok(count)
            }
        }
    }

    /// Index of the slot the next call reads
    pub fn position(&self) -> u64 {
        match self {
            GapCursor::Dense { idx, .. }
            | GapCursor::Byte { idx, .. }
            | GapCursor::Sparse { idx, .. } => *idx,
        }
    }
}
