//! Saturating byte counters with spilled overflow.
//!
//! A slot that reaches 255 stays there; every further increment is recorded
//! as the slot index in the walking task's overflow buffer. Full buffers are
//! written out as sorted sparse runs, and finishing the array merges the runs
//! on disk into one, which cursors stream alongside the counters.

use super::sparse::{RunMerger, SparseRun, write_run};
use super::{GapArray, GapSink, TASK_BUFFER_ENTRIES};
use crate::utils::WorkspaceContext;
use anyhow::{Result, anyhow};
use std::mem;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

pub struct ByteGapSink<'a> {
    counts: Vec<AtomicU8>,
    ctx: &'a WorkspaceContext,
    spills: Mutex<Vec<SparseRun>>,
}

impl<'a> ByteGapSink<'a> {
    pub fn new(slots: u64, ctx: &'a WorkspaceContext) -> Self {
        Self {
            counts: (0..slots).map(|_| AtomicU8::new(0)).collect(),
            ctx,
            spills: Mutex::new(Vec::new()),
        }
    }

    fn spill(&self, overflow: Vec<u64>) -> Result<()> {
        if overflow.is_empty() {
            return Ok(());
        }
        let run = write_run(self.ctx, self.counts.len() as u64, overflow)?;
        self.spills
            .lock()
            .map_err(|_| anyhow!("overflow spill list poisoned"))?
            .push(run);
        Ok(())
    }

    pub fn finish(self) -> Result<GapArray> {
        let spills = self
            .spills
            .into_inner()
            .map_err(|_| anyhow!("overflow spill list poisoned"))?;
        let mut merger = RunMerger::default();
        for run in spills {
            merger.push(self.ctx, run)?;
        }
        let overflow = merger.finish(self.ctx)?;
        if let Some(run) = &overflow {
            log::debug!(
                "Byte gap array: {} overflow increments over {} slots",
                run.total,
                run.entries
            );
        }
        Ok(GapArray::Byte {
            counts: self.counts.into_iter().map(AtomicU8::into_inner).collect(),
            overflow,
        })
    }
}

impl GapSink for ByteGapSink<'_> {
    type Local = Vec<u64>;

    fn local(&self) -> Vec<u64> {
        Vec::new()
    }

    #[inline]
    fn record(&self, local: &mut Vec<u64>, idx: u64) -> Result<()> {
        let slot = &self.counts[idx as usize];
        if slot
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_add(1))
            .is_err()
        {
            local.push(idx);
            if local.len() >= TASK_BUFFER_ENTRIES {
                self.spill(mem::take(local))?;
            }
        }
        Ok(())
    }

    fn flush(&self, local: Vec<u64>) -> Result<()> {
        self.spill(local)
    }
}
