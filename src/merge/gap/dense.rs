//! One atomic counter per gap slot

use super::{GapArray, GapSink};
use anyhow::Result;
use std::sync::atomic::{AtomicU32, Ordering};

pub struct DenseGapSink {
    counts: Vec<AtomicU32>,
}

impl DenseGapSink {
    pub fn new(slots: u64) -> Self {
        Self {
            counts: (0..slots).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn finish(self) -> GapArray {
        GapArray::Dense(self.counts.into_iter().map(AtomicU32::into_inner).collect())
    }
}

impl GapSink for DenseGapSink {
    type Local = ();

    fn local(&self) {}

    #[inline]
    fn record(&self, _local: &mut (), idx: u64) -> Result<()> {
        self.counts[idx as usize].fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn flush(&self, _local: ()) -> Result<()> {
        Ok(())
    }
}
