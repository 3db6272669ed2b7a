//! Work packets for parallel merging.
//!
//! A packet is a contiguous range of gap slots together with the number of
//! into and from symbols that precede it, so a thread can open both inputs
//! at the right offsets and work independently. Packets are cut at points of
//! a sampled prefix sum so their output weights are close to equal.

use super::gap::GapArray;
use anyhow::Result;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPacket {
    /// Gap slots covered
    pub index: Range<u64>,
    /// Into symbols before the first slot
    pub into_offset: u64,
    /// From symbols before the first slot
    pub from_offset: u64,
}

impl WorkPacket {
    /// Number of output symbols the packet produces
    pub fn weight(&self, next: Option<&WorkPacket>, into_len: u64, from_len: u64) -> u64 {
        let (into_end, from_end) = match next {
            Some(n) => (n.into_offset, n.from_offset),
            None => (into_len, from_len),
        };
        (into_end - self.into_offset) + (from_end - self.from_offset)
    }
}

/// `(slot, from symbols before slot)` every few slots, plus the final slot
fn sample_prefix_sums(gap: &GapArray, step: u64) -> Result<Vec<(u64, u64)>> {
    let slots = gap.slots();
    let mut samples = Vec::with_capacity((slots / step + 2) as usize);
    let mut cursor = gap.cursor()?;
    let mut prefix = 0u64;
    for i in 0..slots {
        if i % step == 0 {
            samples.push((i, prefix));
        }
        prefix += cursor.next_count()?;
    }
    samples.push((slots, prefix));
    Ok(samples)
}

/// Split the slots of `gap` into at most `count` packets of similar weight
pub fn plan_packets(gap: &GapArray, count: usize) -> Result<Vec<WorkPacket>> {
    let slots = gap.slots();
    let count = count.max(1) as u64;
    let step = (slots / (count * 16)).max(1);
    let samples = sample_prefix_sums(gap, step)?;

    // Output symbols before slot i: i into symbols (the last slot has none
    // after it) plus the from prefix
    let weight = |&(i, from): &(u64, u64)| i + from;
    let total = samples.last().map(weight).unwrap_or(0);

    let mut cuts: Vec<usize> = vec![0];
    for k in 1..count {
        let target = total * k / count;
        let at = samples.partition_point(|s| weight(s) < target);
        if at < samples.len() - 1 && at > *cuts.last().unwrap_or(&0) {
            cuts.push(at);
        }
    }

    let into_len = slots - 1;
    let mut packets = Vec::with_capacity(cuts.len());
    for (n, &at) in cuts.iter().enumerate() {
        let (start, from_offset) = samples[at];
        let end = match cuts.get(n + 1) {
            Some(&next) => samples[next].0,
            None => slots,
        };
        packets.push(WorkPacket {
            index: start..end,
            into_offset: start.min(into_len),
            from_offset,
        });
    }
    Ok(packets)
}
