//! Sampled ISA merging.
//!
//! Into rank `r` moves to `r + (from suffixes in slots 0..=r)`; a from rank
//! `j` lying in gap slot `i` moves to `j + i`. Packets walk their gap slots
//! once and emit both inputs in merged rank order, so concatenating packet
//! outputs keeps the result sorted.

use super::gap::GapArray;
use super::packets::WorkPacket;
use crate::block::{Block, IsaSample};
use crate::error::BwtError;
use anyhow::Result;
use rayon::prelude::*;

pub struct IsaMerge {
    pub samples: Vec<IsaSample>,
    /// Merged rank of the suffix at the parent's block start
    pub p0_rank: u64,
}

fn merge_packet(
    gap: &GapArray,
    packet: &WorkPacket,
    into: &[IsaSample],
    from: &[IsaSample],
) -> Result<Vec<IsaSample>> {
    let into_lo = into.partition_point(|s| s.rank < packet.index.start);
    let into_hi = into.partition_point(|s| s.rank < packet.index.end);
    let mut into_iter = into[into_lo..into_hi].iter().peekable();
    let mut from_iter = from[from.partition_point(|s| s.rank < packet.from_offset)..]
        .iter()
        .peekable();

    let mut out = Vec::new();
    let mut cursor = gap.cursor_at(packet.index.start)?;
    let mut from_seen = packet.from_offset;
    for slot in packet.index.clone() {
        let count = cursor.next_count()?;
        let from_end = from_seen + count;
        while let Some(s) = from_iter.next_if(|s| s.rank < from_end) {
            out.push(IsaSample::new(s.rank + slot, s.pos));
        }
        from_seen = from_end;
        if let Some(s) = into_iter.next_if(|s| s.rank == slot) {
            out.push(IsaSample::new(s.rank + from_seen, s.pos));
        }
    }
    Ok(out)
}

/// Merge two rank-sorted sample sets into the parent's rank space
pub fn merge_isa(
    gap: &GapArray,
    packets: &[WorkPacket],
    into: &[IsaSample],
    from: &[IsaSample],
    parent: Block,
    node: usize,
) -> Result<IsaMerge> {
    let parts: Vec<Vec<IsaSample>> = packets
        .par_iter()
        .map(|p| merge_packet(gap, p, into, from))
        .collect::<Result<_>>()?;
    let samples: Vec<IsaSample> = parts.into_iter().flatten().collect();

    let expected = (into.len() + from.len()) as u64;
    if samples.len() as u64 != expected {
        return Err(BwtError::IsaSizeMismatch {
            node,
            expected,
            actual: samples.len() as u64,
        }
        .into());
    }

    let mut anchors = samples.iter().filter(|s| s.pos == parent.start);
    let (p0_rank, found) = match (anchors.next(), anchors.count()) {
        (Some(s), 0) => (s.rank, 1),
        (Some(_), more) => (0, more as u64 + 1),
        (None, _) => (0, 0),
    };
    if found != 1 {
        return Err(BwtError::IsaAnchorMismatch { node, found }.into());
    }
    Ok(IsaMerge { samples, p0_rank })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::packets::plan_packets;

    #[test]
    fn test_merge_shifts_both_sides() {
        // into ranks 0..3, from ranks 0..4; gap = [1, 0, 2, 1]
        let gap = GapArray::Dense(vec![1, 0, 2, 1]);
        let into = vec![IsaSample::new(0, 10), IsaSample::new(2, 12)];
        let from = vec![IsaSample::new(0, 20), IsaSample::new(2, 22), IsaSample::new(3, 23)];
        // merged order: F0 I0 I1 F1 F2 I2 F3
        let expected = vec![
            IsaSample::new(0, 20),
            IsaSample::new(1, 10),
            IsaSample::new(4, 22),
            IsaSample::new(5, 12),
            IsaSample::new(6, 23),
        ];
        for n in [1, 2, 4] {
            let packets = plan_packets(&gap, n).unwrap();
            let merged = merge_isa(&gap, &packets, &into, &from, Block::new(10, 30), 0).unwrap();
            assert_eq!(merged.samples, expected);
            assert_eq!(merged.p0_rank, 1);
        }
    }

    #[test]
    fn test_missing_anchor_is_reported() {
        let gap = GapArray::Dense(vec![1, 0]);
        let into = vec![IsaSample::new(0, 11)];
        let from = vec![IsaSample::new(0, 20)];
        let packets = plan_packets(&gap, 1).unwrap();
        let err = merge_isa(&gap, &packets, &into, &from, Block::new(10, 21), 5)
            .err()
            .unwrap();
        assert_eq!(
            err.downcast_ref::<BwtError>(),
            Some(&BwtError::IsaAnchorMismatch { node: 5, found: 0 })
        );
    }
}
