//! Physical BWT interleaving.
//!
//! For every gap slot `i` the parent stream takes `gap[i]` symbols of the
//! from stream followed by into symbol `i` (the final slot has no into
//! symbol). Two slots change meaning in the parent: the into block's first
//! suffix now precedes the parent's last symbol, and the from block's first
//! suffix is preceded by the into block's last symbol.

use super::gap::{GapArray, GapCursor};
use super::packets::WorkPacket;
use crate::codec::{BwtCursor, BwtFileSet, BwtFragment, RunLengthWriter};
use crate::error::BwtError;
use crate::utils::WorkspaceContext;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::io::BufWriter;

/// One input of a merge: its stream, its `p0` slot and the symbol that
/// slot holds in the parent
#[derive(Clone, Copy)]
pub struct StreamSide<'a> {
    pub bwt: &'a BwtFileSet,
    pub p0: u64,
    pub patch: u8,
}

fn length_mismatch(node: usize, expected: u64, actual: u64) -> anyhow::Error {
    BwtError::StreamLengthMismatch {
        node,
        expected,
        actual,
    }
    .into()
}

/// Copy `count` from symbols starting at the cursor, patching the `p0` slot
fn copy_from<W: std::io::Write>(
    cursor: &mut BwtCursor,
    side: &StreamSide,
    mut count: u64,
    out: &mut RunLengthWriter<W>,
) -> Result<bool> {
    while count > 0 {
        let pos = cursor.position();
        if pos == side.p0 {
            if cursor.next_symbol()?.is_none() {
                return Ok(false);
            }
            out.push(side.patch)?;
            count -= 1;
            continue;
        }
        let max = if pos < side.p0 { count.min(side.p0 - pos) } else { count };
        match cursor.next_run(max)? {
            Some((symbol, len)) => {
                out.push_run(symbol, len)?;
                count -= len;
            }
            None => return Ok(false),
        }
    }
    Ok(true)
}

fn merge_packet(
    ctx: &WorkspaceContext,
    gap: &GapArray,
    packet: &WorkPacket,
    into: &StreamSide,
    from: &StreamSide,
    into_len: u64,
    node: usize,
) -> Result<BwtFragment> {
    let mut into_cursor = into.bwt.cursor_at(packet.into_offset)?;
    let mut from_cursor = from.bwt.cursor_at(packet.from_offset)?;
    let mut gaps = gap.cursor_at(packet.index.start)?;

    let (path, file) = ctx.create("merge", "rle")?;
    let mut out = RunLengthWriter::new(BufWriter::with_capacity(65536, file));
    for slot in packet.index.clone() {
        let count = gaps.next_count()?;
        if !copy_from(&mut from_cursor, from, count, &mut out)? {
            return Err(length_mismatch(node, from.bwt.len(), from_cursor.position()));
        }
        if slot < into_len {
            let pos = into_cursor.position();
            let Some(symbol) = into_cursor.next_symbol()? else {
                return Err(length_mismatch(node, into_len, pos));
            };
            out.push(if pos == into.p0 { into.patch } else { symbol })?;
        }
    }
    let (_, len) = out
        .finish()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(BwtFragment { path, len })
}

/// Interleave two streams packet by packet; fragments are chained in order
pub fn merge_streams(
    ctx: &WorkspaceContext,
    gap: &GapArray,
    packets: &[WorkPacket],
    into: StreamSide,
    from: StreamSide,
    node: usize,
) -> Result<BwtFileSet> {
    let into_len = into.bwt.len();
    let expected = into_len + from.bwt.len();

    let fragments: Vec<BwtFragment> = packets
        .par_iter()
        .map(|p| merge_packet(ctx, gap, p, &into, &from, into_len, node))
        .collect::<Result<_>>()?;

    let mut set = BwtFileSet::new();
    for fragment in fragments {
        if fragment.len == 0 {
            ctx.release(&fragment.path)?;
        } else {
            set.push(fragment);
        }
    }
    if set.len() != expected {
        return Err(length_mismatch(node, expected, set.len()));
    }
    log::debug!(
        "Node {node}: merged {expected} symbols in {} fragments",
        set.fragments().len()
    );
    Ok(set)
}

/// A lazily merged symbol stream
pub enum SymbolSource<'a> {
    Stream(BwtCursor),
    Merge(Box<Interleave<'a>>),
}

impl SymbolSource<'_> {
    pub fn next_symbol(&mut self) -> Result<Option<u8>> {
        match self {
            SymbolSource::Stream(cursor) => cursor.next_symbol(),
            SymbolSource::Merge(merge) => merge.next_symbol(),
        }
    }
}

/// Two-way interleave whose from side may itself be an interleave, so a
/// chain of them merges any number of streams without writing the
/// intermediate ones
pub struct Interleave<'a> {
    into: BwtCursor,
    into_len: u64,
    into_p0: u64,
    into_patch: u8,
    from: SymbolSource<'a>,
    from_p0: u64,
    from_patch: u8,
    gap: GapCursor<'a>,
    idx: u64,
    remaining: u64,
    from_rank: u64,
    pending_into: bool,
}

impl<'a> Interleave<'a> {
    pub fn new(
        into: StreamSide,
        from: SymbolSource<'a>,
        from_p0: u64,
        from_patch: u8,
        gap: &'a GapArray,
    ) -> Result<Self> {
        Ok(Self {
            into: into.bwt.cursor()?,
            into_len: into.bwt.len(),
            into_p0: into.p0,
            into_patch: into.patch,
            from,
            from_p0,
            from_patch,
            gap: gap.cursor()?,
            idx: 0,
            remaining: 0,
            from_rank: 0,
            pending_into: false,
        })
    }

    /// Next parent symbol; `None` once both sides are drained or one side
    /// runs out early
    pub fn next_symbol(&mut self) -> Result<Option<u8>> {
        loop {
            if self.remaining > 0 {
                self.remaining -= 1;
                let Some(symbol) = self.from.next_symbol()? else {
                    return Ok(None);
                };
                let rank = self.from_rank;
                self.from_rank += 1;
                return Ok(Some(if rank == self.from_p0 { self.from_patch } else { symbol }));
            }
            if self.pending_into {
                self.pending_into = false;
                let Some(symbol) = self.into.next_symbol()? else {
                    return Ok(None);
                };
                let rank = self.idx;
                self.idx += 1;
                return Ok(Some(if rank == self.into_p0 { self.into_patch } else { symbol }));
            }
            if self.idx > self.into_len {
                return Ok(None);
            }
            self.remaining = self.gap.next_count()?;
            if self.idx < self.into_len {
                self.pending_into = true;
            } else {
                self.idx += 1;
            }
        }
    }
}

/// Drain a source into one workspace fragment
pub fn write_source(
    ctx: &WorkspaceContext,
    source: &mut SymbolSource,
    expected: u64,
    node: usize,
) -> Result<BwtFileSet> {
    let (path, file) = ctx.create("group", "rle")?;
    let mut out = RunLengthWriter::new(BufWriter::with_capacity(65536, file));
    while let Some(symbol) = source.next_symbol()? {
        out.push(symbol)?;
    }
    let (_, len) = out
        .finish()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    if len != expected {
        return Err(length_mismatch(node, expected, len));
    }
    Ok(BwtFileSet::single(path, len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::packets::plan_packets;
    use tempfile::tempdir;

    #[test]
    fn test_binary_merge_patches_p0_slots() {
        let parent = tempdir().unwrap();
        let ctx = WorkspaceContext::new(parent.path()).unwrap();
        let into = BwtFileSet::write_bytes(&ctx, "i", b"abc").unwrap();
        let from = BwtFileSet::write_bytes(&ctx, "f", b"xyzw").unwrap();
        let gap = GapArray::Dense(vec![1, 0, 2, 1]);

        let into_side = StreamSide { bwt: &into, p0: 1, patch: b'B' };
        let from_side = StreamSide { bwt: &from, p0: 2, patch: b'Z' };
        for n in [1, 2, 3] {
            let packets = plan_packets(&gap, n).unwrap();
            let merged = merge_streams(&ctx, &gap, &packets, into_side, from_side, 0).unwrap();
            // x a B y Z c w
            assert_eq!(merged.read_all().unwrap(), b"xaByZcw");
        }
    }

    #[test]
    fn test_short_stream_is_detected() {
        let parent = tempdir().unwrap();
        let ctx = WorkspaceContext::new(parent.path()).unwrap();
        let into = BwtFileSet::write_bytes(&ctx, "i", b"ab").unwrap();
        let from = BwtFileSet::write_bytes(&ctx, "f", b"x").unwrap();
        let gap = GapArray::Dense(vec![1, 0, 1]);
        let packets = plan_packets(&gap, 1).unwrap();
        let err = merge_streams(
            &ctx,
            &gap,
            &packets,
            StreamSide { bwt: &into, p0: 0, patch: b'a' },
            StreamSide { bwt: &from, p0: 0, patch: b'x' },
            9,
        )
        .err()
        .unwrap();
        assert!(matches!(
            err.downcast_ref::<BwtError>(),
            Some(BwtError::StreamLengthMismatch { node: 9, .. })
        ));
    }

    #[test]
    fn test_nested_interleave_matches_two_step_merge() {
        let parent = tempdir().unwrap();
        let ctx = WorkspaceContext::new(parent.path()).unwrap();
        let c0 = BwtFileSet::write_bytes(&ctx, "c0", b"pq").unwrap();
        let c1 = BwtFileSet::write_bytes(&ctx, "c1", b"abc").unwrap();
        let c2 = BwtFileSet::write_bytes(&ctx, "c2", b"xy").unwrap();
        // c1 <- c2, then c0 <- (c1 c2)
        let inner_gap = GapArray::Dense(vec![0, 2, 0, 0]);
        let outer_gap = GapArray::Dense(vec![3, 0, 2]);

        let inner = Interleave::new(
            StreamSide { bwt: &c1, p0: 2, patch: b'C' },
            SymbolSource::Stream(c2.cursor().unwrap()),
            1,
            b'Y',
            &inner_gap,
        )
        .unwrap();
        // inner stream: a x Y b C
        let outer = Interleave::new(
            StreamSide { bwt: &c0, p0: 0, patch: b'P' },
            SymbolSource::Merge(Box::new(inner)),
            4,
            b'Q',
            &outer_gap,
        )
        .unwrap();
        let mut source = SymbolSource::Merge(Box::new(outer));
        let merged = write_source(&ctx, &mut source, 7, 0).unwrap();
        assert_eq!(merged.read_all().unwrap(), b"axYPqbQ");
    }
}
