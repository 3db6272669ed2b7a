//! Gap computation by backward LF walks.
//!
//! The from block `[b, c)` is cut into ZBlocks. Each ZBlock walks its
//! positions right to left through the into block's LF index: knowing
//! `g(x + 1)`, the number of into suffixes smaller than `T[x + 1..]`, one
//! step yields `g(x)` for `T[x..]`. The from block's GT bit for `x + 1`
//! decides how the into block's boundary suffix `T[b..]` compares. Each
//! step increments `gap[g(x)]` and produces the parent's GT bit for `x`.

use super::byte::ByteGapSink;
use super::dense::DenseGapSink;
use super::sparse::collect_sparse;
use super::{GapArray, GapSink};
use crate::block::{Block, IsaSample, LfIndex};
use crate::codec::BitBuf;
use crate::error::BwtError;
use crate::merge::tree::MergeKind;
use crate::utils::WorkspaceContext;
use anyhow::Result;
use rayon::prelude::*;
use std::collections::HashMap;

/// Shortest ZBlock worth a separate start-rank search
pub const MIN_ZBLOCK_LEN: u64 = 256;

/// Finds where arbitrary text suffixes fall among an into block's suffixes.
///
/// Suffix positions are recovered by LF-stepping to the nearest sampled ISA
/// entry; the block start is always sampled.
pub struct SuffixLocator<'a> {
    text: &'a [u8],
    lf: &'a LfIndex,
    samples: HashMap<u64, u64>,
    block: Block,
    /// The following block and its GT bits, for bounded comparisons
    next: Option<(Block, &'a BitBuf)>,
}

impl<'a> SuffixLocator<'a> {
    pub fn new(text: &'a [u8], lf: &'a LfIndex, samples: &[IsaSample], block: Block) -> Self {
        Self {
            text,
            lf,
            samples: samples.iter().map(|s| (s.rank, s.pos)).collect(),
            block,
            next: None,
        }
    }

    /// Resolve ties against suffixes of `next`, the block right after this
    /// one, through its GT bits
    pub fn with_next_block(mut self, next: Block, gt: &'a BitBuf) -> Self {
        if next.start == self.block.end && gt.len() == next.len() {
            self.next = Some((next, gt));
        }
        self
    }

    /// Text position of the block suffix with rank `rank`
    pub fn position_of(&self, rank: u64) -> Result<u64> {
        let mut r = rank;
        let mut steps = 0u64;
        loop {
            if let Some(&pos) = self.samples.get(&r) {
                return Ok(pos + steps);
            }
            if steps >= self.block.len() {
                return Err(BwtError::UnreachableSample {
                    block_start: self.block.start,
                    rank,
                }
                .into());
            }
            r = self.lf.lf(r)?.1;
            steps += 1;
        }
    }

    /// `T[p..] < T[pos..]` for a block suffix `p`.
    ///
    /// A plain comparison reads up to the LCP of the two suffixes, which is
    /// unbounded on repetitive text. When `pos` lies in the next block
    /// `(b, c]`, only `b - p` symbols are compared: on a tie the order equals
    /// that of `T[b..]` against `T[pos + b - p..]`, which the next block's
    /// GT bits answer as long as that position does not pass `c`.
    fn suffix_less(&self, p: u64, pos: u64) -> bool {
        let text = self.text;
        if let Some((next, gt)) = self.next {
            let b = next.start;
            if p < b && pos > b && pos <= next.end {
                let k = b - p;
                let tail_end = (pos + k).min(text.len() as u64);
                let head = &text[p as usize..b as usize];
                let tail = &text[pos as usize..tail_end as usize];
                if head != tail {
                    return head < tail;
                }
                let q = pos + k;
                if q <= next.end {
                    return gt.get(q - b - 1);
                }
                return text[b as usize..] < text[q as usize..];
            }
        }
        text[p as usize..] < text[pos as usize..]
    }

    /// Number of block suffixes smaller than `T[pos..]`.
    ///
    /// Costs O(log m) suffix comparisons, each preceded by at most one ISA
    /// sample distance of LF steps.
    pub fn count_smaller(&self, pos: u64) -> Result<u64> {
        if pos as usize >= self.text.len() {
            return Ok(0);
        }
        let (mut lo, mut hi) = (0u64, self.block.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let p = self.position_of(mid)?;
            if self.suffix_less(p, pos) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }
}

/// An independently walkable segment `[start, end)` of the from block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZBlock {
    pub start: u64,
    pub end: u64,
    /// Number of into suffixes smaller than `T[end..]`
    pub rank: u64,
}

/// Split `block` into at most `segments` pieces of at least `min_len`
pub fn plan_segments(block: Block, segments: usize, min_len: u64) -> Vec<(u64, u64)> {
    let len = block.len();
    let seg_len = len.div_ceil(segments.max(1) as u64).max(min_len.max(1));
    let mut out = Vec::new();
    let mut start = block.start;
    while start < block.end {
        let end = (start + seg_len).min(block.end);
        out.push((start, end));
        start = end;
    }
    out
}

/// Everything one gap computation reads
pub struct GapJob<'a> {
    pub text: &'a [u8],
    pub into: &'a LfIndex,
    pub locator: &'a SuffixLocator<'a>,
    pub from: Block,
    pub from_gt: &'a BitBuf,
    /// Last GT bit of the into block: `T[b..] > T[a..]`
    pub into_gt_last: bool,
    pub node: usize,
    pub segments: usize,
}

pub struct GapOutcome {
    pub gap: GapArray,
    /// GT bits of the parent for the from block's positions
    pub walk_bits: BitBuf,
    /// Number of into suffixes smaller than `T[c..]`
    pub boundary_rank: u64,
}

fn walk_zblock<S: GapSink>(job: &GapJob, z: &ZBlock, sink: &S) -> Result<(BitBuf, u64)> {
    let mut local = sink.local();
    let mut bits = BitBuf::with_capacity(z.end - z.start);
    let p0 = job.into.p0();
    let mut g = z.rank;
    for x in (z.start..z.end).rev() {
        let ch = job.text[x as usize];
        let boundary_less = job.from_gt.get(x - job.from.start);
        g = job.into.step(ch, g, boundary_less);
        sink.record(&mut local, g)?;
        bits.push(g > p0);
    }
    sink.flush(local)?;
    bits.reverse();
    Ok((bits, g))
}

fn walk_all<S: GapSink>(job: &GapJob, zblocks: &[ZBlock], sink: &S) -> Result<Vec<(BitBuf, u64)>> {
    zblocks.par_iter().map(|z| walk_zblock(job, z, sink)).collect()
}

/// Compute the gap array of merging `job.from` into the into block
pub fn compute_gap(job: &GapJob, kind: MergeKind, ctx: &WorkspaceContext) -> Result<GapOutcome> {
    let from_len = job.from.len();
    if job.from_gt.len() != from_len {
        return Err(BwtError::GtLengthMismatch {
            block_start: job.from.start,
            expected: from_len,
            actual: job.from_gt.len(),
        }
        .into());
    }

    let boundary_rank = job.locator.count_smaller(job.from.end)?;
    let zblocks: Vec<ZBlock> = plan_segments(job.from, job.segments, MIN_ZBLOCK_LEN)
        .into_par_iter()
        .map(|(start, end)| {
            let rank = if end == job.from.end {
                boundary_rank
            } else {
                job.locator.count_smaller(end)?
            };
            Ok(ZBlock { start, end, rank })
        })
        .collect::<Result<_>>()?;

    let slots = job.into.len() + 1;
    let (walks, gap) = match kind {
        MergeKind::InternalDense => {
            let sink = DenseGapSink::new(slots);
            let walks = walk_all(job, &zblocks, &sink)?;
            (walks, sink.finish())
        }
        MergeKind::InternalSmallByte => {
            let sink = ByteGapSink::new(slots, ctx);
            let walks = walk_all(job, &zblocks, &sink)?;
            (walks, sink.finish()?)
        }
        MergeKind::ExternalSparse => collect_sparse(ctx, slots, rayon::current_num_threads(), |sink| {
            walk_all(job, &zblocks, sink)
        })?,
    };

    // Every walk must end on the rank the next segment started from
    for (k, (_, end_rank)) in walks.iter().enumerate() {
        let expected = if k == 0 {
            job.into.end_rank()
        } else {
            zblocks[k - 1].rank
        };
        if *end_rank != expected {
            return Err(BwtError::LfRankMismatch {
                position: zblocks[k].start,
                expected,
                actual: *end_rank,
            }
            .into());
        }
    }

    let mut walk_bits = BitBuf::with_capacity(from_len);
    for (bits, _) in &walks {
        walk_bits.extend(bits);
    }
    if walk_bits.get(0) != job.into_gt_last {
        return Err(BwtError::GtBoundaryMismatch {
            position: job.from.start,
        }
        .into());
    }

    gap.verify_sum(from_len, job.node)?;
    log::debug!(
        "Node {}: gap array over {} slots from {} ZBlocks",
        job.node,
        slots,
        zblocks.len()
    );

    Ok(GapOutcome {
        gap,
        walk_bits,
        boundary_rank,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::files::read_isa_file;
    use crate::block::{BlockSorter, InMemorySorter};
    use crate::codec::HuffmanCode;
    use crate::config::BuildConfig;
    use crate::text::Histogram;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    fn naive_gap(text: &[u8], into: Block, from: Block) -> Vec<u64> {
        let mut into_sa: Vec<u64> = (into.start..into.end).collect();
        into_sa.sort_by(|&p, &q| text[p as usize..].cmp(&text[q as usize..]));
        let mut gap = vec![0u64; into.len() as usize + 1];
        for x in from.start..from.end {
            let g = into_sa.partition_point(|&p| text[p as usize..] < text[x as usize..]);
            gap[g] += 1;
        }
        gap
    }

    #[test]
    fn test_all_layouts_match_naive() {
        let mut rng = StdRng::seed_from_u64(7);
        let text: Vec<u8> = (0..3000).map(|_| b"acgt"[rng.gen_range(0..4)]).collect();
        let parent = tempdir().unwrap();
        let ctx = WorkspaceContext::new(parent.path()).unwrap();
        let cfg = BuildConfig {
            internal_isa_rate: 16,
            ..Default::default()
        };
        let code = HuffmanCode::from_histogram(&Histogram::of(&text)).unwrap();

        let into = Block::new(500, 1400);
        let from = Block::new(1400, 2700);
        let into_result = InMemorySorter.sort_block(&text, into, &ctx, &cfg).unwrap();
        let from_result = InMemorySorter.sort_block(&text, from, &ctx, &cfg).unwrap();
        let lf = LfIndex::build(&into_result, &code).unwrap();
        let samples = read_isa_file(&into_result.files.isa).unwrap();
        let locator = SuffixLocator::new(&text, &lf, &samples, into);
        let from_gt = BitBuf::read_file(&from_result.files.gt).unwrap();
        let into_gt = BitBuf::read_file(&into_result.files.gt).unwrap();

        let expected = naive_gap(&text, into, from);
        for kind in [
            MergeKind::InternalDense,
            MergeKind::InternalSmallByte,
            MergeKind::ExternalSparse,
        ] {
            let job = GapJob {
                text: &text,
                into: &lf,
                locator: &locator,
                from,
                from_gt: &from_gt,
                into_gt_last: into_gt.get(into_gt.len() - 1),
                node: 0,
                segments: 5,
            };
            let outcome = compute_gap(&job, kind, &ctx).unwrap();
            assert_eq!(outcome.gap.to_vec().unwrap(), expected, "{kind:?}");
            assert_eq!(outcome.walk_bits.len(), from.len());
            outcome.gap.release(&ctx).unwrap();
        }
    }

    #[test]
    fn test_locator_counts_smaller_suffixes() {
        let text = b"abaababaabaababaababa".to_vec();
        let parent = tempdir().unwrap();
        let ctx = WorkspaceContext::new(parent.path()).unwrap();
        let cfg = BuildConfig {
            internal_isa_rate: 4,
            ..Default::default()
        };
        let code = HuffmanCode::from_histogram(&Histogram::of(&text)).unwrap();
        let block = Block::new(2, 13);
        let result = InMemorySorter.sort_block(&text, block, &ctx, &cfg).unwrap();
        let lf = LfIndex::build(&result, &code).unwrap();
        let samples = read_isa_file(&result.files.isa).unwrap();
        let locator = SuffixLocator::new(&text, &lf, &samples, block);

        for q in 0..=text.len() as u64 {
            let naive = (block.start..block.end)
                .filter(|&p| text[p as usize..] < text[q as usize..])
                .count() as u64;
            assert_eq!(locator.count_smaller(q).unwrap(), naive, "q={q}");
        }
    }

    #[test]
    fn test_truncated_gt_is_rejected() {
        let text = b"mississippi".to_vec();
        let parent = tempdir().unwrap();
        let ctx = WorkspaceContext::new(parent.path()).unwrap();
        let cfg = BuildConfig::default();
        let code = HuffmanCode::from_histogram(&Histogram::of(&text)).unwrap();
        let into = Block::new(0, 5);
        let result = InMemorySorter.sort_block(&text, into, &ctx, &cfg).unwrap();
        let lf = LfIndex::build(&result, &code).unwrap();
        let samples = read_isa_file(&result.files.isa).unwrap();
        let locator = SuffixLocator::new(&text, &lf, &samples, into);
        let short_gt: BitBuf = [true, false].into_iter().collect();

        let job = GapJob {
            text: &text,
            into: &lf,
            locator: &locator,
            from: Block::new(5, 11),
            from_gt: &short_gt,
            into_gt_last: false,
            node: 3,
            segments: 1,
        };
        let err = compute_gap(&job, MergeKind::InternalDense, &ctx).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<BwtError>(),
            Some(BwtError::GtLengthMismatch { .. })
        ));
    }

    #[test]
    fn test_next_block_gt_resolves_ties() {
        let text = b"abaababaabaababaababa".to_vec();
        let parent = tempdir().unwrap();
        let ctx = WorkspaceContext::new(parent.path()).unwrap();
        let cfg = BuildConfig {
            internal_isa_rate: 4,
            ..Default::default()
        };
        let code = HuffmanCode::from_histogram(&Histogram::of(&text)).unwrap();
        let block = Block::new(2, 13);
        let next = Block::new(13, 21);
        let result = InMemorySorter.sort_block(&text, block, &ctx, &cfg).unwrap();
        let next_result = InMemorySorter.sort_block(&text, next, &ctx, &cfg).unwrap();
        let lf = LfIndex::build(&result, &code).unwrap();
        let samples = read_isa_file(&result.files.isa).unwrap();
        let next_gt = BitBuf::read_file(&next_result.files.gt).unwrap();
        let locator =
            SuffixLocator::new(&text, &lf, &samples, block).with_next_block(next, &next_gt);

        for q in 0..=text.len() as u64 {
            let naive = (block.start..block.end)
                .filter(|&p| text[p as usize..] < text[q as usize..])
                .count() as u64;
            assert_eq!(locator.count_smaller(q).unwrap(), naive, "q={q}");
        }

        // GT bits that disagree with the text change the answer, so ties
        // really are settled by them
        let flipped: BitBuf = (0..next_gt.len()).map(|i| !next_gt.get(i)).collect();
        let skewed =
            SuffixLocator::new(&text, &lf, &samples, block).with_next_block(next, &flipped);
        assert!(
            (14..=21).any(|q| skewed.count_smaller(q).unwrap() != locator.count_smaller(q).unwrap())
        );
    }

    struct MississippiCase {
        text: Vec<u8>,
        lf: LfIndex,
        samples: Vec<IsaSample>,
        into: Block,
        from: Block,
        from_gt: BitBuf,
        into_gt_last: bool,
        ctx: WorkspaceContext,
        _dir: tempfile::TempDir,
    }

    /// Into block "mis" and from block "sissippi"; the into block's last
    /// symbol starts the from block, so the walk's final step reads from GT
    /// bit 0.
    fn mississippi_case() -> MississippiCase {
        let text = b"mississippi".to_vec();
        let parent = tempdir().unwrap();
        let ctx = WorkspaceContext::new(parent.path()).unwrap();
        let cfg = BuildConfig::default();
        let code = HuffmanCode::from_histogram(&Histogram::of(&text)).unwrap();
        let into = Block::new(0, 3);
        let from = Block::new(3, 11);
        let into_result = InMemorySorter.sort_block(&text, into, &ctx, &cfg).unwrap();
        let from_result = InMemorySorter.sort_block(&text, from, &ctx, &cfg).unwrap();
        let into_gt = BitBuf::read_file(&into_result.files.gt).unwrap();
        MississippiCase {
            lf: LfIndex::build(&into_result, &code).unwrap(),
            samples: read_isa_file(&into_result.files.isa).unwrap(),
            from_gt: BitBuf::read_file(&from_result.files.gt).unwrap(),
            into_gt_last: into_gt.get(into_gt.len() - 1),
            text,
            into,
            from,
            ctx,
            _dir: parent,
        }
    }

    fn run_case(case: &MississippiCase, from_gt: &BitBuf, into_gt_last: bool) -> Result<GapOutcome> {
        let locator = SuffixLocator::new(&case.text, &case.lf, &case.samples, case.into);
        let job = GapJob {
            text: &case.text,
            into: &case.lf,
            locator: &locator,
            from: case.from,
            from_gt,
            into_gt_last,
            node: 2,
            segments: 1,
        };
        compute_gap(&job, MergeKind::InternalDense, &case.ctx)
    }

    #[test]
    fn test_consistent_inputs_walk_cleanly() {
        let case = mississippi_case();
        assert_eq!(case.text[case.into.end as usize - 1], case.text[case.from.start as usize]);
        let outcome = run_case(&case, &case.from_gt, case.into_gt_last).unwrap();
        assert_eq!(
            outcome.gap.to_vec().unwrap(),
            naive_gap(&case.text, case.into, case.from)
        );
    }

    #[test]
    fn test_wrong_from_gt_bit_breaks_walk_end() {
        let case = mississippi_case();
        let tampered: BitBuf = (0..case.from_gt.len())
            .map(|i| if i == 0 { !case.from_gt.get(i) } else { case.from_gt.get(i) })
            .collect();
        let err = run_case(&case, &tampered, case.into_gt_last).err().unwrap();
        match err.downcast_ref::<BwtError>() {
            Some(BwtError::LfRankMismatch {
                position,
                expected,
                actual,
            }) => {
                assert_eq!(*position, 3);
                assert_eq!(*expected, case.lf.end_rank());
                assert_eq!(expected.abs_diff(*actual), 1);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_wrong_into_gt_last_is_rejected() {
        let case = mississippi_case();
        let err = run_case(&case, &case.from_gt, !case.into_gt_last).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<BwtError>(),
            Some(BwtError::GtBoundaryMismatch { position: 3 })
        ));
    }
}
