//! Merging the children of one tree node.
//!
//! A binary node computes one gap array and then merges the ISA samples and
//! the BWT streams concurrently, both split into the same work packets. A
//! small-block group is merged right to left: each child is merged with the
//! union of the children after it, keeping the intermediate GT bits and ISA
//! samples in memory, and the final stream is produced in a single pass by
//! chaining the interleaves.

use super::gap::{GapArray, GapJob, SuffixLocator, compute_gap};
use super::isa::merge_isa;
use super::packets::{WorkPacket, plan_packets};
use super::stream::{Interleave, StreamSide, SymbolSource, merge_streams, write_source};
use super::tree::MergeKind;
use crate::block::files::{read_isa_file, store_isa};
use crate::block::{Block, BlockFiles, BlockSortResult, IsaSample, LfIndex};
use crate::codec::{BitBuf, BwtFileSet, HuffmanCode};
use crate::config::BuildConfig;
use crate::error::BwtError;
use crate::text::Histogram;
use crate::utils::WorkspaceContext;
use anyhow::{Context, Result, bail};

/// Shared, read-only inputs of every merge
#[derive(Clone, Copy)]
pub struct MergeEnv<'a> {
    pub text: &'a [u8],
    pub code: &'a HuffmanCode,
    pub ctx: &'a WorkspaceContext,
    pub cfg: &'a BuildConfig,
}

/// The in-memory part of a block needed when it is the from side
struct BlockState {
    block: Block,
    p0_rank: u64,
    end_rank: u64,
    gt: BitBuf,
    isa: Vec<IsaSample>,
}

impl BlockState {
    fn load(result: &BlockSortResult) -> Result<Self> {
        let gt = BitBuf::read_file(&result.files.gt)
            .with_context(|| format!("Failed to load GT bits of {}", result.block))?;
        if gt.len() != result.len() {
            return Err(BwtError::GtLengthMismatch {
                block_start: result.block.start,
                expected: result.len(),
                actual: gt.len(),
            }
            .into());
        }
        Ok(Self {
            block: result.block,
            p0_rank: result.p0_rank,
            end_rank: result.end_rank,
            gt,
            isa: read_isa_file(&result.files.isa)?,
        })
    }
}

/// Everything about the parent that follows from the gap array alone
struct MergeStep {
    block: Block,
    gap: GapArray,
    packets: Vec<WorkPacket>,
    gt: BitBuf,
    p0_rank: u64,
    end_rank: u64,
}

fn count_through(gap: &GapArray, slot: u64) -> Result<u64> {
    let mut cursor = gap.cursor()?;
    let mut sum = 0u64;
    for _ in 0..=slot {
        sum += cursor.next_count()?;
    }
    Ok(sum)
}

fn plan_step(
    env: &MergeEnv,
    node: usize,
    into: &BlockSortResult,
    into_state: &BlockState,
    from: &BlockState,
    kind: MergeKind,
) -> Result<MergeStep> {
    let into_len = into.len();
    let lf = LfIndex::build(into, env.code)?;
    let locator = SuffixLocator::new(env.text, &lf, &into_state.isa, into.block)
        .with_next_block(from.block, &from.gt);
    let job = GapJob {
        text: env.text,
        into: &lf,
        locator: &locator,
        from: from.block,
        from_gt: &from.gt,
        into_gt_last: into_state.gt.get(into_len - 1),
        node,
        segments: env.cfg.work_packets(),
    };
    let outcome = compute_gap(&job, kind, env.ctx)?;
    let packets = plan_packets(&outcome.gap, env.cfg.work_packets())?;

    // The into block's last bit is re-derived by the walk
    let mut gt = BitBuf::with_capacity(into_len + from.block.len());
    gt.extend_prefix(&into_state.gt, into_len - 1);
    gt.extend(&outcome.walk_bits);
    gt.push(outcome.boundary_rank > into.p0_rank);

    let p0_rank = into.p0_rank + count_through(&outcome.gap, into.p0_rank)?;
    Ok(MergeStep {
        block: into.block.join(&from.block),
        gap: outcome.gap,
        packets,
        gt,
        p0_rank,
        end_rank: outcome.boundary_rank + from.end_rank,
    })
}

/// Merge ISA samples and check that they agree with the gap array on `p0`
fn merge_samples(
    step: &MergeStep,
    into: &[IsaSample],
    from: &[IsaSample],
    node: usize,
) -> Result<Vec<IsaSample>> {
    let merged = merge_isa(&step.gap, &step.packets, into, from, step.block, node)?;
    if merged.p0_rank != step.p0_rank {
        return Err(BwtError::LfRankMismatch {
            position: step.block.start,
            expected: step.p0_rank,
            actual: merged.p0_rank,
        }
        .into());
    }
    Ok(merged.samples)
}

fn store_parent(
    env: &MergeEnv,
    parent: &BlockState,
    bwt: BwtFileSet,
    last_symbol: u8,
    histogram: Histogram,
) -> Result<BlockSortResult> {
    let isa_path = store_isa(env.ctx, "node", &parent.isa)?;
    let gt_path = env.ctx.unique_path("node", "gt");
    parent.gt.write_file(&gt_path)?;
    Ok(BlockSortResult {
        block: parent.block,
        p0_rank: parent.p0_rank,
        end_rank: parent.end_rank,
        last_symbol,
        histogram,
        isa_samples: parent.isa.len() as u64,
        files: BlockFiles {
            bwt,
            isa: isa_path,
            gt: gt_path,
        },
    })
}

/// Merge two adjacent blocks; the children's files are released on success
pub fn merge_binary(
    env: &MergeEnv,
    node: usize,
    kind: MergeKind,
    into: BlockSortResult,
    from: BlockSortResult,
) -> Result<BlockSortResult> {
    let into_state = BlockState::load(&into)?;
    let from_state = BlockState::load(&from)?;
    let step = plan_step(env, node, &into, &into_state, &from_state, kind)?;

    let (isa, bwt) = rayon::join(
        || merge_samples(&step, &into_state.isa, &from_state.isa, node),
        || {
            merge_streams(
                env.ctx,
                &step.gap,
                &step.packets,
                StreamSide {
                    bwt: &into.files.bwt,
                    p0: into.p0_rank,
                    patch: from.last_symbol,
                },
                StreamSide {
                    bwt: &from.files.bwt,
                    p0: from.p0_rank,
                    patch: into.last_symbol,
                },
                node,
            )
        },
    );
    let (isa, bwt) = (isa?, bwt?);

    let mut histogram = into.histogram.clone();
    histogram.add(&from.histogram);
    let state = BlockState {
        block: step.block,
        p0_rank: step.p0_rank,
        end_rank: step.end_rank,
        gt: step.gt,
        isa,
    };
    let parent = store_parent(env, &state, bwt, from.last_symbol, histogram)?;

    log::debug!(
        "Node {node}: merged {} and {} ({kind}), p0={} end_rank={}",
        into.block,
        from.block,
        parent.p0_rank,
        parent.end_rank
    );
    step.gap.release(env.ctx)?;
    into.files.release(env.ctx)?;
    from.files.release(env.ctx)?;
    Ok(parent)
}

/// Merge three or more adjacent small blocks in one pass over their streams
pub fn merge_group(
    env: &MergeEnv,
    node: usize,
    kind: MergeKind,
    children: Vec<BlockSortResult>,
) -> Result<BlockSortResult> {
    if children.len() < 2 {
        bail!("Node {node}: merge group needs at least two children");
    }
    let k = children.len();
    let last = &children[k - 1];
    let group_last = last.last_symbol;
    let mut acc = BlockState::load(last)?;
    let mut histogram = last.histogram.clone();

    // levels[i] merges children[k - 2 - i] with everything after it
    let mut levels: Vec<(GapArray, u64)> = Vec::with_capacity(k - 1);
    for into in children[..k - 1].iter().rev() {
        let into_state = BlockState::load(into)?;
        let step = plan_step(env, node, into, &into_state, &acc, kind)?;
        let isa = merge_samples(&step, &into_state.isa, &acc.isa, node)?;
        histogram.add(&into.histogram);

        levels.push((step.gap, acc.p0_rank));
        acc = BlockState {
            block: step.block,
            p0_rank: step.p0_rank,
            end_rank: step.end_rank,
            gt: step.gt,
            isa,
        };
    }

    let bwt = {
        let mut source = SymbolSource::Stream(last.files.bwt.cursor()?);
        for (i, (gap, from_p0)) in levels.iter().enumerate() {
            let into = &children[k - 2 - i];
            let side = StreamSide {
                bwt: &into.files.bwt,
                p0: into.p0_rank,
                patch: group_last,
            };
            source = SymbolSource::Merge(Box::new(Interleave::new(
                side,
                source,
                *from_p0,
                into.last_symbol,
                gap,
            )?));
        }
        write_source(env.ctx, &mut source, acc.block.len(), node)?
    };

    let parent = store_parent(env, &acc, bwt, group_last, histogram)?;
    log::debug!(
        "Node {node}: merged {} blocks into {} ({kind})",
        children.len(),
        parent.block
    );
    for (gap, _) in levels {
        gap.release(env.ctx)?;
    }
    for child in children {
        child.files.release(env.ctx)?;
    }
    Ok(parent)
}

/// Merge the sorted children of an internal node, left to right in text order
pub fn merge_children(
    env: &MergeEnv,
    node: usize,
    kind: MergeKind,
    mut children: Vec<BlockSortResult>,
) -> Result<BlockSortResult> {
    match children.len() {
        0 | 1 => bail!("Node {node}: internal node with {} children", children.len()),
        2 => {
            let from = children.pop().context("missing child")?;
            let into = children.pop().context("missing child")?;
            merge_binary(env, node, kind, into, from)
        }
        _ => merge_group(env, node, kind, children),
    }
}
