//! Merge tree construction.
//!
//! Leaves are the partitioned blocks in text order. Runs of small blocks are
//! first grouped into k-ary nodes whose merges keep every intermediate state
//! in memory; the resulting nodes are then paired level by level until one
//! root remains. Every internal node records the gap layout its merge uses,
//! picked from the memory the merge needs against the budget.

use crate::block::{Block, InMemorySorter};
use crate::codec::{HuffmanCode, HuffmanWaveletTree};
use crate::config::BuildConfig;
use crate::error::BwtError;
use crate::merge::gap::task_buffer_bytes;
use crate::text::Histogram;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Gap layout and merge strategy of an internal node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeKind {
    /// One `u32` counter per into rank
    InternalDense,
    /// One byte counter per into rank plus spilled overflow; k-ary groups
    /// of small blocks always use this
    InternalSmallByte,
    /// Disk-backed sparse runs
    ExternalSparse,
}

impl std::fmt::Display for MergeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MergeKind::InternalDense => "dense",
            MergeKind::InternalSmallByte => "byte",
            MergeKind::ExternalSparse => "sparse",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeTreeNode {
    Leaf {
        block: Block,
        footprint: u64,
    },
    Internal {
        children: Vec<MergeTreeNode>,
        kind: MergeKind,
        block: Block,
    },
}

impl MergeTreeNode {
    pub fn block(&self) -> Block {
        match self {
            MergeTreeNode::Leaf { block, .. } | MergeTreeNode::Internal { block, .. } => *block,
        }
    }

    pub fn len(&self) -> u64 {
        self.block().len()
    }

    pub fn is_empty(&self) -> bool {
        self.block().is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, MergeTreeNode::Leaf { .. })
    }

    /// Leaf blocks in text order
    pub fn leaves(&self) -> Vec<Block> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<Block>) {
        match self {
            MergeTreeNode::Leaf { block, .. } => out.push(*block),
            MergeTreeNode::Internal { children, .. } => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
        }
    }

    /// Number of nodes in the subtree
    pub fn node_count(&self) -> usize {
        match self {
            MergeTreeNode::Leaf { .. } => 1,
            MergeTreeNode::Internal { children, .. } => {
                1 + children.iter().map(|c| c.node_count()).sum::<usize>()
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            MergeTreeNode::Leaf { .. } => 0,
            MergeTreeNode::Internal { children, .. } => {
                1 + children.iter().map(|c| c.depth()).max().unwrap_or(0)
            }
        }
    }
}

/// Memory estimates for one construction, from the global symbol statistics
#[derive(Debug, Clone, Copy)]
pub struct FootprintModel {
    /// Mean Huffman code length in bits
    avg_code_bits: f64,
}

impl FootprintModel {
    pub fn new(hist: &Histogram, code: &HuffmanCode) -> Self {
        Self {
            avg_code_bits: code.average_length(hist),
        }
    }

    /// Wavelet tree of a block of `len` symbols
    pub fn wavelet(&self, len: u64) -> u64 {
        let bits = (len as f64 * self.avg_code_bits).ceil() as u64;
        HuffmanWaveletTree::estimated_size(bits) + std::mem::size_of::<HuffmanWaveletTree>() as u64
    }

    /// Sorting a leaf
    pub fn leaf(&self, len: u64) -> u64 {
        InMemorySorter::footprint(len)
    }

    /// GT bits and ISA samples a merge keeps in memory
    fn metadata(&self, len: u64, cfg: &BuildConfig) -> u64 {
        len.div_ceil(8) + (len / cfg.internal_isa_rate + 1) * 16
    }

    /// Binary merge with `into_len` into suffixes and `from_len` from suffixes.
    ///
    /// Byte and sparse walks also hold one slot buffer per thread.
    pub fn binary(&self, kind: MergeKind, into_len: u64, from_len: u64, cfg: &BuildConfig) -> u64 {
        let gap = match kind {
            MergeKind::InternalDense => 4 * (into_len + 1),
            MergeKind::InternalSmallByte => into_len + 1 + task_buffer_bytes(cfg.threads),
            MergeKind::ExternalSparse => task_buffer_bytes(cfg.threads),
        };
        self.wavelet(into_len) + gap + self.metadata(into_len + from_len, cfg)
    }

    /// k-ary merge of small blocks: one wavelet tree at a time, byte gaps of
    /// every level held until the final interleave
    pub fn group(&self, lens: &[u64], cfg: &BuildConfig) -> u64 {
        let total: u64 = lens.iter().sum();
        let largest = lens.iter().copied().max().unwrap_or(0);
        let gaps: u64 = lens.iter().map(|l| l + 1).sum();
        self.wavelet(largest) + gaps + task_buffer_bytes(cfg.threads) + 2 * self.metadata(total, cfg)
    }
}

pub struct MergeTreeBuilder<'a> {
    cfg: &'a BuildConfig,
    model: FootprintModel,
}

impl<'a> MergeTreeBuilder<'a> {
    pub fn new(cfg: &'a BuildConfig, model: FootprintModel) -> Self {
        Self { cfg, model }
    }

    /// Pick the gap layout of a binary merge
    pub fn choose_kind(&self, into_len: u64, from_len: u64) -> MergeKind {
        if let Some(kind) = self.cfg.force_merge_kind {
            return kind;
        }
        let budget = self.cfg.memory_budget;
        let fits = |kind| self.model.binary(kind, into_len, from_len, self.cfg) <= budget;
        if from_len < u32::MAX as u64 && fits(MergeKind::InternalDense) {
            MergeKind::InternalDense
        } else if fits(MergeKind::InternalSmallByte) {
            MergeKind::InternalSmallByte
        } else {
            MergeKind::ExternalSparse
        }
    }

    pub fn build(&self, blocks: &[Block]) -> Result<MergeTreeNode> {
        anyhow::ensure!(!blocks.is_empty(), "no blocks to merge");

        let mut leaves = Vec::with_capacity(blocks.len());
        for &block in blocks {
            let footprint = self.model.leaf(block.len());
            if footprint > self.cfg.memory_budget {
                return Err(BwtError::BudgetTooSmall {
                    start: block.start,
                    end: block.end,
                    footprint,
                    budget: self.cfg.memory_budget,
                }
                .into());
            }
            leaves.push(MergeTreeNode::Leaf { block, footprint });
        }

        let mut level = self.group_small(leaves);
        while level.len() > 1 {
            level = self.pair_level(level);
        }
        let root = level.pop().ok_or_else(|| anyhow::anyhow!("empty merge tree"))?;
        log::info!(
            "Merge tree: {} blocks, {} nodes, depth {}",
            blocks.len(),
            root.node_count(),
            root.depth()
        );
        Ok(root)
    }

    /// Group consecutive small leaves into k-ary byte-gap nodes
    fn group_small(&self, leaves: Vec<MergeTreeNode>) -> Vec<MergeTreeNode> {
        let grouping = matches!(
            self.cfg.force_merge_kind,
            None | Some(MergeKind::InternalSmallByte)
        );
        if !grouping {
            return leaves;
        }

        let mut out = Vec::with_capacity(leaves.len());
        let mut group: Vec<MergeTreeNode> = Vec::new();
        for leaf in leaves {
            let small = leaf.len() <= self.cfg.small_block_size;
            if small && group.len() < self.cfg.max_arity {
                let mut lens: Vec<u64> = group.iter().map(|n| n.len()).collect();
                lens.push(leaf.len());
                if self.model.group(&lens, self.cfg) <= self.cfg.memory_budget {
                    group.push(leaf);
                    continue;
                }
            }
            Self::close_group(&mut group, &mut out);
            if small {
                group.push(leaf);
            } else {
                out.push(leaf);
            }
        }
        Self::close_group(&mut group, &mut out);
        out
    }

    fn close_group(group: &mut Vec<MergeTreeNode>, out: &mut Vec<MergeTreeNode>) {
        match group.len() {
            0 => {}
            1 => out.extend(group.drain(..)),
            _ => {
                let children = std::mem::take(group);
                let block = Block::new(children[0].block().start, children[children.len() - 1].block().end);
                out.push(MergeTreeNode::Internal {
                    children,
                    kind: MergeKind::InternalSmallByte,
                    block,
                });
            }
        }
    }

    /// Pair adjacent nodes; an odd node is carried up unchanged
    fn pair_level(&self, level: Vec<MergeTreeNode>) -> Vec<MergeTreeNode> {
        let mut out = Vec::with_capacity(level.len().div_ceil(2));
        let mut iter = level.into_iter();
        while let Some(left) = iter.next() {
            match iter.next() {
                Some(right) => {
                    let kind = self.choose_kind(left.len(), right.len());
                    let block = left.block().join(&right.block());
                    out.push(MergeTreeNode::Internal {
                        children: vec![left, right],
                        kind,
                        block,
                    });
                }
                None => out.push(left),
            }
        }
        out
    }
}
