//! Types for sorted blocks

use crate::codec::BwtFileSet;
use crate::text::Histogram;
use crate::utils::WorkspaceContext;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Half-open range `[start, end)` of text positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    pub start: u64,
    pub end: u64,
}

impl Block {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start < end);
        Self { start, end }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn contains(&self, pos: u64) -> bool {
        pos >= self.start && pos < self.end
    }

    /// The block covering `self` followed by `next`
    pub fn join(&self, next: &Block) -> Block {
        debug_assert_eq!(self.end, next.start);
        Block::new(self.start, next.end)
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Split `[0, n)` into blocks of at most `block_size` symbols.
///
/// All blocks have size `ceil(n / k)` or one less; the shorter blocks come
/// last.
pub fn partition_blocks(n: u64, block_size: u64) -> Vec<Block> {
    if n == 0 {
        return Vec::new();
    }
    let count = n.div_ceil(block_size.max(1));
    let size = n.div_ceil(count);
    let reduced = size * count - n;

    let mut blocks = Vec::with_capacity(count as usize);
    let mut start = 0;
    for i in 0..count {
        let len = if i >= count - reduced { size - 1 } else { size };
        blocks.push(Block::new(start, start + len));
        start += len;
    }
    blocks
}

/// Files backing a block's current state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockFiles {
    /// Run-length BWT fragments in rank order
    pub bwt: BwtFileSet,
    /// Sampled ISA, `(rank, position)` pairs sorted by rank
    pub isa: PathBuf,
    /// GT bit vector, one bit per block position
    pub gt: PathBuf,
}

impl BlockFiles {
    pub fn release(self, ctx: &WorkspaceContext) -> Result<()> {
        self.bwt.release(ctx)?;
        ctx.release(&self.isa)?;
        ctx.release(&self.gt)?;
        Ok(())
    }
}

/// A block whose suffixes are sorted
#[derive(Debug, Clone)]
pub struct BlockSortResult {
    pub block: Block,
    /// Rank of the suffix starting at `block.start`
    pub p0_rank: u64,
    /// Number of block suffixes smaller than the suffix at `block.end`
    pub end_rank: u64,
    /// `T[end - 1]`, the symbol held by the `p0_rank` slot
    pub last_symbol: u8,
    pub histogram: Histogram,
    /// Number of sampled ISA entries
    pub isa_samples: u64,
    pub files: BlockFiles,
}

impl BlockSortResult {
    pub fn len(&self) -> u64 {
        self.block.len()
    }

    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }
}
