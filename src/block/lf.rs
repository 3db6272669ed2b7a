//! LF mapping over a block BWT.
//!
//! A block's BWT differs from a whole-text BWT in one slot: the rank of the
//! block's first suffix (`p0`) holds `T[end - 1]` instead of the symbol
//! before the block. That slot stands for the suffix `T[end - 1..]`, whose
//! successor `T[end..]` lies outside the block, so occurrences of the last
//! symbol are corrected by comparing against the boundary suffix `T[end..]`.

use super::types::BlockSortResult;
use crate::codec::{HuffmanCode, HuffmanWaveletTree};
use crate::error::BwtError;
use anyhow::Result;

pub struct LfIndex {
    wt: HuffmanWaveletTree,
    cumulative: [u64; 257],
    p0: u64,
    end_rank: u64,
    last: u8,
    block_start: u64,
}

impl LfIndex {
    /// Build the wavelet tree of a block's BWT
    pub fn build(result: &BlockSortResult, code: &HuffmanCode) -> Result<Self> {
        let wt = HuffmanWaveletTree::build(&result.files.bwt, code)?;
        Ok(Self::from_tree(wt, result))
    }

    /// Wrap an existing wavelet tree of the block's BWT
    pub fn from_tree(wt: HuffmanWaveletTree, result: &BlockSortResult) -> Self {
        Self {
            wt,
            cumulative: result.histogram.cumulative(),
            p0: result.p0_rank,
            end_rank: result.end_rank,
            last: result.last_symbol,
            block_start: result.block.start,
        }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.wt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wt.is_empty()
    }

    pub fn p0(&self) -> u64 {
        self.p0
    }

    pub fn end_rank(&self) -> u64 {
        self.end_rank
    }

    pub fn last_symbol(&self) -> u8 {
        self.last
    }

    pub fn cumulative(&self) -> &[u64; 257] {
        &self.cumulative
    }

    pub fn size_in_bytes(&self) -> u64 {
        self.wt.size_in_bytes()
    }

    /// Number of block suffixes smaller than `ch·S`, where `S` is the suffix
    /// that `r` block suffixes precede and `boundary_less` tells whether the
    /// boundary suffix `T[end..]` is smaller than `S`.
    #[inline]
    pub fn step(&self, ch: u8, r: u64, boundary_less: bool) -> u64 {
        let base = self.cumulative[ch as usize] + self.wt.rank(ch, r);
        if ch != self.last {
            return base;
        }
        base + boundary_less as u64 - (self.p0 < r) as u64
    }

    /// BWT symbol at `r` and the rank of the suffix one position to the left
    pub fn lf(&self, r: u64) -> Result<(u8, u64)> {
        if r == self.p0 {
            return Err(BwtError::UnreachableSample {
                block_start: self.block_start,
                rank: r,
            }
            .into());
        }
        let (ch, rank) = self.wt.access_rank(r).ok_or(BwtError::UnreachableSample {
            block_start: self.block_start,
            rank: r,
        })?;
        let mut next = self.cumulative[ch as usize] + rank;
        if ch == self.last {
            next = next + (r >= self.end_rank) as u64 - (self.p0 < r) as u64;
        }
        Ok((ch, next))
    }
}
