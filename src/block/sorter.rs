//! Leaf block sorting.
//!
//! A leaf is sorted directly: its start positions are ordered by comparing
//! full text suffixes in parallel, then the BWT, GT bits and ISA samples are
//! read off the sorted order.

use super::files::{IsaSample, store_isa};
use super::types::{Block, BlockFiles, BlockSortResult};
use crate::codec::{BitBuf, BwtFileSet};
use crate::config::BuildConfig;
use crate::text::Histogram;
use crate::utils::WorkspaceContext;
use anyhow::{Context, Result};
use rayon::prelude::*;

/// Produces the initial sorted state of a leaf block
pub trait BlockSorter: Sync {
    fn sort_block(
        &self,
        text: &[u8],
        block: Block,
        ctx: &WorkspaceContext,
        cfg: &BuildConfig,
    ) -> Result<BlockSortResult>;
}

/// Sorts a block's suffixes in memory with a parallel comparison sort
pub struct InMemorySorter;

impl InMemorySorter {
    /// Bytes needed to sort a block of `len` symbols
    pub fn footprint(len: u64) -> u64 {
        // positions, inverse ranks, BWT bytes
        len * (8 + 8 + 1)
    }
}

impl BlockSorter for InMemorySorter {
    fn sort_block(
        &self,
        text: &[u8],
        block: Block,
        ctx: &WorkspaceContext,
        cfg: &BuildConfig,
    ) -> Result<BlockSortResult> {
        let (s, e) = (block.start as usize, block.end as usize);
        let m = e - s;

        let mut sa: Vec<u64> = (block.start..block.end).collect();
        sa.par_sort_unstable_by(|&p, &q| text[p as usize..].cmp(&text[q as usize..]));

        let mut ranks = vec![0u64; m];
        for (r, &p) in sa.iter().enumerate() {
            ranks[p as usize - s] = r as u64;
        }
        let p0_rank = ranks[0];
        let last_symbol = text[e - 1];

        let bwt: Vec<u8> = sa
            .par_iter()
            .map(|&p| {
                if p == block.start {
                    last_symbol
                } else {
                    text[p as usize - 1]
                }
            })
            .collect();

        let end_rank = if e == text.len() {
            0
        } else {
            let boundary = &text[e..];
            sa.partition_point(|&p| &text[p as usize..] < boundary) as u64
        };

        let mut gt = BitBuf::with_capacity(m as u64);
        for &r in &ranks[1..] {
            gt.push(r > p0_rank);
        }
        gt.push(end_rank > p0_rank);

        let mut samples: Vec<IsaSample> = sa
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p == block.start || p % cfg.internal_isa_rate == 0)
            .map(|(r, &p)| IsaSample::new(r as u64, p))
            .collect();
        samples.sort_unstable();

        let bwt_files = BwtFileSet::write_bytes(ctx, "leaf", &bwt)
            .with_context(|| format!("Failed to write BWT of leaf {block}"))?;
        let isa = store_isa(ctx, "leaf", &samples)?;
        let gt_path = ctx.unique_path("leaf", "gt");
        gt.write_file(&gt_path)?;

        log::debug!("Sorted leaf {block}: p0={p0_rank} end_rank={end_rank}");

        Ok(BlockSortResult {
            block,
            p0_rank,
            end_rank,
            last_symbol,
            histogram: Histogram::of(&text[s..e]),
            isa_samples: samples.len() as u64,
            files: BlockFiles {
                bwt: bwt_files,
                isa,
                gt: gt_path,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::files::read_isa_file;
    use tempfile::tempdir;

    #[test]
    fn test_banana_block_state() {
        let text = b"banana";
        let parent = tempdir().unwrap();
        let ctx = WorkspaceContext::new(parent.path()).unwrap();
        let cfg = BuildConfig::default();

        // Suffixes of [0, 3) sort as anana(1), banana(0), nana(2)
        let result = InMemorySorter.sort_block(text, Block::new(0, 3), &ctx, &cfg).unwrap();
        assert_eq!(result.p0_rank, 1);
        assert_eq!(result.last_symbol, b'n');
        assert_eq!(result.files.bwt.read_all().unwrap(), b"bna");
        // "ana" is a prefix of "anana", so it sorts first
        assert_eq!(result.end_rank, 0);

        let gt = BitBuf::read_file(&result.files.gt).unwrap();
        let bits: Vec<bool> = (0..gt.len()).map(|i| gt.get(i)).collect();
        // anana < banana, nana > banana, ana < banana
        assert_eq!(bits, vec![false, true, false]);

        let isa = read_isa_file(&result.files.isa).unwrap();
        assert_eq!(isa, vec![IsaSample::new(1, 0)]);
        assert_eq!(result.histogram.count(b'a'), 1);
    }

    #[test]
    fn test_last_block_has_zero_end_rank() {
        let text = b"abracadabra";
        let parent = tempdir().unwrap();
        let ctx = WorkspaceContext::new(parent.path()).unwrap();
        let cfg = BuildConfig {
            internal_isa_rate: 4,
            ..Default::default()
        };
        let result = InMemorySorter.sort_block(text, Block::new(6, 11), &ctx, &cfg).unwrap();
        assert_eq!(result.end_rank, 0);
        let isa = read_isa_file(&result.files.isa).unwrap();
        let mut positions: Vec<u64> = isa.iter().map(|s| s.pos).collect();
        positions.sort();
        assert_eq!(positions, vec![6, 8]);
        assert!(isa.windows(2).all(|w| w[0].rank < w[1].rank));
    }
}
