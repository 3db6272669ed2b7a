//! Sampled SA and ISA from the root BWT.
//!
//! The root's ISA samples, ordered by text position, cut the text into
//! windows. Each window replays LF from its right sample down to its left
//! one, checking every BWT symbol against the text and the final rank
//! against the left sample. Windows are independent and run in parallel;
//! each task writes its samples to sorted run files, and the runs are
//! merged into the final `.sa` and `.isa` files.

use crate::block::{IsaSample, LfIndex};
use crate::config::BuildConfig;
use crate::error::BwtError;
use crate::output::{OutputPaths, SampleKind, SampledArrayWriter, StagedFile};
use crate::utils::{WorkspaceContext, read_u64_le, try_read_u64_le, write_u64_le};
use anyhow::{Context, Result, anyhow, ensure};
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

/// Staged `.sa` and `.isa` files
pub struct SampledOutputs {
    pub sa: StagedFile,
    pub isa: StagedFile,
    pub sa_samples: u64,
    pub isa_samples: u64,
}

#[derive(Default)]
struct WindowSamples {
    /// `(rank, position)`
    sa: Vec<(u64, u64)>,
    /// `(position, rank)`
    isa: Vec<(u64, u64)>,
}

impl WindowSamples {
    #[inline]
    fn visit(&mut self, pos: u64, rank: u64, sa_rate: u64, isa_rate: u64) {
        if rank % sa_rate == 0 {
            self.sa.push((rank, pos));
        }
        if pos % isa_rate == 0 {
            self.isa.push((pos, rank));
        }
    }
}

/// Walk from `to` down to `from`, visiting every position in `[from.pos, to.pos)`
fn walk_window(
    text: &[u8],
    lf: &LfIndex,
    from: IsaSample,
    to: IsaSample,
    cfg: &BuildConfig,
    out: &mut WindowSamples,
) -> Result<()> {
    let (mut pos, mut rank) = (to.pos, to.rank);
    while pos > from.pos {
        let (symbol, next) = lf.lf(rank)?;
        let expected = text[pos as usize - 1];
        if symbol != expected {
            return Err(BwtError::LfSymbolMismatch {
                position: pos - 1,
                expected,
                found: symbol,
            }
            .into());
        }
        pos -= 1;
        rank = next;
        out.visit(pos, rank, cfg.sa_sample_rate, cfg.isa_sample_rate);
    }
    if rank != from.rank {
        return Err(BwtError::LfRankMismatch {
            position: to.pos,
            expected: from.rank,
            actual: rank,
        }
        .into());
    }
    Ok(())
}

fn write_run(ctx: &WorkspaceContext, stem: &str, mut pairs: Vec<(u64, u64)>) -> Result<PathBuf> {
    pairs.sort_unstable();
    let (path, file) = ctx.create(stem, "run")?;
    let mut writer = BufWriter::with_capacity(65536, file);
    for (key, value) in pairs {
        write_u64_le(&mut writer, key)?;
        write_u64_le(&mut writer, value)?;
    }
    writer.flush()?;
    Ok(path)
}

fn next_pair<R: Read>(reader: &mut R) -> Result<Option<(u64, u64)>> {
    match try_read_u64_le(reader)? {
        Some(key) => Ok(Some((key, read_u64_le(reader)?))),
        None => Ok(None),
    }
}

/// k-way merge of sorted runs whose keys must be exactly `0, rate, 2 * rate, ...`
fn merge_runs(runs: &[PathBuf], mut writer: SampledArrayWriter, rate: u64) -> Result<StagedFile> {
    let mut inputs = runs
        .iter()
        .map(|p| {
            File::open(p)
                .map(|f| BufReader::with_capacity(65536, f))
                .with_context(|| format!("Failed to open {}", p.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    // Reverse is to make it a min-heap
    let mut heap = BinaryHeap::new();
    for (i, input) in inputs.iter_mut().enumerate() {
        if let Some(pair) = next_pair(input)? {
            heap.push((Reverse(pair), i));
        }
    }
    let mut expected = 0u64;
    while let Some((Reverse((key, value)), i)) = heap.pop() {
        ensure!(
            key == expected,
            "sample key {key} out of sequence, expected {expected}"
        );
        writer.push(value)?;
        expected += rate;
        if let Some(pair) = next_pair(&mut inputs[i])? {
            heap.push((Reverse(pair), i));
        }
    }
    writer.finish()
}

fn release_all(ctx: &WorkspaceContext, paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        ctx.release(path)?;
    }
    Ok(())
}

/// Produce the sampled SA and ISA of the whole text.
///
/// `lf` indexes the root BWT and `samples` are the root's sampled ISA
/// entries, which always include text position 0.
pub fn reconstruct_samples(
    text: &[u8],
    lf: &LfIndex,
    samples: &[IsaSample],
    ctx: &WorkspaceContext,
    cfg: &BuildConfig,
    paths: &OutputPaths,
) -> Result<SampledOutputs> {
    let n = text.len() as u64;
    let last = *text.last().ok_or_else(|| anyhow!("empty text"))?;
    if lf.len() != n {
        return Err(BwtError::StreamLengthMismatch {
            node: 0,
            expected: n,
            actual: lf.len(),
        }
        .into());
    }

    let mut anchors: Vec<IsaSample> = samples.to_vec();
    anchors.sort_unstable_by_key(|s| s.pos);
    anchors.dedup();
    ensure!(
        anchors.first().map(|s| s.pos) == Some(0),
        "root ISA samples do not include text position 0"
    );
    // The one-symbol suffix at n - 1 is the smallest suffix starting with it
    let tail = IsaSample::new(lf.cumulative()[last as usize], n - 1);
    match anchors.last() {
        Some(s) if s.pos == n - 1 => {
            if s.rank != tail.rank {
                return Err(BwtError::LfRankMismatch {
                    position: n - 1,
                    expected: s.rank,
                    actual: tail.rank,
                }
                .into());
            }
        }
        _ => anchors.push(tail),
    }

    let windows = anchors.len() - 1;
    let per_task = windows.div_ceil(cfg.work_packets()).max(1);
    let firsts: Vec<usize> = if windows == 0 {
        vec![0]
    } else {
        (0..windows).step_by(per_task).collect()
    };
    log::info!(
        "Reconstructing samples from {} anchors in {} tasks",
        anchors.len(),
        firsts.len()
    );

    let runs: Vec<(PathBuf, PathBuf)> = firsts
        .into_par_iter()
        .map(|first| {
            let end = (first + per_task).min(windows);
            let mut out = WindowSamples::default();
            for w in first..end {
                walk_window(text, lf, anchors[w], anchors[w + 1], cfg, &mut out)?;
            }
            if end == windows {
                out.visit(tail.pos, tail.rank, cfg.sa_sample_rate, cfg.isa_sample_rate);
            }
            Ok((
                write_run(ctx, "sa", out.sa)?,
                write_run(ctx, "isa", out.isa)?,
            ))
        })
        .collect::<Result<_>>()?;
    let (sa_runs, isa_runs): (Vec<PathBuf>, Vec<PathBuf>) = runs.into_iter().unzip();

    let sa_samples = n.div_ceil(cfg.sa_sample_rate);
    let isa_samples = n.div_ceil(cfg.isa_sample_rate);
    let sa = merge_runs(
        &sa_runs,
        SampledArrayWriter::create(&paths.sa, SampleKind::Sa, cfg.sa_sample_rate, sa_samples)?,
        cfg.sa_sample_rate,
    )
    .with_context(|| format!("Failed to write {}", paths.sa.display()))?;
    let isa = merge_runs(
        &isa_runs,
        SampledArrayWriter::create(&paths.isa, SampleKind::Isa, cfg.isa_sample_rate, isa_samples)?,
        cfg.isa_sample_rate,
    )
    .with_context(|| format!("Failed to write {}", paths.isa.display()))?;
    release_all(ctx, &sa_runs)?;
    release_all(ctx, &isa_runs)?;

    log::info!("Wrote {sa_samples} SA and {isa_samples} ISA samples");
    Ok(SampledOutputs {
        sa,
        isa,
        sa_samples,
        isa_samples,
    })
}

/// Text position of rank `rank`, found by LF-stepping to a sampled rank
pub fn locate(lf: &LfIndex, sa: &[u64], sa_rate: u64, rank: u64) -> Result<u64> {
    let (mut r, mut steps) = (rank, 0u64);
    loop {
        if r % sa_rate == 0 {
            let pos = sa
                .get((r / sa_rate) as usize)
                .ok_or_else(|| anyhow!("rank {r} beyond the sampled SA"))?;
            return Ok(pos + steps);
        }
        if r == lf.p0() {
            // Suffix 0 is never preceded by another suffix
            return Ok(steps);
        }
        ensure!(steps < lf.len(), "no sampled rank reachable from {rank}");
        r = lf.lf(r)?.1;
        steps += 1;
    }
}
