//! End-to-end construction: histogram, leaf sorting, tree merging and the
//! final artifacts.

use crate::block::files::read_isa_file;
use crate::block::{BlockSorter, InMemorySorter, LfIndex, partition_blocks};
use crate::codec::{HuffmanCode, HwtBuildRequest};
use crate::config::BuildConfig;
use crate::merge::{FootprintModel, MergeEnv, MergeTreeBuilder, TaskGraph, run_tree};
use crate::output::{OutputPaths, StagedFile, commit_outputs, write_bwt};
use crate::reconstruct::reconstruct_samples;
use crate::text::{Histogram, InputText};
use crate::utils::WorkspaceContext;
use crate::utils::progress::node_progress;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub text_len: u64,
    pub p0: u64,
    pub blocks: usize,
    pub tree_nodes: usize,
    pub tree_depth: usize,
    pub sa_samples: Option<u64>,
    pub isa_samples: Option<u64>,
    pub outputs: Vec<PathBuf>,
    pub elapsed: Duration,
}

/// Build the BWT of the file at `input`, writing artifacts under `prefix`
pub fn build_bwt(input: &Path, prefix: &Path, cfg: &BuildConfig) -> Result<BuildReport> {
    let text = InputText::open(input)?;
    build_bwt_with(&text, prefix, cfg, &InMemorySorter)
}

/// Build with an explicit leaf sorter
pub fn build_bwt_with(
    text: &InputText,
    prefix: &Path,
    cfg: &BuildConfig,
    sorter: &dyn BlockSorter,
) -> Result<BuildReport> {
    cfg.validate()?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.threads)
        .build()
        .context("Failed to create thread pool")?;
    pool.install(|| run(text, prefix, cfg, sorter))
}

fn run(
    text: &InputText,
    prefix: &Path,
    cfg: &BuildConfig,
    sorter: &dyn BlockSorter,
) -> Result<BuildReport> {
    let start = Instant::now();
    let bytes = text.as_bytes();
    let n = text.len();

    let histogram = Histogram::of_parallel(bytes);
    let code = HuffmanCode::from_histogram(&histogram)?;
    log::info!(
        "Text: {n} symbols, alphabet {}, {:.2} bits/symbol",
        histogram.sigma(),
        code.average_length(&histogram)
    );

    let blocks = partition_blocks(n, cfg.block_size);
    let model = FootprintModel::new(&histogram, &code);
    let tree = MergeTreeBuilder::new(cfg, model).build(&blocks)?;

    let ctx = WorkspaceContext::new(&cfg.temp_dir)?;
    let graph = TaskGraph::from_tree(&tree);
    let progress = node_progress(graph.len() as u64, cfg.progress);
    progress.set_message("sorting and merging");
    let env = MergeEnv {
        text: bytes,
        code: &code,
        ctx: &ctx,
        cfg,
    };
    let root = run_tree(&graph, env, sorter, &progress)?;
    progress.finish_with_message("merged");
    log::info!(
        "Merged {} blocks in {:.2?}, p0={}",
        blocks.len(),
        start.elapsed(),
        root.p0_rank
    );

    let paths = OutputPaths::new(prefix);
    let bwt = write_bwt(&paths.bwt, &root.files.bwt, root.p0_rank)?;
    let mut staged: Vec<StagedFile> = Vec::new();

    let hist = StagedFile::new(&paths.hist);
    histogram.write_file(hist.path())?;

    let mut sa_samples = None;
    let mut isa_samples = None;
    if cfg.write_hwt || !cfg.bwt_only {
        let hwt = StagedFile::new(&paths.hwt);
        let request = HwtBuildRequest {
            bwt: root.files.bwt.clone(),
            histogram: hist.path().to_path_buf(),
            output: if cfg.write_hwt {
                hwt.path().to_path_buf()
            } else {
                ctx.unique_path("root", "hwt")
            },
        };
        let request_path = request.store(&ctx)?;
        let wavelet = HwtBuildRequest::load(&request_path)?.execute()?;
        ctx.release(&request_path)?;
        if cfg.write_hwt {
            staged.push(hwt);
        } else {
            ctx.release(&request.output)?;
        }

        if !cfg.bwt_only {
            let lf = LfIndex::from_tree(wavelet, &root);
            let samples = read_isa_file(&root.files.isa)?;
            let sampled = reconstruct_samples(bytes, &lf, &samples, &ctx, cfg, &paths)?;
            sa_samples = Some(sampled.sa_samples);
            isa_samples = Some(sampled.isa_samples);
            staged.push(sampled.sa);
            staged.push(sampled.isa);
        }
    }
    staged.push(hist);

    let outputs = commit_outputs(bwt, staged)?;
    root.files.release(&ctx)?;

    let report = BuildReport {
        text_len: n,
        p0: root.p0_rank,
        blocks: blocks.len(),
        tree_nodes: tree.node_count(),
        tree_depth: tree.depth(),
        sa_samples,
        isa_samples,
        outputs,
        elapsed: start.elapsed(),
    };
    log::info!("Done in {:.2?}", report.elapsed);
    Ok(report)
}
