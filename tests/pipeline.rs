//! End-to-end tests of the construction pipeline against a direct suffix sort.

#[path = "fixtures/utils.rs"]
mod utils;

use bwtmerge::block::{Block, BlockSortResult, BlockSorter, InMemorySorter};
use bwtmerge::merge::MergeKind;
use bwtmerge::output::{BwtOutput, OutputPaths, SampleKind, SampledArray};
use bwtmerge::text::{Histogram, InputText};
use bwtmerge::utils::WorkspaceContext;
use bwtmerge::{BuildConfig, BwtError, build_bwt_with};
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;
use utils::{naive_bwt, naive_sa, naive_sentinel_bwt, random_text, repetitive_text};

fn config(scratch: &Path, block_size: u64, threads: usize) -> BuildConfig {
    BuildConfig {
        block_size,
        threads,
        sa_sample_rate: 4,
        isa_sample_rate: 4,
        internal_isa_rate: 8,
        temp_dir: scratch.to_path_buf(),
        ..Default::default()
    }
}

/// Build, then check the BWT and both sampled arrays against the naive oracle
fn check_pipeline(text: &[u8], cfg: &BuildConfig) {
    let out = tempdir().unwrap();
    let prefix = out.path().join("t");
    let input = InputText::from_bytes(text.to_vec()).unwrap();
    let report = build_bwt_with(&input, &prefix, cfg, &InMemorySorter).unwrap();
    let paths = OutputPaths::new(&prefix);

    let (expected, p0) = naive_bwt(text);
    let bwt = BwtOutput::read_file(&paths.bwt).unwrap();
    assert_eq!(bwt.symbols, expected, "block size {}", cfg.block_size);
    assert_eq!(bwt.p0, p0);
    assert_eq!(report.p0, p0);
    assert_eq!(bwt.to_sentinel_bytes(b'$'), naive_sentinel_bwt(text));
    assert_eq!(bwt.invert(), text);

    assert_eq!(Histogram::read_file(&paths.hist).unwrap(), Histogram::of(text));

    if !cfg.bwt_only {
        let sa = naive_sa(text);
        let sampled_sa = SampledArray::read_file(&paths.sa, SampleKind::Sa).unwrap();
        assert_eq!(sampled_sa.rate, cfg.sa_sample_rate);
        let expected_sa: Vec<u64> = sa.iter().step_by(cfg.sa_sample_rate as usize).copied().collect();
        assert_eq!(sampled_sa.values, expected_sa);

        let mut isa = vec![0u64; text.len()];
        for (r, &p) in sa.iter().enumerate() {
            isa[p as usize] = r as u64;
        }
        let sampled_isa = SampledArray::read_file(&paths.isa, SampleKind::Isa).unwrap();
        let expected_isa: Vec<u64> = isa.iter().step_by(cfg.isa_sample_rate as usize).copied().collect();
        assert_eq!(sampled_isa.values, expected_isa);
    }
}

#[test]
fn test_banana_two_blocks() {
    let scratch = tempdir().unwrap();
    let cfg = config(scratch.path(), 3, 2);
    let out = tempdir().unwrap();
    let prefix = out.path().join("banana");
    let input = InputText::from_bytes(b"banana".to_vec()).unwrap();

    let report = build_bwt_with(&input, &prefix, &cfg, &InMemorySorter).unwrap();
    assert_eq!(report.blocks, 2);
    let bwt = BwtOutput::read_file(&OutputPaths::new(&prefix).bwt).unwrap();
    assert_eq!(bwt.to_sentinel_bytes(b'$'), b"annb$aa");
    check_pipeline(b"banana", &cfg);
}

#[test]
fn test_single_symbol_text() {
    let scratch = tempdir().unwrap();
    check_pipeline(b"z", &config(scratch.path(), 1, 1));
}

#[test]
fn test_all_identical_symbols() {
    let scratch = tempdir().unwrap();
    let text = vec![b'a'; 777];
    for block_size in [1, 7, 64, 500] {
        for kind in [
            None,
            Some(MergeKind::InternalDense),
            Some(MergeKind::InternalSmallByte),
            Some(MergeKind::ExternalSparse),
        ] {
            let cfg = BuildConfig {
                force_merge_kind: kind,
                ..config(scratch.path(), block_size, 3)
            };
            check_pipeline(&text, &cfg);
        }
    }
}

#[test]
fn test_random_texts_across_partitions() {
    let scratch = tempdir().unwrap();
    for (seed, alphabet) in [(1, &b"ab"[..]), (2, b"acgt"), (3, b"abcdefghijklmnopqrstuvwxyz")] {
        let text = random_text(seed, 1500, alphabet);
        for block_size in [100, 333, 1024, 5000] {
            for threads in [1, 4] {
                check_pipeline(&text, &config(scratch.path(), block_size, threads));
            }
        }
    }
}

#[test]
fn test_forced_merge_kinds() {
    let scratch = tempdir().unwrap();
    let text = repetitive_text(9, 2000);
    for kind in [
        MergeKind::InternalDense,
        MergeKind::InternalSmallByte,
        MergeKind::ExternalSparse,
    ] {
        let cfg = BuildConfig {
            force_merge_kind: Some(kind),
            granularity: 3,
            ..config(scratch.path(), 150, 4)
        };
        check_pipeline(&text, &cfg);
    }
}

#[test]
fn test_small_block_groups() {
    let scratch = tempdir().unwrap();
    let text = random_text(21, 1200, b"xyz");
    for max_arity in [2, 3, 5, 8] {
        let cfg = BuildConfig {
            max_arity,
            small_block_size: 1 << 20,
            ..config(scratch.path(), 50, 3)
        };
        check_pipeline(&text, &cfg);
    }
}

#[test]
fn test_length_multiple_of_threads_or_not() {
    let scratch = tempdir().unwrap();
    for len in [96, 97] {
        let text = random_text(len as u64, len, b"ab");
        check_pipeline(&text, &config(scratch.path(), 16, 4));
    }
}

#[test]
fn test_bwt_only_skips_samples() {
    let scratch = tempdir().unwrap();
    let out = tempdir().unwrap();
    let prefix = out.path().join("t");
    let cfg = BuildConfig {
        bwt_only: true,
        write_hwt: false,
        ..config(scratch.path(), 64, 2)
    };
    let input = InputText::from_bytes(random_text(4, 300, b"ab")).unwrap();
    let report = build_bwt_with(&input, &prefix, &cfg, &InMemorySorter).unwrap();

    let paths = OutputPaths::new(&prefix);
    assert!(paths.bwt.exists());
    assert!(paths.hist.exists());
    assert!(!paths.sa.exists());
    assert!(!paths.isa.exists());
    assert!(!paths.hwt.exists());
    assert_eq!(report.sa_samples, None);
    assert_eq!(report.outputs.len(), 2);
}

#[test]
fn test_workspace_is_removed() {
    let scratch = tempdir().unwrap();
    check_pipeline(&random_text(8, 600, b"ab"), &config(scratch.path(), 50, 2));
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn test_budget_too_small_for_a_leaf() {
    let scratch = tempdir().unwrap();
    let out = tempdir().unwrap();
    let cfg = BuildConfig {
        memory_budget: 100,
        ..config(scratch.path(), 1000, 1)
    };
    let input = InputText::from_bytes(random_text(5, 1000, b"ab")).unwrap();
    let err = build_bwt_with(&input, &out.path().join("t"), &cfg, &InMemorySorter).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BwtError>(),
        Some(BwtError::BudgetTooSmall { .. })
    ));
}

#[test]
fn test_empty_input_is_rejected() {
    let err = InputText::from_bytes(Vec::new()).err().unwrap();
    assert!(matches!(
        err.downcast_ref::<BwtError>(),
        Some(BwtError::EmptyInput(_))
    ));

    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.txt");
    std::fs::write(&path, b"").unwrap();
    let err = InputText::open(&path).err().unwrap();
    assert!(matches!(
        err.downcast_ref::<BwtError>(),
        Some(BwtError::EmptyInput(_))
    ));
}

/// Sorts leaves correctly but fails on one of them
struct FailOnBlock(u64);

impl BlockSorter for FailOnBlock {
    fn sort_block(
        &self,
        text: &[u8],
        block: Block,
        ctx: &WorkspaceContext,
        cfg: &BuildConfig,
    ) -> anyhow::Result<BlockSortResult> {
        if block.start == self.0 {
            anyhow::bail!("simulated failure");
        }
        InMemorySorter.sort_block(text, block, ctx, cfg)
    }
}

#[test]
fn test_failed_run_leaves_no_output() {
    let scratch = tempdir().unwrap();
    let out = tempdir().unwrap();
    let prefix = out.path().join("t");
    let cfg = config(scratch.path(), 100, 3);
    let input = InputText::from_bytes(random_text(6, 1000, b"ab")).unwrap();

    let err = build_bwt_with(&input, &prefix, &cfg, &FailOnBlock(500)).unwrap_err();
    assert!(format!("{err:#}").contains("simulated failure"));
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn test_cli_build_and_verify() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("input.txt");
    std::fs::write(&input, random_text(12, 2000, b"acgt")).unwrap();
    let prefix = dir.path().join("out");
    let bin = env!("CARGO_BIN_EXE_bwtmerge");

    let build = Command::new(bin)
        .args(["build", "--quiet", "--block-size", "300", "--sa-rate", "8", "-j", "2"])
        .arg(&input)
        .arg("-o")
        .arg(&prefix)
        .arg("--temp-dir")
        .arg(dir.path())
        .output()
        .expect("Failed to run bwtmerge build");
    assert!(build.status.success(), "{}", String::from_utf8_lossy(&build.stderr));

    let verify = Command::new(bin)
        .arg("verify")
        .arg(&prefix)
        .arg(&input)
        .output()
        .expect("Failed to run bwtmerge verify");
    assert!(verify.status.success(), "{}", String::from_utf8_lossy(&verify.stderr));
    let stdout = String::from_utf8_lossy(&verify.stdout);
    assert!(stdout.contains("BWT OK: 2000 symbols"));
    assert!(stdout.contains("Samples OK"));
}
