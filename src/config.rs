//! Build configuration

use crate::error::BwtError;
use crate::merge::tree::MergeKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for a BWT construction run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Total memory budget in bytes (default: 1 GiB)
    pub memory_budget: u64,
    /// Worker threads (default: available parallelism)
    pub threads: usize,
    /// Target leaf block size in bytes (default: 16 MiB)
    pub block_size: u64,
    /// Suffix array sampling rate, a power of two (default: 32)
    pub sa_sample_rate: u64,
    /// Inverse suffix array sampling rate, a power of two (default: 32)
    pub isa_sample_rate: u64,
    /// ISA sampling rate of intermediate blocks, a power of two (default: 64).
    /// Bounds the LF steps needed to recover a suffix position during merging.
    pub internal_isa_rate: u64,
    /// Skip sampled SA/ISA reconstruction
    pub bwt_only: bool,
    /// Work packets per thread for parallel splits (default: 4)
    pub granularity: usize,
    /// Maximum number of children of a small-block merge (default: 8)
    pub max_arity: usize,
    /// Blocks at most this large are merged k-ary (default: 1 MiB)
    pub small_block_size: u64,
    /// Force one merge kind for every internal node
    pub force_merge_kind: Option<MergeKind>,
    /// Directory for the scratch workspace
    pub temp_dir: PathBuf,
    /// Also write the wavelet tree of the final BWT (`.hwt`)
    pub write_hwt: bool,
    /// Show progress bars
    pub progress: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            memory_budget: 1 << 30,
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            block_size: 16 << 20,
            sa_sample_rate: 32,
            isa_sample_rate: 32,
            internal_isa_rate: 64,
            bwt_only: false,
            granularity: 4,
            max_arity: 8,
            small_block_size: 1 << 20,
            force_merge_kind: None,
            temp_dir: std::env::temp_dir(),
            write_hwt: true,
            progress: false,
        }
    }
}

impl BuildConfig {
    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open config {}", path.display()))?;
        let config: BuildConfig = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(BwtError::InvalidConfig(msg).into()) };

        if self.threads == 0 {
            return invalid("thread count must be positive".into());
        }
        if self.block_size == 0 {
            return invalid("block size must be positive".into());
        }
        if self.granularity == 0 {
            return invalid("granularity must be positive".into());
        }
        if self.max_arity < 2 {
            return invalid(format!("max arity {} is below 2", self.max_arity));
        }
        for (name, rate) in [
            ("SA sampling rate", self.sa_sample_rate),
            ("ISA sampling rate", self.isa_sample_rate),
            ("internal ISA sampling rate", self.internal_isa_rate),
        ] {
            if !rate.is_power_of_two() {
                return invalid(format!("{name} {rate} is not a power of two"));
            }
        }
        Ok(())
    }

    /// Number of parallel work units for splitting one merge
    pub fn work_packets(&self) -> usize {
        self.threads * self.granularity
    }
}
