//! Sampled ISA files.
//!
//! A sampled ISA file is a flat sequence of little-endian `(rank, position)`
//! `u64` pairs sorted by rank. The count is carried by the owning
//! [`BlockSortResult`](super::BlockSortResult).

use crate::error::BwtError;
use crate::utils::{WorkspaceContext, read_u64_le, try_read_u64_le, write_u64_le};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IsaSample {
    pub rank: u64,
    pub pos: u64,
}

impl IsaSample {
    pub fn new(rank: u64, pos: u64) -> Self {
        Self { rank, pos }
    }
}

pub fn write_isa_file(path: &Path, samples: &[IsaSample]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::with_capacity(65536, file);
    for s in samples {
        write_u64_le(&mut writer, s.rank)?;
        write_u64_le(&mut writer, s.pos)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write samples to a fresh workspace file
pub fn store_isa(ctx: &WorkspaceContext, stem: &str, samples: &[IsaSample]) -> Result<PathBuf> {
    let path = ctx.unique_path(stem, "isa");
    write_isa_file(&path, samples)?;
    Ok(path)
}

pub fn read_isa_file(path: &Path) -> Result<Vec<IsaSample>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::with_capacity(65536, file);
    let mut samples = Vec::new();
    while let Some(rank) = try_read_u64_le(&mut reader)? {
        let pos = read_u64_le(&mut reader).map_err(|_| BwtError::BadFile {
            file: path.display().to_string(),
            reason: "truncated ISA sample".into(),
        })?;
        samples.push(IsaSample { rank, pos });
    }
    Ok(samples)
}
