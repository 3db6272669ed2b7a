//! Output artifacts: `.bwt`, `.hist`, `.sa`, `.isa` and `.hwt`.
//!
//! Every artifact is first written next to its destination under a `.tmp`
//! name and only renamed into place by [`StagedFile::commit`], so a failed
//! run never leaves a file that looks complete.

use crate::codec::{BwtFileSet, RunLengthWriter};
use crate::codec::rle::decode_all;
use crate::error::BwtError;
use crate::utils::{read_u32_le, read_u64_le, write_u32_le, write_u64_le};
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const BWT_MAGIC: u32 = 0x4D545742; // "BWTM" in little-endian
pub const SA_MAGIC: u32 = 0x41534D42; // "BMSA"
pub const ISA_MAGIC: u32 = 0x49534D42; // "BMSI"
pub const FORMAT_VERSION: u32 = 1;

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Artifact paths sharing one prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub bwt: PathBuf,
    pub hist: PathBuf,
    pub sa: PathBuf,
    pub isa: PathBuf,
    pub hwt: PathBuf,
}

impl OutputPaths {
    pub fn new(prefix: &Path) -> Self {
        Self {
            bwt: with_suffix(prefix, ".bwt"),
            hist: with_suffix(prefix, ".hist"),
            sa: with_suffix(prefix, ".sa"),
            isa: with_suffix(prefix, ".isa"),
            hwt: with_suffix(prefix, ".hwt"),
        }
    }
}

/// A file written under a temporary name until committed
pub struct StagedFile {
    tmp: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl StagedFile {
    pub fn new(dest: &Path) -> Self {
        Self {
            tmp: with_suffix(dest, ".tmp"),
            dest: dest.to_path_buf(),
            committed: false,
        }
    }

    /// Where the content is written before commit
    pub fn path(&self) -> &Path {
        &self.tmp
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    pub fn create(&self) -> Result<BufWriter<File>> {
        let file = File::create(&self.tmp)
            .with_context(|| format!("Failed to create {}", self.tmp.display()))?;
        Ok(BufWriter::with_capacity(65536, file))
    }

    pub fn commit(mut self) -> Result<PathBuf> {
        fs::rename(&self.tmp, &self.dest).with_context(|| {
            format!(
                "Failed to move {} to {}",
                self.tmp.display(),
                self.dest.display()
            )
        })?;
        self.committed = true;
        Ok(self.dest.clone())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

/// Commit `rest`, then `bwt`; returns the destinations with `.bwt` last.
///
/// A `.bwt` file at the destination therefore means every other artifact of
/// the run is in place too. On failure the uncommitted files are removed.
pub fn commit_outputs(bwt: StagedFile, rest: Vec<StagedFile>) -> Result<Vec<PathBuf>> {
    let mut outputs = rest
        .into_iter()
        .map(StagedFile::commit)
        .collect::<Result<Vec<_>>>()?;
    outputs.push(bwt.commit()?);
    Ok(outputs)
}

/// Header of a `.bwt` file
#[derive(Debug, Clone, Copy)]
pub struct BwtHeader {
    pub magic: u32,
    pub version: u32,
    /// Number of symbols
    pub len: u64,
    /// Rank of the whole text's first suffix; its slot holds the last symbol
    pub p0: u64,
}

impl BwtHeader {
    /// Size of header in bytes
    pub const SIZE: usize = 4 + 4 + 8 + 8;

    pub fn new(len: u64, p0: u64) -> Self {
        Self {
            magic: BWT_MAGIC,
            version: FORMAT_VERSION,
            len,
            p0,
        }
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        write_u32_le(writer, self.magic)?;
        write_u32_le(writer, self.version)?;
        write_u64_le(writer, self.len)?;
        write_u64_le(writer, self.p0)
    }

    fn read_from<R: Read>(reader: &mut R, name: &str) -> Result<Self> {
        let header = Self {
            magic: read_u32_le(reader)?,
            version: read_u32_le(reader)?,
            len: read_u64_le(reader)?,
            p0: read_u64_le(reader)?,
        };
        if header.magic != BWT_MAGIC {
            return Err(bad_file(name, format!("bad magic {:#010x}", header.magic)));
        }
        if header.version != FORMAT_VERSION {
            return Err(bad_file(name, format!("unsupported version {}", header.version)));
        }
        if header.len > 0 && header.p0 >= header.len {
            return Err(bad_file(name, format!("p0 {} outside {} symbols", header.p0, header.len)));
        }
        Ok(header)
    }
}

fn bad_file(name: &str, reason: String) -> anyhow::Error {
    BwtError::BadFile {
        file: name.to_string(),
        reason,
    }
    .into()
}

/// Stage the root BWT as one run-length stream behind a header
pub fn write_bwt(dest: &Path, bwt: &BwtFileSet, p0: u64) -> Result<StagedFile> {
    let staged = StagedFile::new(dest);
    let mut writer = staged.create()?;
    BwtHeader::new(bwt.len(), p0).write_to(&mut writer)?;
    let mut rle = RunLengthWriter::new(writer);
    bwt.copy_to(&mut rle)?;
    let (mut writer, written) = rle.finish()?;
    writer.flush()?;
    if written != bwt.len() {
        return Err(bad_file(
            &dest.display().to_string(),
            format!("wrote {written} symbols, expected {}", bwt.len()),
        ));
    }
    Ok(staged)
}

/// A decoded `.bwt` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BwtOutput {
    pub p0: u64,
    pub symbols: Vec<u8>,
}

impl BwtOutput {
    pub fn read_file(path: &Path) -> Result<Self> {
        let name = path.display().to_string();
        let file = File::open(path).with_context(|| format!("Failed to open {name}"))?;
        let mut reader = BufReader::new(file);
        let header = BwtHeader::read_from(&mut reader, &name)?;
        let symbols = decode_all(reader).with_context(|| format!("Failed to decode {name}"))?;
        if symbols.len() as u64 != header.len {
            return Err(bad_file(
                &name,
                format!("{} symbols, header says {}", symbols.len(), header.len),
            ));
        }
        Ok(Self {
            p0: header.p0,
            symbols,
        })
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// The `n + 1` symbol BWT of the text followed by `sentinel`
    pub fn to_sentinel_bytes(&self, sentinel: u8) -> Vec<u8> {
        if self.symbols.is_empty() {
            return vec![sentinel];
        }
        let p0 = self.p0 as usize;
        let mut out = Vec::with_capacity(self.symbols.len() + 1);
        out.push(self.symbols[p0]);
        out.extend_from_slice(&self.symbols);
        out[p0 + 1] = sentinel;
        out
    }

    /// Recover the text by walking LF from the terminator row
    pub fn invert(&self) -> Vec<u8> {
        let n = self.symbols.len();
        if n == 0 {
            return Vec::new();
        }
        let sentinel_row = self.p0 as usize + 1;
        let mut last = self.symbols.clone();
        last.insert(0, self.symbols[self.p0 as usize]);

        // Terminator sorts below every byte, so byte `c` starts at 1 + count(< c)
        let mut starts = [0usize; 256];
        let mut counts = [0usize; 256];
        for (row, &c) in last.iter().enumerate() {
            if row != sentinel_row {
                counts[c as usize] += 1;
            }
        }
        let mut acc = 1;
        for c in 0..256 {
            starts[c] = acc;
            acc += counts[c];
        }

        let mut lf = vec![0usize; n + 1];
        let mut seen = [0usize; 256];
        for (row, &c) in last.iter().enumerate() {
            if row == sentinel_row {
                continue;
            }
            lf[row] = starts[c as usize] + seen[c as usize];
            seen[c as usize] += 1;
        }

        let mut text = vec![0u8; n];
        let mut row = 0;
        for k in (0..n).rev() {
            text[k] = last[row];
            row = lf[row];
        }
        text
    }
}

/// Which sampled array a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// Text positions of every `rate`-th rank
    Sa,
    /// Ranks of every `rate`-th text position
    Isa,
}

impl SampleKind {
    fn magic(self) -> u32 {
        match self {
            SampleKind::Sa => SA_MAGIC,
            SampleKind::Isa => ISA_MAGIC,
        }
    }
}

/// Streams the values of a sampled array behind its header
pub struct SampledArrayWriter {
    staged: StagedFile,
    writer: BufWriter<File>,
    expected: u64,
    written: u64,
}

impl SampledArrayWriter {
    pub fn create(dest: &Path, kind: SampleKind, rate: u64, count: u64) -> Result<Self> {
        let staged = StagedFile::new(dest);
        let mut writer = staged.create()?;
        write_u32_le(&mut writer, kind.magic())?;
        write_u32_le(&mut writer, FORMAT_VERSION)?;
        write_u64_le(&mut writer, rate)?;
        write_u64_le(&mut writer, count)?;
        Ok(Self {
            staged,
            writer,
            expected: count,
            written: 0,
        })
    }

    #[inline]
    pub fn push(&mut self, value: u64) -> Result<()> {
        write_u64_le(&mut self.writer, value)?;
        self.written += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<StagedFile> {
        self.writer.flush()?;
        if self.written != self.expected {
            return Err(bad_file(
                &self.staged.dest().display().to_string(),
                format!("wrote {} samples, expected {}", self.written, self.expected),
            ));
        }
        Ok(self.staged)
    }
}

/// A decoded `.sa` or `.isa` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledArray {
    pub rate: u64,
    pub values: Vec<u64>,
}

impl SampledArray {
    pub fn read_file(path: &Path, kind: SampleKind) -> Result<Self> {
        let name = path.display().to_string();
        let file = File::open(path).with_context(|| format!("Failed to open {name}"))?;
        let mut reader = BufReader::new(file);
        let magic = read_u32_le(&mut reader)?;
        if magic != kind.magic() {
            return Err(bad_file(&name, format!("bad magic {magic:#010x}")));
        }
        let version = read_u32_le(&mut reader)?;
        if version != FORMAT_VERSION {
            return Err(bad_file(&name, format!("unsupported version {version}")));
        }
        let rate = read_u64_le(&mut reader)?;
        let count = read_u64_le(&mut reader)?;
        let values = (0..count)
            .map(|_| read_u64_le(&mut reader))
            .collect::<std::io::Result<Vec<u64>>>()
            .with_context(|| format!("{name}: truncated after header"))?;
        Ok(Self { rate, values })
    }

    /// Value of sample `i`, i.e. for rank or position `i * rate`
    pub fn get(&self, i: usize) -> Option<u64> {
        self.values.get(i).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::WorkspaceContext;
    use tempfile::tempdir;

    #[test]
    fn test_sentinel_form_of_banana() {
        // Suffixes of "banana": a ana anana banana na nana; "banana" has rank 3
        let out = BwtOutput {
            p0: 3,
            symbols: b"nnbaaa".to_vec(),
        };
        assert_eq!(out.to_sentinel_bytes(b'$'), b"annb$aa");
        assert_eq!(out.invert(), b"banana");
    }

    #[test]
    fn test_bwt_file_is_staged_until_commit() {
        let dir = tempdir().unwrap();
        let ctx = WorkspaceContext::new(dir.path()).unwrap();
        let paths = OutputPaths::new(&dir.path().join("out"));
        let set = BwtFileSet::write_bytes(&ctx, "root", b"nnbaaa").unwrap();

        let staged = write_bwt(&paths.bwt, &set, 3).unwrap();
        assert!(!paths.bwt.exists());
        assert!(staged.path().exists());
        staged.commit().unwrap();

        let out = BwtOutput::read_file(&paths.bwt).unwrap();
        assert_eq!(out.p0, 3);
        assert_eq!(out.symbols, b"nnbaaa");
    }

    #[test]
    fn test_bwt_is_committed_last() {
        let dir = tempdir().unwrap();
        let ctx = WorkspaceContext::new(dir.path()).unwrap();
        let paths = OutputPaths::new(&dir.path().join("out"));
        let set = BwtFileSet::write_bytes(&ctx, "root", b"nnbaaa").unwrap();

        let bwt = write_bwt(&paths.bwt, &set, 3).unwrap();
        let hist = StagedFile::new(&paths.hist);
        File::create(hist.path()).unwrap();
        let outputs = commit_outputs(bwt, vec![hist]).unwrap();
        assert_eq!(outputs, vec![paths.hist.clone(), paths.bwt.clone()]);
        assert!(paths.bwt.exists());
    }

    #[test]
    fn test_failed_commit_leaves_no_bwt() {
        let dir = tempdir().unwrap();
        let ctx = WorkspaceContext::new(dir.path()).unwrap();
        let paths = OutputPaths::new(&dir.path().join("out"));
        let set = BwtFileSet::write_bytes(&ctx, "root", b"nnbaaa").unwrap();

        // A non-empty directory in the way makes the `.sa` rename fail
        fs::create_dir(&paths.sa).unwrap();
        File::create(paths.sa.join("keep")).unwrap();

        let bwt = write_bwt(&paths.bwt, &set, 3).unwrap();
        let bwt_tmp = bwt.path().to_path_buf();
        let hist = StagedFile::new(&paths.hist);
        File::create(hist.path()).unwrap();
        let sa = StagedFile::new(&paths.sa);
        File::create(sa.path()).unwrap();
        let isa = StagedFile::new(&paths.isa);
        let isa_tmp = isa.path().to_path_buf();
        File::create(&isa_tmp).unwrap();

        assert!(commit_outputs(bwt, vec![hist, sa, isa]).is_err());
        assert!(!paths.bwt.exists());
        assert!(!bwt_tmp.exists());
        assert!(!isa_tmp.exists());
        assert!(!paths.isa.exists());
    }

    #[test]
    fn test_dropped_stage_leaves_nothing() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("x.sa");
        let mut writer = SampledArrayWriter::create(&dest, SampleKind::Sa, 4, 2).unwrap();
        writer.push(7).unwrap();
        let tmp = with_suffix(&dest, ".tmp");
        assert!(tmp.exists());
        // One sample short
        assert!(writer.finish().is_err());
        assert!(!tmp.exists());
        assert!(!dest.exists());
    }

    #[test]
    fn test_sampled_array_kind_is_checked() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("x.isa");
        let mut writer = SampledArrayWriter::create(&dest, SampleKind::Isa, 2, 2).unwrap();
        writer.push(5).unwrap();
        writer.push(1).unwrap();
        writer.finish().unwrap().commit().unwrap();

        let isa = SampledArray::read_file(&dest, SampleKind::Isa).unwrap();
        assert_eq!(isa.rate, 2);
        assert_eq!(isa.values, vec![5, 1]);
        let err = SampledArray::read_file(&dest, SampleKind::Sa).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BwtError>(),
            Some(BwtError::BadFile { .. })
        ));
    }
}
