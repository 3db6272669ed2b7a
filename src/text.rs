//! Input text access.
//!
//! The text is memory-mapped once and shared read-only by every stage. Blocks
//! own full text suffixes, so any stage may read past its block end.

use crate::error::BwtError;
use crate::utils::{read_u64_le, write_u64_le};
use anyhow::{Context, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Size of one chunk of the parallel histogram scan
const HISTOGRAM_CHUNK: usize = 1 << 20;

enum TextData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

/// Read-only view of the whole input text
pub struct InputText {
    data: TextData,
}

impl InputText {
    /// Memory-map an input file.
    ///
    /// Missing, unreadable and empty files are rejected before any work starts.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| BwtError::UnreadableInput {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let len = file
            .metadata()
            .map_err(|e| BwtError::UnreadableInput {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
            .len();
        if len == 0 {
            return Err(BwtError::EmptyInput(path.display().to_string()).into());
        }

        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to map {}", path.display()))?;
        Ok(Self {
            data: TextData::Mapped(mmap),
        })
    }

    /// Wrap an in-memory text
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(BwtError::EmptyInput("<memory>".into()).into());
        }
        Ok(Self {
            data: TextData::Owned(bytes),
        })
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match &self.data {
            TextData::Mapped(mmap) => mmap,
            TextData::Owned(bytes) => bytes,
        }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.as_bytes().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    #[inline]
    pub fn symbol_at(&self, pos: u64) -> u8 {
        self.as_bytes()[pos as usize]
    }

    /// Cursor yielding `T[pos-1], T[pos-2], ...`, wrapping from 0 to `n-1`
    pub fn backward_cursor(&self, pos: u64) -> BackwardCursor<'_> {
        BackwardCursor {
            text: self.as_bytes(),
            pos: pos as usize,
        }
    }

    /// Symbol histogram of the whole text, computed in parallel
    pub fn histogram(&self) -> Histogram {
        Histogram::of_parallel(self.as_bytes())
    }
}

/// Circular backward reader over the text
pub struct BackwardCursor<'a> {
    text: &'a [u8],
    pos: usize,
}

impl BackwardCursor<'_> {
    /// Text position of the symbol the next call returns
    pub fn position(&self) -> u64 {
        if self.pos == 0 {
            self.text.len() as u64 - 1
        } else {
            self.pos as u64 - 1
        }
    }
}

impl Iterator for BackwardCursor<'_> {
    type Item = u8;

    #[inline]
    fn next(&mut self) -> Option<u8> {
        if self.text.is_empty() {
            return None;
        }
        if self.pos == 0 {
            self.pos = self.text.len();
        }
        self.pos -= 1;
        Some(self.text[self.pos])
    }
}

/// Symbol counts over the byte alphabet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    counts: [u64; 256],
}

impl Default for Histogram {
    fn default() -> Self {
        Self { counts: [0; 256] }
    }
}

impl Histogram {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hist = Self::default();
        for &b in bytes {
            hist.counts[b as usize] += 1;
        }
        hist
    }

    pub fn of_parallel(bytes: &[u8]) -> Self {
        bytes
            .par_chunks(HISTOGRAM_CHUNK)
            .map(Histogram::of)
            .reduce(Histogram::default, |mut a, b| {
                a.add(&b);
                a
            })
    }

    pub fn add(&mut self, other: &Histogram) {
        for (a, b) in self.counts.iter_mut().zip(other.counts.iter()) {
            *a += b;
        }
    }

    #[inline]
    pub fn count(&self, symbol: u8) -> u64 {
        self.counts[symbol as usize]
    }

    pub fn counts(&self) -> &[u64; 256] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Number of distinct symbols
    pub fn sigma(&self) -> usize {
        self.counts.iter().filter(|&&c| c > 0).count()
    }

    /// `C[c]` = number of symbols smaller than `c`; `C[256]` = total
    pub fn cumulative(&self) -> [u64; 257] {
        let mut c = [0u64; 257];
        for s in 0..256 {
            c[s + 1] = c[s] + self.counts[s];
        }
        c
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for &count in &self.counts {
            write_u64_le(writer, count)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let mut hist = Self::default();
        for count in hist.counts.iter_mut() {
            *count = read_u64_le(reader)?;
        }
        Ok(hist)
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        let mut file = BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        );
        self.write_to(&mut file)?;
        file.flush()?;
        Ok(())
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        let mut file = BufReader::new(
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        );
        Ok(Self::read_from(&mut file)?)
    }
}
