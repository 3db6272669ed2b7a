//! Run-length BWT streams.
//!
//! A stream is a sequence of runs, each a symbol byte followed by the run
//! length as a LEB128 varint. Streams are self-delimiting per run, so
//! fragments can be concatenated byte-wise.

use crate::utils::{WorkspaceContext, read_varint_u64, write_varint_u64};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

pub struct RunLengthWriter<W: Write> {
    inner: W,
    run: Option<(u8, u64)>,
    symbols: u64,
    runs: u64,
}

impl<W: Write> RunLengthWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            run: None,
            symbols: 0,
            runs: 0,
        }
    }

    #[inline]
    pub fn push(&mut self, symbol: u8) -> io::Result<()> {
        self.push_run(symbol, 1)
    }

    pub fn push_run(&mut self, symbol: u8, len: u64) -> io::Result<()> {
        if len == 0 {
            return Ok(());
        }
        self.symbols += len;
        match &mut self.run {
            Some((s, n)) if *s == symbol => {
                *n += len;
                Ok(())
            }
            _ => {
                self.flush_run()?;
                self.run = Some((symbol, len));
                Ok(())
            }
        }
    }

    pub fn push_all(&mut self, symbols: &[u8]) -> io::Result<()> {
        for &s in symbols {
            self.push(s)?;
        }
        Ok(())
    }

    fn flush_run(&mut self) -> io::Result<()> {
        if let Some((symbol, len)) = self.run.take() {
            self.inner.write_all(&[symbol])?;
            write_varint_u64(&mut self.inner, len)?;
            self.runs += 1;
        }
        Ok(())
    }

    /// Symbols pushed so far
    pub fn symbols(&self) -> u64 {
        self.symbols
    }

    /// Write the pending run, flush, and return the inner writer and the
    /// number of symbols written
    pub fn finish(mut self) -> io::Result<(W, u64)> {
        self.flush_run()?;
        self.inner.flush()?;
        log::trace!("RLE stream: {} symbols in {} runs", self.symbols, self.runs);
        Ok((self.inner, self.symbols))
    }
}

pub struct RunLengthReader<R: Read> {
    inner: R,
    symbol: u8,
    remaining: u64,
    decoded: u64,
}

impl<R: Read> RunLengthReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            symbol: 0,
            remaining: 0,
            decoded: 0,
        }
    }

    /// Load the next run; `false` at end of stream
    fn load_run(&mut self) -> io::Result<bool> {
        let mut byte = [0u8; 1];
        if self.inner.read(&mut byte)? == 0 {
            return Ok(false);
        }
        let len = read_varint_u64(&mut self.inner)?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "run without length")
        })?;
        if len == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "empty run"));
        }
        self.symbol = byte[0];
        self.remaining = len;
        Ok(true)
    }

    #[inline]
    pub fn next_symbol(&mut self) -> io::Result<Option<u8>> {
        if self.remaining == 0 && !self.load_run()? {
            return Ok(None);
        }
        self.remaining -= 1;
        self.decoded += 1;
        Ok(Some(self.symbol))
    }

    /// Take up to `max` symbols of the current run
    pub fn next_run(&mut self, max: u64) -> io::Result<Option<(u8, u64)>> {
        if max == 0 {
            return Ok(Some((self.symbol, 0)));
        }
        if self.remaining == 0 && !self.load_run()? {
            return Ok(None);
        }
        let take = self.remaining.min(max);
        self.remaining -= take;
        self.decoded += take;
        Ok(Some((self.symbol, take)))
    }

    /// Skip `n` symbols; returns how many were actually skipped
    pub fn skip(&mut self, mut n: u64) -> io::Result<u64> {
        let mut skipped = 0;
        while n > 0 {
            match self.next_run(n)? {
                Some((_, len)) => {
                    skipped += len;
                    n -= len;
                }
                None => break,
            }
        }
        Ok(skipped)
    }

    /// Symbols decoded so far
    pub fn decoded(&self) -> u64 {
        self.decoded
    }
}

/// Decode a whole stream
pub fn decode_all<R: Read>(reader: R) -> io::Result<Vec<u8>> {
    let mut rle = RunLengthReader::new(reader);
    let mut out = Vec::new();
    while let Some((symbol, len)) = rle.next_run(u64::MAX)? {
        out.extend(std::iter::repeat_n(symbol, len as usize));
    }
    Ok(out)
}

/// One run-length file holding `len` symbols
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BwtFragment {
    pub path: PathBuf,
    pub len: u64,
}

/// A BWT stored as an ordered chain of run-length fragments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BwtFileSet {
    fragments: Vec<BwtFragment>,
}

impl BwtFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(path: PathBuf, len: u64) -> Self {
        Self {
            fragments: vec![BwtFragment { path, len }],
        }
    }

    /// Write `symbols` as a fresh one-fragment set in the workspace
    pub fn write_bytes(ctx: &WorkspaceContext, stem: &str, symbols: &[u8]) -> Result<Self> {
        let (path, file) = ctx.create(stem, "rle")?;
        let mut writer = RunLengthWriter::new(BufWriter::with_capacity(65536, file));
        writer.push_all(symbols)?;
        let (_, len) = writer
            .finish()
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(Self::single(path, len))
    }

    pub fn push(&mut self, fragment: BwtFragment) {
        if fragment.len > 0 {
            self.fragments.push(fragment);
        }
    }

    /// Chain another set after this one
    pub fn append(&mut self, other: BwtFileSet) {
        for fragment in other.fragments {
            self.push(fragment);
        }
    }

    pub fn fragments(&self) -> &[BwtFragment] {
        &self.fragments
    }

    /// Total number of symbols
    pub fn len(&self) -> u64 {
        self.fragments.iter().map(|f| f.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cursor positioned at symbol `offset`
    pub fn cursor_at(&self, offset: u64) -> Result<BwtCursor> {
        let mut cursor = BwtCursor {
            fragments: self.fragments.clone(),
            next: 0,
            current: None,
            position: 0,
        };
        cursor.seek(offset)?;
        Ok(cursor)
    }

    pub fn cursor(&self) -> Result<BwtCursor> {
        self.cursor_at(0)
    }

    /// Decode every fragment into memory
    pub fn read_all(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.len() as usize);
        for fragment in &self.fragments {
            let file = File::open(&fragment.path)
                .with_context(|| format!("Failed to open {}", fragment.path.display()))?;
            let symbols = decode_all(BufReader::with_capacity(65536, file))
                .with_context(|| format!("Failed to decode {}", fragment.path.display()))?;
            if symbols.len() as u64 != fragment.len {
                return Err(crate::error::BwtError::BadFile {
                    file: fragment.path.display().to_string(),
                    reason: format!("{} symbols, expected {}", symbols.len(), fragment.len),
                }
                .into());
            }
            out.extend_from_slice(&symbols);
        }
        Ok(out)
    }

    /// Copy the whole chain into one run-length stream
    pub fn copy_to<W: Write>(&self, out: &mut RunLengthWriter<W>) -> Result<()> {
        let mut cursor = self.cursor()?;
        while let Some((symbol, len)) = cursor.next_run(u64::MAX)? {
            out.push_run(symbol, len)?;
        }
        Ok(())
    }

    /// Delete the fragments through the workspace
    pub fn release(self, ctx: &WorkspaceContext) -> Result<()> {
        for fragment in self.fragments {
            ctx.release(&fragment.path)?;
        }
        Ok(())
    }
}

/// Sequential reader across the fragments of a [`BwtFileSet`]
pub struct BwtCursor {
    fragments: Vec<BwtFragment>,
    next: usize,
    current: Option<RunLengthReader<BufReader<File>>>,
    position: u64,
}

impl BwtCursor {
    fn open_next(&mut self) -> Result<bool> {
        let Some(fragment) = self.fragments.get(self.next) else {
            self.current = None;
            return Ok(false);
        };
        let file = File::open(&fragment.path)
            .with_context(|| format!("Failed to open {}", fragment.path.display()))?;
        self.current = Some(RunLengthReader::new(BufReader::with_capacity(65536, file)));
        self.next += 1;
        Ok(true)
    }

    fn seek(&mut self, mut offset: u64) -> Result<()> {
        // Whole fragments are skipped without opening them
        while let Some(fragment) = self.fragments.get(self.next) {
            if offset < fragment.len {
                break;
            }
            offset -= fragment.len;
            self.position += fragment.len;
            self.next += 1;
        }
        if offset > 0 {
            if !self.open_next()? {
                anyhow::bail!("seek past the end of a BWT file set");
            }
            if let Some(reader) = self.current.as_mut() {
                let skipped = reader.skip(offset)?;
                self.position += skipped;
            }
        }
        Ok(())
    }

    /// Take up to `max` symbols of one run
    pub fn next_run(&mut self, max: u64) -> Result<Option<(u8, u64)>> {
        loop {
            if let Some(reader) = self.current.as_mut() {
                if let Some((symbol, len)) = reader.next_run(max)? {
                    self.position += len;
                    return Ok(Some((symbol, len)));
                }
            }
            if !self.open_next()? {
                return Ok(None);
            }
        }
    }

    #[inline]
    pub fn next_symbol(&mut self) -> Result<Option<u8>> {
        Ok(self.next_run(1)?.map(|(symbol, _)| symbol))
    }

    /// Symbol offset of the next symbol returned
    pub fn position(&self) -> u64 {
        self.position
    }
}
