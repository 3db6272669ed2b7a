//! Sparse gap arrays.
//!
//! Each walking task buffers the slot indexes it touches, sorts them and
//! writes a run file of `(slot, count)` entries whenever the buffer holds
//! [`TASK_BUFFER_ENTRIES`] indexes and once more when the task finishes.
//! A run stores every entry as
//! two Elias gamma codes: the distance from the slot after the previous
//! entry (plus one) and the count. Finished runs are sent over a bounded
//! channel to one consumer thread, which merges equal-sized runs pairwise
//! like a binary counter. Closing the channel tells the consumer that every
//! producer is done; it then folds the remaining runs into one.

use super::{GapArray, GapSink, TASK_BUFFER_ENTRIES};
use crate::utils::WorkspaceContext;
use anyhow::{Context, Result, anyhow};
use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};
use crossbeam::channel::{Receiver, Sender, bounded};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::mem;
use std::path::PathBuf;

/// A gamma-coded run file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseRun {
    pub path: PathBuf,
    /// Number of `(slot, count)` entries
    pub entries: u64,
    /// Sum of all counts
    pub total: u64,
    /// Slots of the logical array
    pub slots: u64,
}

impl SparseRun {
    pub fn reader(&self) -> Result<SparseRunReader> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        Ok(SparseRunReader {
            bits: BitReader::endian(BufReader::with_capacity(65536, file), BigEndian),
            remaining: self.entries,
            next: 0,
        })
    }
}

fn write_gamma<W: BitWrite>(writer: &mut W, value: u64) -> io::Result<()> {
    debug_assert!(value > 0);
    let width = 64 - value.leading_zeros();
    writer.write_unary0(width - 1)?;
    if width > 1 {
        writer.write(width - 1, value & ((1u64 << (width - 1)) - 1))?;
    }
    Ok(())
}

fn read_gamma<R: BitRead>(reader: &mut R) -> io::Result<u64> {
    let low_bits = reader.read_unary0()?;
    if low_bits > 63 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "gamma code too long"));
    }
    let mut value = 1u64 << low_bits;
    if low_bits > 0 {
        value |= reader.read::<u64>(low_bits)?;
    }
    Ok(value)
}

pub struct SparseRunWriter {
    bits: BitWriter<BufWriter<File>, BigEndian>,
    path: PathBuf,
    next: u64,
    entries: u64,
    total: u64,
    slots: u64,
}

impl SparseRunWriter {
    pub fn create(ctx: &WorkspaceContext, slots: u64) -> Result<Self> {
        let (path, file) = ctx.create("gap", "sparse")?;
        Ok(Self {
            bits: BitWriter::endian(BufWriter::with_capacity(65536, file), BigEndian),
            path,
            next: 0,
            entries: 0,
            total: 0,
            slots,
        })
    }

    /// Append an entry; slots must be strictly increasing
    pub fn push(&mut self, slot: u64, count: u64) -> Result<()> {
        debug_assert!(slot >= self.next && count > 0);
        write_gamma(&mut self.bits, slot - self.next + 1)?;
        write_gamma(&mut self.bits, count)?;
        self.next = slot + 1;
        self.entries += 1;
        self.total += count;
        Ok(())
    }

    pub fn finish(mut self) -> Result<SparseRun> {
        self.bits.byte_align()?;
        let mut inner = self.bits.into_writer();
        inner
            .flush()
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(SparseRun {
            path: self.path,
            entries: self.entries,
            total: self.total,
            slots: self.slots,
        })
    }
}

pub struct SparseRunReader {
    bits: BitReader<BufReader<File>, BigEndian>,
    remaining: u64,
    next: u64,
}

impl SparseRunReader {
    pub fn next_entry(&mut self) -> Result<Option<(u64, u64)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let slot = self.next + read_gamma(&mut self.bits)? - 1;
        let count = read_gamma(&mut self.bits)?;
        self.next = slot + 1;
        self.remaining -= 1;
        Ok(Some((slot, count)))
    }
}

/// Sequential lookup of counts in a run; slots must be asked in order
pub struct RunCursor {
    reader: SparseRunReader,
    pending: Option<(u64, u64)>,
}

impl RunCursor {
    /// Position on the first entry at or after `start`
    pub fn seek(run: &SparseRun, start: u64) -> Result<Self> {
        let mut reader = run.reader()?;
        let mut pending = reader.next_entry()?;
        while let Some((slot, _)) = pending {
            if slot >= start {
                break;
            }
            pending = reader.next_entry()?;
        }
        Ok(Self { reader, pending })
    }

    pub fn count_at(&mut self, slot: u64) -> Result<u64> {
        match self.pending {
            Some((at, count)) if at == slot => {
                self.pending = self.reader.next_entry()?;
                Ok(count)
            }
            _ => Ok(0),
        }
    }
}

/// Write a run from unsorted slot indexes
pub(super) fn write_run(ctx: &WorkspaceContext, slots: u64, mut touched: Vec<u64>) -> Result<SparseRun> {
    touched.sort_unstable();
    let mut writer = SparseRunWriter::create(ctx, slots)?;
    let mut iter = touched.into_iter().peekable();
    while let Some(slot) = iter.next() {
        let mut count = 1;
        while iter.next_if_eq(&slot).is_some() {
            count += 1;
        }
        writer.push(slot, count)?;
    }
    writer.finish()
}

/// Merge two runs into a new one and release both inputs
fn merge_pair(ctx: &WorkspaceContext, a: SparseRun, b: SparseRun) -> Result<SparseRun> {
    let mut out = SparseRunWriter::create(ctx, a.slots)?;
    let mut ra = a.reader()?;
    let mut rb = b.reader()?;
    let mut ea = ra.next_entry()?;
    let mut eb = rb.next_entry()?;
    loop {
        match (ea, eb) {
            (Some((sa, ca)), Some((sb, cb))) if sa == sb => {
                out.push(sa, ca + cb)?;
                ea = ra.next_entry()?;
                eb = rb.next_entry()?;
            }
            (Some((sa, ca)), Some((sb, _))) if sa < sb => {
                out.push(sa, ca)?;
                ea = ra.next_entry()?;
            }
            (_, Some((sb, cb))) => {
                out.push(sb, cb)?;
                eb = rb.next_entry()?;
            }
            (Some((sa, ca)), None) => {
                out.push(sa, ca)?;
                ea = ra.next_entry()?;
            }
            (None, None) => break,
        }
    }
    ctx.release(&a.path)?;
    ctx.release(&b.path)?;
    out.finish()
}

/// Merges runs pairwise like a binary counter, so every entry is rewritten
/// O(log runs) times.
#[derive(Default)]
pub(super) struct RunMerger {
    levels: Vec<Option<SparseRun>>,
    received: usize,
}

impl RunMerger {
    pub fn push(&mut self, ctx: &WorkspaceContext, run: SparseRun) -> Result<()> {
        self.received += 1;
        let mut carry = run;
        let mut level = 0;
        loop {
            if level == self.levels.len() {
                self.levels.push(None);
            }
            match self.levels[level].take() {
                Some(other) => {
                    carry = merge_pair(ctx, other, carry)?;
                    level += 1;
                }
                None => {
                    self.levels[level] = Some(carry);
                    return Ok(());
                }
            }
        }
    }

    pub fn received(&self) -> usize {
        self.received
    }

    /// Fold the remaining levels; `None` if nothing was pushed
    pub fn finish(self, ctx: &WorkspaceContext) -> Result<Option<SparseRun>> {
        let mut merged: Option<SparseRun> = None;
        for run in self.levels.into_iter().flatten() {
            merged = Some(match merged {
                Some(acc) => merge_pair(ctx, acc, run)?,
                None => run,
            });
        }
        Ok(merged)
    }
}

/// Drain the run channel, merging as runs arrive
fn consume_runs(ctx: &WorkspaceContext, slots: u64, runs: Receiver<SparseRun>) -> Result<SparseRun> {
    let mut merger = RunMerger::default();
    for run in runs {
        merger.push(ctx, run)?;
    }
    log::debug!("Sparse gap array: merged {} runs", merger.received());
    match merger.finish(ctx)? {
        Some(run) => Ok(run),
        None => SparseRunWriter::create(ctx, slots)?.finish(),
    }
}

/// Producer side of a sparse gap array
pub struct SparseGapSink<'a> {
    ctx: &'a WorkspaceContext,
    slots: u64,
    runs: Sender<SparseRun>,
}

impl SparseGapSink<'_> {
    fn send_run(&self, touched: Vec<u64>) -> Result<()> {
        let run = write_run(self.ctx, self.slots, touched)?;
        self.runs
            .send(run)
            .map_err(|_| anyhow!("sparse gap merger stopped"))
    }
}

impl GapSink for SparseGapSink<'_> {
    type Local = Vec<u64>;

    fn local(&self) -> Vec<u64> {
        Vec::new()
    }

    #[inline]
    fn record(&self, local: &mut Vec<u64>, idx: u64) -> Result<()> {
        local.push(idx);
        if local.len() >= TASK_BUFFER_ENTRIES {
            self.send_run(mem::take(local))?;
        }
        Ok(())
    }

    fn flush(&self, local: Vec<u64>) -> Result<()> {
        if local.is_empty() {
            return Ok(());
        }
        self.send_run(local)
    }
}

/// Run `produce` against a sparse sink while a consumer thread merges its
/// runs; returns the producer's result and the merged array.
pub fn collect_sparse<R>(
    ctx: &WorkspaceContext,
    slots: u64,
    queue: usize,
    produce: impl FnOnce(&SparseGapSink) -> Result<R>,
) -> Result<(R, GapArray)> {
    std::thread::scope(|scope| {
        let (tx, rx) = bounded(queue.max(1));
        let consumer = scope.spawn(move || consume_runs(ctx, slots, rx));

        let sink = SparseGapSink {
            ctx,
            slots,
            runs: tx,
        };
        let produced = produce(&sink);
        drop(sink);

        let merged = consumer
            .join()
            .map_err(|_| anyhow!("sparse gap merger panicked"))?;
        let produced = produced?;
        Ok((produced, GapArray::Sparse(merged?)))
    })
}
