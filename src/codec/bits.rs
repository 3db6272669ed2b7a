//! Packed bit vectors.
//!
//! [`BitBuf`] is the growable form used while GT bits are produced;
//! [`RankBitVec`] adds per-word popcount prefixes for O(1) rank.

use crate::utils::{read_u64_le, write_u64_le};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Growable packed bit vector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitBuf {
    words: Vec<u64>,
    len: u64,
}

impl BitBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bits: u64) -> Self {
        Self {
            words: Vec::with_capacity(bits.div_ceil(64) as usize),
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn push(&mut self, bit: bool) {
        let offset = self.len % 64;
        if offset == 0 {
            self.words.push(0);
        }
        if bit {
            let last = self.words.len() - 1;
            self.words[last] |= 1u64 << offset;
        }
        self.len += 1;
    }

    #[inline]
    pub fn get(&self, i: u64) -> bool {
        debug_assert!(i < self.len);
        (self.words[(i / 64) as usize] >> (i % 64)) & 1 == 1
    }

    /// Append the first `count` bits of `other`
    pub fn extend_prefix(&mut self, other: &BitBuf, count: u64) {
        if self.len % 64 == 0 && count % 64 == 0 {
            let words = (count / 64) as usize;
            self.words.extend_from_slice(&other.words[..words]);
            self.len += count;
            return;
        }
        for i in 0..count {
            self.push(other.get(i));
        }
    }

    pub fn extend(&mut self, other: &BitBuf) {
        self.extend_prefix(other, other.len);
    }

    /// Reverse the bit order in place
    pub fn reverse(&mut self) {
        let n = self.len;
        let mut out = BitBuf::with_capacity(n);
        for i in (0..n).rev() {
            out.push(self.get(i));
        }
        *self = out;
    }

    pub fn count_ones(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        write_u64_le(writer, self.len)?;
        for &word in &self.words {
            write_u64_le(writer, word)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let len = read_u64_le(reader)?;
        let n_words = len.div_ceil(64) as usize;
        let mut words = Vec::with_capacity(n_words);
        for _ in 0..n_words {
            words.push(read_u64_le(reader)?);
        }
        Ok(Self { words, len })
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
        Self::read_from(&mut file).with_context(|| format!("Failed to read {}", path.display()))
    }
}

impl FromIterator<bool> for BitBuf {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let mut buf = BitBuf::new();
        for bit in iter {
            buf.push(bit);
        }
        buf
    }
}

/// Bit vector with constant-time rank
#[derive(Debug, Clone, Default)]
pub struct RankBitVec {
    bits: BitBuf,
    /// Ones before each word; one extra trailing entry
    ranks: Vec<u64>,
}

impl RankBitVec {
    pub fn new(bits: BitBuf) -> Self {
        let mut ranks = Vec::with_capacity(bits.words.len() + 1);
        let mut acc = 0u64;
        for &w in &bits.words {
            ranks.push(acc);
            acc += w.count_ones() as u64;
        }
        ranks.push(acc);
        Self { bits, ranks }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.bits.len
    }

    pub fn is_empty(&self) -> bool {
        self.bits.len == 0
    }

    #[inline]
    pub fn get(&self, i: u64) -> bool {
        self.bits.get(i)
    }

    /// Ones in `[0, i)`
    #[inline]
    pub fn rank1(&self, i: u64) -> u64 {
        debug_assert!(i <= self.bits.len);
        let word = (i / 64) as usize;
        let offset = i % 64;
        let base = self.ranks[word];
        if offset == 0 {
            base
        } else {
            base + (self.bits.words[word] & ((1u64 << offset) - 1)).count_ones() as u64
        }
    }

    /// Zeros in `[0, i)`
    #[inline]
    pub fn rank0(&self, i: u64) -> u64 {
        i - self.rank1(i)
    }

    pub fn size_in_bytes(&self) -> u64 {
        (self.bits.words.len() * 8 + self.ranks.len() * 8) as u64
    }

    pub fn as_bits(&self) -> &BitBuf {
        &self.bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_matches_naive() {
        let pattern: Vec<bool> = (0..1000).map(|i| (i * 7 + i / 3) % 5 < 2).collect();
        let bits: BitBuf = pattern.iter().copied().collect();
        let rv = RankBitVec::new(bits);

        let mut ones = 0;
        for (i, &b) in pattern.iter().enumerate() {
            assert_eq!(rv.rank1(i as u64), ones);
            assert_eq!(rv.get(i as u64), b);
            if b {
                ones += 1;
            }
        }
        assert_eq!(rv.rank1(1000), ones);
        assert_eq!(rv.rank0(1000), 1000 - ones);
    }

    #[test]
    fn test_rank_at_word_boundary_end() {
        let bits: BitBuf = std::iter::repeat(true).take(128).collect();
        let rv = RankBitVec::new(bits);
        assert_eq!(rv.rank1(128), 128);
        assert_eq!(rv.rank1(64), 64);
    }

    #[test]
    fn test_extend_prefix_unaligned() {
        let a: BitBuf = [true, false, true].into_iter().collect();
        let b: BitBuf = [false, true, true, false].into_iter().collect();
        let mut c = a.clone();
        c.extend_prefix(&b, 3);
        let got: Vec<bool> = (0..c.len()).map(|i| c.get(i)).collect();
        assert_eq!(got, vec![true, false, true, false, true, true]);
    }

    #[test]
    fn test_reverse() {
        let mut a: BitBuf = [true, true, false, false, false].into_iter().collect();
        a.reverse();
        let got: Vec<bool> = (0..a.len()).map(|i| a.get(i)).collect();
        assert_eq!(got, vec![false, false, false, true, true]);
    }
}
