//! Canonical Huffman code over the byte alphabet.
//!
//! The code shapes the wavelet trees used for LF queries, so only code
//! lengths matter for speed; codes are assigned canonically so the same
//! histogram always yields the same tree.

use crate::text::Histogram;
use anyhow::{Result, bail};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Longest code a wavelet tree path can hold
pub const MAX_CODE_LEN: u8 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuffmanCode {
    /// Code bits, most significant bit first, right-aligned
    codes: [u64; 256],
    /// Code length in bits; 0 for symbols that do not occur
    lengths: [u8; 256],
}

impl HuffmanCode {
    pub fn from_histogram(hist: &Histogram) -> Result<Self> {
        let mut lengths = [0u8; 256];
        let present: Vec<u8> = (0..=255u8).filter(|&s| hist.count(s) > 0).collect();

        match present.len() {
            0 => bail!("cannot build a Huffman code for an empty histogram"),
            1 => lengths[present[0] as usize] = 1,
            _ => {
                // Node ids below 256 are symbols; the rest are merges
                let mut parent: Vec<usize> = vec![usize::MAX; 256];
                let mut heap = BinaryHeap::new();
                for &s in &present {
                    heap.push(Reverse((hist.count(s), s as usize)));
                }
                while heap.len() > 1 {
                    let (Some(Reverse((wa, a))), Some(Reverse((wb, b)))) = (heap.pop(), heap.pop())
                    else {
                        break;
                    };
                    let id = parent.len();
                    parent.push(usize::MAX);
                    parent[a] = id;
                    parent[b] = id;
                    heap.push(Reverse((wa + wb, id)));
                }
                for &s in &present {
                    let mut depth = 0usize;
                    let mut node = s as usize;
                    while parent[node] != usize::MAX {
                        node = parent[node];
                        depth += 1;
                    }
                    if depth > MAX_CODE_LEN as usize {
                        bail!("Huffman code for symbol {s:#04x} needs {depth} bits");
                    }
                    lengths[s as usize] = depth as u8;
                }
            }
        }

        Ok(Self::canonical(lengths))
    }

    /// Assign canonical codes for the given lengths
    fn canonical(lengths: [u8; 256]) -> Self {
        let mut order: Vec<u8> = (0..=255u8).filter(|&s| lengths[s as usize] > 0).collect();
        order.sort_by_key(|&s| (lengths[s as usize], s));

        let mut codes = [0u64; 256];
        let mut code = 0u64;
        let mut prev_len = 0u8;
        for (i, &s) in order.iter().enumerate() {
            let len = lengths[s as usize];
            if i > 0 {
                code = (code + 1) << (len - prev_len);
            }
            codes[s as usize] = code;
            prev_len = len;
        }
        Self { codes, lengths }
    }

    #[inline]
    pub fn len_of(&self, symbol: u8) -> u8 {
        self.lengths[symbol as usize]
    }

    #[inline]
    pub fn code_of(&self, symbol: u8) -> u64 {
        self.codes[symbol as usize]
    }

    /// Bit `depth` (0 = first) of the symbol's code
    #[inline]
    pub fn bit(&self, symbol: u8, depth: u8) -> bool {
        let len = self.lengths[symbol as usize];
        (self.codes[symbol as usize] >> (len - 1 - depth)) & 1 == 1
    }

    pub fn lengths(&self) -> &[u8; 256] {
        &self.lengths
    }

    /// Mean code length in bits, weighted by the histogram
    pub fn average_length(&self, hist: &Histogram) -> f64 {
        let total = hist.total();
        if total == 0 {
            return 0.0;
        }
        let bits: u64 = (0..=255u8)
            .map(|s| hist.count(s) * self.lengths[s as usize] as u64)
            .sum();
        bits as f64 / total as f64
    }

    /// Rebuild a code from stored lengths
    pub fn from_lengths(lengths: [u8; 256]) -> Result<Self> {
        if lengths.iter().all(|&l| l == 0) {
            bail!("code has no symbols");
        }
        if let Some(l) = lengths.iter().find(|&&l| l > MAX_CODE_LEN) {
            bail!("code length {l} exceeds {MAX_CODE_LEN}");
        }
        Ok(Self::canonical(lengths))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_prefix_free(code: &HuffmanCode) -> bool {
        let symbols: Vec<u8> = (0..=255u8).filter(|&s| code.len_of(s) > 0).collect();
        for &a in &symbols {
            for &b in &symbols {
                if a == b || code.len_of(a) > code.len_of(b) {
                    continue;
                }
                let shift = code.len_of(b) - code.len_of(a);
                if code.code_of(b) >> shift == code.code_of(a) {
                    return false;
                }
            }
        }
        true
    }

    #[test]
    fn test_frequent_symbols_get_short_codes() {
        let hist = Histogram::of(b"aaaaaaaabbbbccd");
        let code = HuffmanCode::from_histogram(&hist).unwrap();
        assert_eq!(code.len_of(b'a'), 1);
        assert!(code.len_of(b'd') >= code.len_of(b'b'));
        assert_eq!(code.len_of(b'z'), 0);
        assert!(is_prefix_free(&code));
    }

    #[test]
    fn test_single_symbol_gets_one_bit() {
        let code = HuffmanCode::from_histogram(&Histogram::of(b"aaaa")).unwrap();
        assert_eq!(code.len_of(b'a'), 1);
        assert!(!code.bit(b'a', 0));
    }

    #[test]
    fn test_lengths_roundtrip() {
        let code = HuffmanCode::from_histogram(&Histogram::of(b"mississippi river")).unwrap();
        let again = HuffmanCode::from_lengths(*code.lengths()).unwrap();
        assert_eq!(code, again);
        assert!(is_prefix_free(&again));
    }

    #[test]
    fn test_average_length() {
        let hist = Histogram::of(b"aabc");
        let code = HuffmanCode::from_histogram(&hist).unwrap();
        assert!((code.average_length(&hist) - 1.5).abs() < 1e-9);
    }
}
