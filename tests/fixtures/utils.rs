//! Shared helpers for integration tests: naive suffix sorting and random texts.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Suffix array of the full text by direct comparison sort
pub fn naive_sa(text: &[u8]) -> Vec<u64> {
    let mut sa: Vec<u64> = (0..text.len() as u64).collect();
    sa.sort_by(|&p, &q| text[p as usize..].cmp(&text[q as usize..]));
    sa
}

/// The `n` symbol BWT with the last text symbol in the slot of suffix 0
pub fn naive_bwt(text: &[u8]) -> (Vec<u8>, u64) {
    let sa = naive_sa(text);
    let mut p0 = 0;
    let bwt = sa
        .iter()
        .enumerate()
        .map(|(r, &p)| {
            if p == 0 {
                p0 = r as u64;
                text[text.len() - 1]
            } else {
                text[p as usize - 1]
            }
        })
        .collect();
    (bwt, p0)
}

/// The conventional BWT of `text` followed by a smallest terminator `$`
pub fn naive_sentinel_bwt(text: &[u8]) -> Vec<u8> {
    let mut with_end: Vec<u16> = text.iter().map(|&b| b as u16 + 1).collect();
    with_end.push(0);
    let n = with_end.len();
    let mut rotations: Vec<usize> = (0..n).collect();
    rotations.sort_by(|&p, &q| with_end[p..].cmp(&with_end[q..]));
    rotations
        .iter()
        .map(|&p| {
            let prev = with_end[(p + n - 1) % n];
            if prev == 0 { b'$' } else { (prev - 1) as u8 }
        })
        .collect()
}

pub fn random_text(seed: u64, len: usize, alphabet: &[u8]) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
        .collect()
}

/// Text with long repeats, which stresses GT tie-breaking across blocks
pub fn repetitive_text(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let unit: Vec<u8> = (0..rng.gen_range(3..12))
        .map(|_| b"ab"[rng.gen_range(0..2)])
        .collect();
    let mut text = Vec::with_capacity(len);
    while text.len() < len {
        text.extend_from_slice(&unit);
        if rng.gen_bool(0.1) {
            text.push(b'c');
        }
    }
    text.truncate(len);
    text
}
