//! Codecs for BWT streams and their rank structures

pub mod bits;
pub mod huffman;
pub mod rle;
pub mod wavelet;

pub use bits::{BitBuf, RankBitVec};
pub use huffman::HuffmanCode;
pub use rle::{BwtCursor, BwtFileSet, BwtFragment, RunLengthReader, RunLengthWriter};
pub use wavelet::{HuffmanWaveletTree, HwtBuildRequest};
