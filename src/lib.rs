//! # bwtmerge - External-memory BWT construction
//!
//! bwtmerge builds the Burrows-Wheeler transform of texts larger than RAM by
//! sorting fixed-size blocks independently and merging them bottom-up along
//! a merge tree, never holding more than one merge's working set in memory.
//!
//! ## Architecture
//!
//! - [`text`] - Memory-mapped input and symbol histograms
//! - [`block`] - Leaf sorting, block state files and block LF mapping
//! - [`codec`] - Run-length BWT streams, Huffman code, wavelet tree
//! - [`merge`] - Merge tree, gap arrays, ISA and stream merging, scheduling
//! - [`reconstruct`] - Sampled SA/ISA from the root BWT
//! - [`output`] - Final artifact formats
//! - [`build`] - The end-to-end pipeline
//!
//! ## Quick Start
//!
//! ```ignore
//! use bwtmerge::{BuildConfig, build_bwt};
//! use bwtmerge::output::{BwtOutput, OutputPaths};
//! use std::path::Path;
//!
//! let cfg = BuildConfig::default();
//! let report = build_bwt(Path::new("genome.txt"), Path::new("genome"), &cfg).unwrap();
//! let bwt = BwtOutput::read_file(&OutputPaths::new(Path::new("genome")).bwt).unwrap();
//! assert_eq!(bwt.len() as u64, report.text_len);
//! ```
//!
//! ## Merging
//!
//! Merging two adjacent blocks walks the right block's text backwards
//! through an LF index of the left block, counting how many right-block
//! suffixes fall between consecutive left-block suffixes (the gap array).
//! The gap array then drives both the interleaving of the two BWT streams
//! and the renumbering of sampled ISA entries. Per-position GT bits carried
//! along with each block resolve comparisons against suffixes that start
//! past the block.

pub mod block;
pub mod build;
pub mod codec;
pub mod config;
pub mod error;
pub mod merge;
pub mod output;
pub mod reconstruct;
pub mod text;
pub mod utils;

pub use build::{BuildReport, build_bwt, build_bwt_with};
pub use config::BuildConfig;
pub use error::BwtError;
