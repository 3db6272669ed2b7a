//! Sorted blocks: partitioning, leaf sorting, and LF over block BWTs

pub mod files;
pub mod lf;
pub mod sorter;
pub mod types;

pub use files::IsaSample;
pub use lf::LfIndex;
pub use sorter::{BlockSorter, InMemorySorter};
pub use types::{Block, BlockFiles, BlockSortResult, partition_blocks};
