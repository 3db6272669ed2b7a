//! Merging sorted blocks into the BWT of their union

pub mod gap;
pub mod isa;
pub mod node;
pub mod packets;
pub mod schedule;
pub mod stream;
pub mod tree;

pub use gap::{GapArray, compute_gap};
pub use node::{MergeEnv, merge_children};
pub use schedule::{TaskGraph, run_tree};
pub use tree::{FootprintModel, MergeKind, MergeTreeBuilder, MergeTreeNode};
