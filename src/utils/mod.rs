//! Utility functions and data structures.
//!
//! ## Modules
//!
//! - [`encoding`] - Varint and little-endian integer encoding
//! - [`progress`] - Progress bars, no-op without the `progress` feature
//! - [`workspace`] - Scratch directory owning every intermediate file

pub mod encoding;
pub mod progress;
pub mod workspace;

pub use encoding::*;
pub use workspace::WorkspaceContext;
