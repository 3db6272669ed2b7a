//! Scratch space for intermediate block files.
//!
//! Every intermediate file (block BWT fragments, sampled ISA files, GT bit
//! vectors, gap-array spills) is created through a [`WorkspaceContext`]. The
//! context owns a private directory; files are registered on creation, removed
//! individually when the block that owns them is merged away, and whatever is
//! left is removed when the context is dropped, also on error paths.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

pub struct WorkspaceContext {
    dir: TempDir,
    counter: AtomicU64,
    live: Mutex<HashSet<PathBuf>>,
}

impl WorkspaceContext {
    /// Create a private workspace directory under `parent`
    pub fn new(parent: &Path) -> Result<Self> {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create temp directory {}", parent.display()))?;
        let dir = tempfile::Builder::new()
            .prefix("bwtmerge-")
            .tempdir_in(parent)
            .with_context(|| format!("Failed to create workspace in {}", parent.display()))?;
        log::debug!("Workspace at {}", dir.path().display());
        Ok(Self {
            dir,
            counter: AtomicU64::new(0),
            live: Mutex::new(HashSet::new()),
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// A fresh, unique path `<stem>.<id>.<ext>` inside the workspace.
    ///
    /// The path is registered for teardown but no file is created.
    pub fn unique_path(&self, stem: &str, ext: &str) -> PathBuf {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.path().join(format!("{stem}.{id:06}.{ext}"));
        self.register(&path);
        path
    }

    /// Create a new registered file for writing
    pub fn create(&self, stem: &str, ext: &str) -> Result<(PathBuf, File)> {
        let path = self.unique_path(stem, ext);
        let file = File::create_new(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        log::trace!("Creating temp file {}", path.display());
        Ok((path, file))
    }

    fn register(&self, path: &Path) {
        if let Ok(mut live) = self.live.lock() {
            live.insert(path.to_path_buf());
        }
    }

    /// Delete a file owned by the workspace
    pub fn release(&self, path: &Path) -> Result<()> {
        if let Ok(mut live) = self.live.lock() {
            live.remove(path);
        }
        log::trace!("Removing temp file {}", path.display());
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    /// Number of registered files not yet released
    pub fn live_files(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }
}

impl Drop for WorkspaceContext {
    fn drop(&mut self) {
        let live = match self.live.get_mut() {
            Ok(live) => std::mem::take(live),
            Err(poisoned) => std::mem::take(poisoned.into_inner()),
        };
        for path in live {
            let _ = fs::remove_file(&path);
        }
        // The TempDir removes the directory itself
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_unique_paths_and_release() {
        let parent = tempdir().unwrap();
        let ctx = WorkspaceContext::new(parent.path()).unwrap();

        let (a, mut fa) = ctx.create("block", "bwt").unwrap();
        let (b, _fb) = ctx.create("block", "bwt").unwrap();
        assert_ne!(a, b);
        fa.write_all(b"abc").unwrap();
        assert_eq!(ctx.live_files(), 2);

        ctx.release(&a).unwrap();
        assert!(!a.exists());
        assert_eq!(ctx.live_files(), 1);

        // Releasing twice is harmless
        ctx.release(&a).unwrap();
    }

    #[test]
    fn test_drop_removes_everything() {
        let parent = tempdir().unwrap();
        let root;
        let path;
        {
            let ctx = WorkspaceContext::new(parent.path()).unwrap();
            root = ctx.root().to_path_buf();
            path = ctx.create("gap", "sparse").unwrap().0;
            assert!(path.exists());
        }
        assert!(!path.exists());
        assert!(!root.exists());
    }
}
