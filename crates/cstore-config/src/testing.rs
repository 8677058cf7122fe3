//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage a temporary store root (blob tree
//! plus index directory) and scratch charm directories, so suites never
//! touch a developer's real `~/.cstore`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use tempfile::TempDir;

/// Atomic counter for unique test IDs.
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique store paths.
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup).
    _temp_dir: TempDir,
    /// Isolated blob tree root.
    pub blob_root: PathBuf,
    /// Isolated LMDB registry directory.
    pub registry_dir: PathBuf,
    /// Scratch area for charm source directories.
    pub charms_dir: PathBuf,
    /// Unique test ID.
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment.
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let blob_root = root.join("blobs");
        let registry_dir = root.join("index");
        let charms_dir = root.join("charms");
        std::fs::create_dir_all(&blob_root)?;
        std::fs::create_dir_all(&registry_dir)?;
        std::fs::create_dir_all(&charms_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            blob_root,
            registry_dir,
            charms_dir,
            test_id,
        })
    }

    /// Create a charm source directory with the given `(path, content)` files.
    pub fn create_charm(&self, name: &str, files: &[(&str, &[u8])]) -> anyhow::Result<PathBuf> {
        let dir = self.charms_dir.join(name);
        for (rel, content) in files {
            let path = dir.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, content)?;
        }
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("failed to create test environment")
    }
}
