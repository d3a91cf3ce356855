//! Isolated environments for filter and CLI tests.
//!
//! Each `TestEnvironment` owns a temporary tree:
//!
//! ```text
//! <tmp>/
//! ├── work/      files fed to clean, outputs of smudge
//! ├── cache/     local chunk cache
//! └── remote/    directory remote
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use gitbin_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new()?;
//! let config = env.config(4);
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Scratch area for input and output files
    pub work_dir: PathBuf,
    /// Local chunk cache
    pub cache_root: PathBuf,
    /// Directory remote root
    pub remote_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let work_dir = root.join("work");
        let cache_root = root.join("cache");
        let remote_root = root.join("remote");

        std::fs::create_dir_all(&work_dir)?;
        std::fs::create_dir_all(&cache_root)?;
        std::fs::create_dir_all(&remote_root)?;

        Ok(Self {
            _temp_dir: temp_dir,
            work_dir,
            cache_root,
            remote_root,
            test_id,
        })
    }

    /// Config pointing at this environment's cache and remote.
    pub fn config(&self, chunk_size: usize) -> Config {
        let mut config = Config::default();
        config.cache.directory = Some(self.cache_root.clone());
        config.cache.chunk_size = chunk_size;
        config.remote.path = Some(self.remote_root.clone());
        config
    }

    /// Environment variables that point a spawned `git-bin` at this
    /// environment.
    pub fn env_vars(&self, chunk_size: usize) -> Vec<(String, String)> {
        vec![
            (
                "GITBIN_CACHE_DIR".to_string(),
                self.cache_root.display().to_string(),
            ),
            (
                "GITBIN_REMOTE_PATH".to_string(),
                self.remote_root.display().to_string(),
            ),
            ("GITBIN_CHUNK_SIZE".to_string(), chunk_size.to_string()),
        ]
    }

    /// Create a work file with content
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.work_dir.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Names of the files currently in the cache directory
    pub fn cached_names(&self) -> anyhow::Result<Vec<String>> {
        list_names(&self.cache_root)
    }

    /// Names of the files currently on the remote
    pub fn remote_names(&self) -> anyhow::Result<Vec<String>> {
        list_names(&self.remote_root)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}

fn list_names(dir: &std::path::Path) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}
