//! Remote store capability.
//!
//! The core only ever lists, uploads and downloads whole named files. How a
//! remote does that (transport, auth, network-level retries) is its own
//! business.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::instrument;

/// Errors reported by a remote store
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Remote file not found: {name}")]
    NotFound { name: String },

    #[error("Remote transfer failed for {name}: {reason}")]
    Transfer { name: String, reason: String },
}

/// A file as reported by a remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub size: u64,
}

/// Blocking remote object store.
///
/// Implementations are shared across transfer workers, so they must be
/// `Send + Sync`.
pub trait Remote: Send + Sync {
    /// List every file on the remote.
    fn list_files(&self) -> Result<Vec<RemoteFile>, RemoteError>;

    /// Upload the local file at `local_path` under `name`.
    fn upload_file(&self, local_path: &Path, name: &str) -> Result<(), RemoteError>;

    /// Download the remote file `name` to `local_path`.
    fn download_file(&self, local_path: &Path, name: &str) -> Result<(), RemoteError>;

    /// Backend name for logging/debugging
    fn name(&self) -> &'static str;
}

// ============================================================================
// Directory Remote
// ============================================================================

/// Remote backed by a plain directory, e.g. a mounted network share.
#[derive(Debug, Clone)]
pub struct DirRemote {
    root: PathBuf,
}

impl DirRemote {
    /// Open a directory remote, creating the directory if it doesn't exist.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, RemoteError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Remote for DirRemote {
    fn list_files(&self) -> Result<Vec<RemoteFile>, RemoteError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".tmp") {
                continue;
            }
            files.push(RemoteFile {
                name,
                size: entry.metadata()?.len(),
            });
        }
        Ok(files)
    }

    #[instrument(skip(self), level = "debug")]
    fn upload_file(&self, local_path: &Path, name: &str) -> Result<(), RemoteError> {
        let target = self.root.join(name);
        let temp = self.root.join(format!(
            "{}.{}.{:?}.tmp",
            name,
            std::process::id(),
            std::thread::current().id()
        ));

        // Readers of the share never observe a half-copied file
        if let Err(e) = fs::copy(local_path, &temp).and_then(|_| fs::rename(&temp, &target)) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn download_file(&self, local_path: &Path, name: &str) -> Result<(), RemoteError> {
        let source = self.root.join(name);
        match fs::copy(&source, local_path) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound && !source.exists() => {
                Err(RemoteError::NotFound {
                    name: name.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "directory"
    }
}

// ============================================================================
// In-Memory Remote
// ============================================================================

/// In-process remote holding files in a map.
///
/// Counts transfers and can be told to fail specific names, which makes it
/// the workhorse of the filter tests.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    files: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
    listing_broken: AtomicBool,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    listings: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a file on the remote without counting it as an upload.
    pub fn insert(&self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), data.into());
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.files.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every transfer of `name` fail until [`MemoryRemote::heal`] is called.
    pub fn fail_on(&self, name: impl Into<String>) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into());
    }

    pub fn heal(&self, name: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// Make every listing fail until [`MemoryRemote::fix_listing`] is called.
    pub fn break_listing(&self) {
        self.listing_broken.store(true, Ordering::SeqCst);
    }

    pub fn fix_listing(&self) {
        self.listing_broken.store(false, Ordering::SeqCst);
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn listing_count(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    fn check_failing(&self, name: &str) -> Result<(), RemoteError> {
        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
        {
            return Err(RemoteError::Transfer {
                name: name.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl Remote for MemoryRemote {
    fn list_files(&self) -> Result<Vec<RemoteFile>, RemoteError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if self.listing_broken.load(Ordering::SeqCst) {
            return Err(RemoteError::Transfer {
                name: "<listing>".to_string(),
                reason: "injected failure".to_string(),
            });
        }
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(files
            .iter()
            .map(|(name, data)| RemoteFile {
                name: name.clone(),
                size: data.len() as u64,
            })
            .collect())
    }

    fn upload_file(&self, local_path: &Path, name: &str) -> Result<(), RemoteError> {
        self.check_failing(name)?;
        let data = fs::read(local_path)?;
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.insert(name, data);
        Ok(())
    }

    fn download_file(&self, local_path: &Path, name: &str) -> Result<(), RemoteError> {
        self.check_failing(name)?;
        let data = self.get(name).ok_or_else(|| RemoteError::NotFound {
            name: name.to_string(),
        })?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        fs::write(local_path, data)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
