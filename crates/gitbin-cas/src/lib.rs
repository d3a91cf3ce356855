//! # gitbin-cas
//!
//! Content-addressed chunk cache for git-bin.
//!
//! Chunks live in one flat directory, each under a file named by the hex
//! SHA-256 digest of its exact bytes.
//!
//! ## Directory Layout
//!
//! ```text
//! .git/git-bin/
//! ├── 0B2F...9C1E              # chunk blob
//! ├── 7A44...D0F3              # chunk blob
//! └── remoteGitBinIndex.yml    # remote index (see gitbin-manifest)
//! ```
//!
//! The name of a blob always equals the digest of its contents. A blob whose
//! contents no longer hash to its name is corrupt; detecting and evicting such
//! blobs is the job of the smudge filter.
//!
//! The crate also provides the remote capability ([`Remote`]) and the bounded
//! parallel executor ([`TransferEngine`]) that moves chunks between the cache
//! and a remote.

mod remote;
pub mod transfer;

pub use remote::{DirRemote, MemoryRemote, Remote, RemoteError, RemoteFile};
pub use transfer::{NoOpProgress, ProgressReporter, TransferEngine, TransferStats, MAX_IN_FLIGHT};

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, instrument};

/// Reserved name of the remote index document inside the cache root.
pub const REMOTE_INDEX_FILENAME: &str = "remoteGitBinIndex.yml";

/// Errors that can occur during chunk cache operations
#[derive(Error, Debug)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Chunk not found in cache: {id}")]
    NotFound { id: String },

    #[error("Invalid chunk id: {0:?}")]
    InvalidId(String),
}

pub type Result<T> = std::result::Result<T, CasError>;

/// Identity of a chunk: the 64-character hex SHA-256 digest of its bytes.
///
/// Ids are always validated on construction, so an id can be joined onto the
/// cache root without escaping it. Digests of either case are accepted and
/// stored upper-case, the spelling [`ChunkId::compute`] produces, so one
/// chunk has one file name locally and on the remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkId(String);

impl ChunkId {
    /// Length of a hex-encoded SHA-256 digest.
    pub const HEX_LEN: usize = 64;

    /// Hash `data` and return its id (upper-case hex).
    #[inline]
    pub fn compute(data: &[u8]) -> Self {
        Self(hex::encode_upper(Sha256::digest(data)))
    }

    /// Validate a hex digest of either case.
    pub fn parse(s: &str) -> Option<Self> {
        if Self::is_digest(s) {
            Some(Self(s.to_ascii_uppercase()))
        } else {
            None
        }
    }

    /// Whether `name` is an id in its stored spelling.
    pub fn is_canonical(name: &str) -> bool {
        Self::is_digest(name) && !name.bytes().any(|b| b.is_ascii_lowercase())
    }

    fn is_digest(s: &str) -> bool {
        s.len() == Self::HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digest comparison. Both sides are upper-case, so this is plain
    /// equality.
    #[inline]
    pub fn matches(&self, other: &ChunkId) -> bool {
        self.0 == other.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChunkId {
    type Err = CasError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| CasError::InvalidId(s.to_owned()))
    }
}

impl TryFrom<String> for ChunkId {
    type Error = CasError;

    fn try_from(mut s: String) -> Result<Self> {
        if Self::is_digest(&s) {
            s.make_ascii_uppercase();
            Ok(Self(s))
        } else {
            Err(CasError::InvalidId(s))
        }
    }
}

impl From<ChunkId> for String {
    fn from(id: ChunkId) -> Self {
        id.0
    }
}

/// A chunk present in the cache together with its on-disk size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEntry {
    pub id: ChunkId,
    pub size: u64,
}

/// Durable local cache of chunk blobs keyed by content hash.
///
/// No locking is performed: concurrent writers are safe because distinct ids
/// map to distinct files and every write lands through a uniquely named temp
/// file followed by a rename.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    /// Open a chunk store rooted at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Get the root path of the cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-disk location of the blob for `id`, whether or not it exists.
    ///
    /// Transfers target this path directly.
    pub fn path_for(&self, id: &ChunkId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Check if a chunk is present in the cache.
    pub fn contains(&self, id: &ChunkId) -> bool {
        self.path_for(id).is_file()
    }

    /// Read the stored bytes for `id`.
    ///
    /// The bytes are returned as stored; callers that need the integrity
    /// guarantee must rehash them.
    #[instrument(skip(self), level = "debug")]
    pub fn read(&self, id: &ChunkId) -> Result<Vec<u8>> {
        match fs::read(self.path_for(id)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CasError::NotFound {
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Store `data` under `id`.
    ///
    /// Skipped if a blob of exactly `data.len()` bytes is already present. A
    /// blob of any other length is overwritten. Returns whether a write
    /// happened.
    #[instrument(skip(self, data), fields(len = data.len()), level = "debug")]
    pub fn write(&self, id: &ChunkId, data: &[u8]) -> Result<bool> {
        let path = self.path_for(id);

        if let Ok(meta) = fs::metadata(&path) {
            if meta.is_file() && meta.len() == data.len() as u64 {
                return Ok(false);
            }
            debug!(existing = meta.len(), "overwriting chunk with mismatched length");
        }

        self.commit(id, &path, |file| file.write_all(data))?;
        Ok(true)
    }

    /// Store the contents of `reader` under `id` unless any blob already
    /// exists there. An existing blob is assumed correct and left untouched.
    #[instrument(skip(self, reader), level = "debug")]
    pub fn write_from_stream<R: Read + ?Sized>(&self, id: &ChunkId, reader: &mut R) -> Result<bool> {
        let path = self.path_for(id);
        if path.exists() {
            return Ok(false);
        }

        self.commit(id, &path, |file| io::copy(reader, file).map(|_| ()))?;
        Ok(true)
    }

    /// Write through a temp sibling and rename into place, so an interrupted
    /// write never leaves a truncated blob under a chunk name.
    fn commit<F>(&self, id: &ChunkId, path: &Path, fill: F) -> Result<()>
    where
        F: FnOnce(&mut File) -> io::Result<()>,
    {
        // Unique per process and thread so parallel writers never collide
        let temp_path = self.root.join(format!(
            "{}.{}.{:?}.tmp",
            id,
            std::process::id(),
            std::thread::current().id()
        ));

        let written = File::create(&temp_path).and_then(|mut file| {
            fill(&mut file)?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            // Another writer won the race with the same content
            if path.is_file() {
                return Ok(());
            }
            return Err(e.into());
        }

        Ok(())
    }

    /// Evict a single chunk.
    pub fn remove(&self, id: &ChunkId) -> Result<()> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CasError::NotFound {
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// List every chunk in the cache.
    ///
    /// The remote index, temp files and anything not named like a chunk id
    /// (including lower-case digests, which `path_for` never produces) are
    /// skipped.
    pub fn list(&self) -> Result<Vec<ChunkEntry>> {
        let mut entries = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .filter(|n| ChunkId::is_canonical(n))
                .and_then(ChunkId::parse)
            else {
                continue;
            };

            match entry.metadata() {
                Ok(meta) => entries.push(ChunkEntry {
                    id,
                    size: meta.len(),
                }),
                // Evicted between read_dir and stat
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(entries)
    }

    /// Return the ids in `ids` that are not present locally, deduplicated,
    /// in first-seen order.
    pub fn missing<'a, I>(&self, ids: I) -> Vec<ChunkId>
    where
        I: IntoIterator<Item = &'a ChunkId>,
    {
        let mut seen = HashSet::new();
        ids.into_iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter(|id| !self.contains(id))
            .cloned()
            .collect()
    }

    /// Delete every stored chunk, plus temp files left by interrupted
    /// writes. The remote index is left in place. Returns the number of
    /// chunks removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in self.list()? {
            match fs::remove_file(self.path_for(&entry.id)) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let is_temp = name.to_str().is_some_and(|n| n.ends_with(".tmp"));
            if !is_temp || !entry.file_type()?.is_file() {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => debug!(name = ?name, "removed stale temp file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(removed)
    }

    /// Get statistics about the cache.
    pub fn stats(&self) -> Result<CacheStats> {
        let entries = self.list()?;
        Ok(CacheStats {
            chunk_count: entries.len() as u64,
            total_bytes: entries.iter().map(|e| e.size).sum(),
        })
    }
}

/// Statistics about the chunk cache
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of chunks stored
    pub chunk_count: u64,
    /// Total bytes stored
    pub total_bytes: u64,
}

impl CacheStats {
    /// Calculate average chunk size
    pub fn avg_chunk_size(&self) -> u64 {
        if self.chunk_count == 0 {
            0
        } else {
            self.total_bytes / self.chunk_count
        }
    }
}
