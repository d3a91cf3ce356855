//! Remote index: which chunk ids the remote is believed to hold.
//!
//! The index is a cache of past observations, never an authority. It is
//! seeded once from a full remote listing, grows by set union whenever
//! uploads or downloads prove a chunk is remote, and is never pruned. A chunk
//! pushed by another client stays unknown here until this index is told.

use std::collections::BTreeSet;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use gitbin_cas::{ChunkId, Remote, REMOTE_INDEX_FILENAME};

use crate::{document, Result};

/// On-disk form. Unknown keys are ignored so older index files that carried
/// an unused `Filename` still load.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IndexDocument {
    #[serde(default)]
    chunk_hashes: BTreeSet<String>,
}

/// Persisted approximation of the remote's contents, stored inside the cache
/// root.
pub struct RemoteIndex<'r> {
    path: PathBuf,
    remote: &'r dyn Remote,
}

impl<'r> RemoteIndex<'r> {
    pub fn new(cache_root: &Path, remote: &'r dyn Remote) -> Self {
        Self {
            path: cache_root.join(REMOTE_INDEX_FILENAME),
            remote,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the one-time remote listing has already happened.
    pub fn is_seeded(&self) -> bool {
        self.path.is_file()
    }

    /// All chunk ids currently believed to be on the remote.
    pub fn known(&self) -> Result<BTreeSet<String>> {
        Ok(self.load_or_seed()?.chunk_hashes)
    }

    /// Ids present locally that the index does not know to be remote.
    ///
    /// The first call on a fresh cache lists the remote; later calls are a
    /// pure local set difference.
    pub fn diff_local_against_known_remote(&self, local: &[ChunkId]) -> Result<Vec<ChunkId>> {
        let index = self.load_or_seed()?;
        info!(count = local.len(), "files in cache");

        let mut seen = HashSet::new();
        let unknown: Vec<ChunkId> = local
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter(|id| !index.chunk_hashes.contains(id.as_str()))
            .cloned()
            .collect();

        info!(count = unknown.len(), "files in cache not in remote");
        Ok(unknown)
    }

    /// Merge `ids` into the known set and persist it. Returns how many ids
    /// were new to the index.
    pub fn record_as_remote(&self, ids: &[ChunkId]) -> Result<usize> {
        let mut index = self.load_or_seed()?;

        let before = index.chunk_hashes.len();
        index
            .chunk_hashes
            .extend(ids.iter().map(|id| id.as_str().to_owned()));
        let added = index.chunk_hashes.len() - before;

        if added > 0 {
            self.persist(&index)?;
        }
        Ok(added)
    }

    fn load_or_seed(&self) -> Result<IndexDocument> {
        if self.path.is_file() {
            let loaded = fs::read_to_string(&self.path)
                .map_err(crate::ManifestError::from)
                .and_then(|text| document::decode::<IndexDocument>(&text));
            match loaded {
                Ok(index) => return Ok(index),
                Err(e) => warn!(path = ?self.path, error = %e, "remote index unreadable, reseeding"),
            }
        }
        self.seed()
    }

    fn seed(&self) -> Result<IndexDocument> {
        info!(remote = self.remote.name(), "no remote index found, getting remote file list");
        let files = self.remote.list_files()?;
        info!(count = files.len(), "remote files found");

        let index = IndexDocument {
            chunk_hashes: files
                .into_iter()
                .map(|f| f.name)
                .filter(|name| ChunkId::is_canonical(name))
                .collect(),
        };
        self.persist(&index)?;
        Ok(index)
    }

    fn persist(&self, index: &IndexDocument) -> Result<()> {
        let text = document::encode(index)?;
        let temp = self
            .path
            .with_extension(format!("{}.tmp", std::process::id()));
        fs::write(&temp, text)?;
        if let Err(e) = fs::rename(&temp, &self.path) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }
}
