//! # gitbin-manifest
//!
//! The manifest is the small text document that replaces a binary file's
//! content in version control: the original filename plus the ordered list of
//! chunk ids whose concatenated bytes reproduce the file.
//!
//! ```text
//! Filename: assets/golem.tga
//! ChunkHashes:
//! - 0B2F...9C1E
//! - 7A44...D0F3
//! ```
//!
//! The same document codec also persists the [`RemoteIndex`], the local
//! record of which chunk ids the remote is known to hold.

pub mod document;
pub mod remote_index;

pub use gitbin_cas::REMOTE_INDEX_FILENAME;
pub use remote_index::RemoteIndex;

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gitbin_cas::ChunkId;

/// Errors that can occur during manifest and index operations
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Document error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] gitbin_cas::RemoteError),
}

pub type Result<T> = std::result::Result<T, ManifestError>;

/// Ordered chunk list for one file.
///
/// Concatenating the chunks in list order reproduces the original file
/// exactly. Chunks are never reordered or deduplicated within a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Manifest {
    filename: String,
    chunk_hashes: Vec<ChunkId>,
}

impl Manifest {
    /// Create an empty manifest for `filename`.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            chunk_hashes: Vec::new(),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn chunk_hashes(&self) -> &[ChunkId] {
        &self.chunk_hashes
    }

    /// Append the next chunk of the file.
    pub fn record_chunk(&mut self, id: ChunkId) {
        self.chunk_hashes.push(id);
    }

    pub fn len(&self) -> usize {
        self.chunk_hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_hashes.is_empty()
    }

    /// Render the manifest as its text document.
    pub fn to_document(&self) -> Result<String> {
        document::encode(self)
    }

    /// Parse a manifest document.
    pub fn from_document(text: &str) -> Result<Self> {
        document::decode(text)
    }

    /// Check whether `bytes` already are a manifest document.
    ///
    /// Binary data, unrelated text and YAML with any other shape all yield
    /// `None`; this is the routine "clean or pass through?" probe, not an
    /// error path.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        document::probe(bytes)
    }
}
