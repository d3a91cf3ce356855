//! Check-out filter: turn a manifest back into the file it describes.
//!
//! Each pass fetches whatever the cache lacks, then re-reads and rehashes
//! every chunk in manifest order into a spool file. A chunk whose bytes do
//! not hash to its name is evicted and the pass is thrown away; the next pass
//! fetches it again. Only a pass with zero mismatches reaches the output.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use gitbin_cas::{CasError, ChunkId, ChunkStore, Remote, TransferEngine};
use gitbin_config::{log_smudge_debug, log_smudge_info, log_smudge_warn};
use gitbin_manifest::{Manifest, RemoteIndex};

use crate::{FilterError, Result};

/// What the smudge filter wrote to its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmudgeOutcome {
    /// The file was rebuilt from its chunks.
    Restored { chunks: usize, bytes: u64, passes: u32 },
    /// Input was not a manifest and was copied through unchanged.
    PassThrough { bytes: u64 },
}

/// Result of assembling one pass into the spool.
enum Pass {
    Clean { bytes: u64 },
    /// Chunks that were corrupt or had vanished from the cache.
    Stale { count: usize },
}

pub struct SmudgeFilter<'a> {
    store: &'a ChunkStore,
    remote: &'a dyn Remote,
    engine: TransferEngine,
    max_passes: Option<u32>,
}

impl<'a> SmudgeFilter<'a> {
    pub fn new(store: &'a ChunkStore, remote: &'a dyn Remote, engine: TransferEngine) -> Self {
        Self {
            store,
            remote,
            engine,
            max_passes: None,
        }
    }

    /// Give up after `max_passes` failed verification passes. `None` retries
    /// until a pass verifies.
    pub fn with_max_passes(mut self, max_passes: Option<u32>) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Read a manifest from `input` and write the restored file to `output`.
    pub fn run<R: Read, W: Write>(&self, mut input: R, mut output: W) -> Result<SmudgeOutcome> {
        let mut raw = Vec::new();
        input.read_to_end(&mut raw)?;

        let Some(manifest) = Manifest::detect(&raw) else {
            output.write_all(&raw)?;
            output.flush()?;
            log_smudge_debug!("input is not a manifest, passing through", bytes = raw.len());
            return Ok(SmudgeOutcome::PassThrough {
                bytes: raw.len() as u64,
            });
        };

        let index = RemoteIndex::new(self.store.root(), self.remote);
        let mut passes = 0u32;

        loop {
            passes += 1;
            self.fetch_missing(&manifest, &index)?;

            let mut spool = tempfile::tempfile()?;
            match self.assemble(&manifest, &mut spool)? {
                Pass::Clean { bytes } => {
                    spool.seek(SeekFrom::Start(0))?;
                    io::copy(&mut spool, &mut output)?;
                    output.flush()?;

                    log_smudge_info!(
                        "file restored",
                        filename = manifest.filename(),
                        chunks = manifest.len(),
                        bytes = bytes,
                        passes = passes,
                    );
                    return Ok(SmudgeOutcome::Restored {
                        chunks: manifest.len(),
                        bytes,
                        passes,
                    });
                }
                Pass::Stale { count } => {
                    log_smudge_warn!(
                        "chunks failed verification, refetching",
                        filename = manifest.filename(),
                        stale = count,
                        pass = passes,
                    );
                    if self.max_passes.is_some_and(|max| passes >= max) {
                        return Err(FilterError::IntegrityRetriesExhausted {
                            filename: manifest.filename().to_string(),
                            passes,
                        });
                    }
                }
            }
        }
    }

    /// Download every chunk the cache lacks, straight to its cache path.
    fn fetch_missing(&self, manifest: &Manifest, index: &RemoteIndex<'_>) -> Result<()> {
        let missing = self.store.missing(manifest.chunk_hashes());
        if missing.is_empty() {
            return Ok(());
        }

        log_smudge_info!(
            "downloading missing chunks",
            count = missing.len(),
            remote = self.remote.name(),
        );

        let store = self.store;
        let remote = self.remote;
        self.engine
            .run(&missing, |ids: &[ChunkId], i: usize| -> Result<()> {
                let id = &ids[i];
                remote.download_file(&store.path_for(id), id.as_str())?;
                Ok(())
            })?;

        // Anything we just downloaded is certainly on the remote. The index is
        // only a hint, so failing to update it must not cost the checkout.
        if let Err(e) = index.record_as_remote(&missing) {
            log_smudge_warn!(
                "could not update remote index",
                error = tracing::field::display(&e),
            );
        }
        Ok(())
    }

    /// Verify every chunk and concatenate the good ones into `spool`.
    ///
    /// Once one chunk is stale the rest are still checked (so all bad blobs
    /// are evicted in one go) but no longer copied.
    fn assemble(&self, manifest: &Manifest, spool: &mut File) -> Result<Pass> {
        let mut stale = 0usize;
        let mut bytes = 0u64;

        for id in manifest.chunk_hashes() {
            let data = match self.store.read(id) {
                Ok(data) => data,
                Err(CasError::NotFound { .. }) => {
                    stale += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let actual = ChunkId::compute(&data);
            if !actual.matches(id) {
                log_smudge_warn!(
                    "chunk content does not match its id, evicting",
                    expected = id.as_str(),
                    actual = actual.as_str(),
                );
                // Best effort: a blob that refuses to go just fails verification again
                let _ = self.store.remove(id);
                stale += 1;
                continue;
            }

            if stale == 0 {
                spool.write_all(&data)?;
                bytes += data.len() as u64;
            }
        }

        if stale > 0 {
            return Ok(Pass::Stale { count: stale });
        }
        Ok(Pass::Clean { bytes })
    }
}
