//! Upload cached chunks that the remote is not known to hold.

use gitbin_cas::{ChunkId, ChunkStore, Remote, TransferEngine};
use gitbin_config::log_push_info;
use gitbin_manifest::RemoteIndex;

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Every cached chunk is already known to be remote.
    NothingToPush,
    /// This many chunks were uploaded and recorded in the remote index.
    Uploaded(usize),
}

pub struct PushOrchestrator<'a> {
    store: &'a ChunkStore,
    remote: &'a dyn Remote,
    engine: TransferEngine,
}

impl<'a> PushOrchestrator<'a> {
    pub fn new(store: &'a ChunkStore, remote: &'a dyn Remote, engine: TransferEngine) -> Self {
        Self {
            store,
            remote,
            engine,
        }
    }

    /// Upload every local chunk the remote index does not list.
    ///
    /// On a fresh cache this first lists the remote once to seed the index.
    /// The index is only updated after all uploads succeed.
    pub fn run(&self) -> Result<PushOutcome> {
        let index = RemoteIndex::new(self.store.root(), self.remote);
        let local: Vec<ChunkId> = self.store.list()?.into_iter().map(|e| e.id).collect();

        let to_upload = index.diff_local_against_known_remote(&local)?;
        if to_upload.is_empty() {
            log_push_info!("nothing to push", cached = local.len());
            return Ok(PushOutcome::NothingToPush);
        }

        log_push_info!(
            "uploading chunks",
            count = to_upload.len(),
            remote = self.remote.name(),
        );

        let store = self.store;
        let remote = self.remote;
        let stats = self
            .engine
            .run(&to_upload, |ids: &[ChunkId], i: usize| -> Result<()> {
                let id = &ids[i];
                remote.upload_file(&store.path_for(id), id.as_str())?;
                Ok(())
            })?;

        index.record_as_remote(&to_upload)?;
        log_push_info!("push complete", uploaded = stats.succeeded);
        Ok(PushOutcome::Uploaded(stats.succeeded))
    }
}
