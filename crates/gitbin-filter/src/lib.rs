//! # gitbin-filter
//!
//! The three operations git-bin performs on behalf of git:
//! - [`CleanFilter`]: raw file bytes in, manifest document out (check-in)
//! - [`SmudgeFilter`]: manifest document in, verified file bytes out (check-out)
//! - [`PushOrchestrator`]: upload cached chunks the remote does not know about
//!
//! Filters take their input and output streams explicitly; nothing here
//! touches the process's stdio on its own.

pub mod clean;
pub mod push;
pub mod smudge;

pub use clean::{CleanFilter, CleanOutcome};
pub use push::{PushOrchestrator, PushOutcome};
pub use smudge::{SmudgeFilter, SmudgeOutcome};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache error: {0}")]
    Cas(#[from] gitbin_cas::CasError),

    #[error("Remote error: {0}")]
    Remote(#[from] gitbin_cas::RemoteError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] gitbin_manifest::ManifestError),

    #[error("{filename}: chunks still failed verification after {passes} passes")]
    IntegrityRetriesExhausted { filename: String, passes: u32 },
}

pub type Result<T> = std::result::Result<T, FilterError>;
