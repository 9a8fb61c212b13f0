use thiserror::Error;

use super::checkpoint::CheckpointError;
use super::types::Watermark;
use crate::remote_store::StoreError;

/// Reading a source failed; the source keeps its prior watermark for this run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("source `{source_name}` unavailable: {reason}")]
pub struct SourceUnavailable {
    pub source_name: String,
    pub reason: String,
}

impl SourceUnavailable {
    pub fn new(source_name: &str, reason: impl Into<String>) -> Self {
        Self {
            source_name: source_name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Per-source export failure; none of these abort the run.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    SourceUnavailable(#[from] SourceUnavailable),

    #[error("source `{source_name}` returned row {index} at {found}, not after {after}")]
    OrderingViolation {
        source_name: String,
        index: usize,
        found: Watermark,
        after: Watermark,
    },

    #[error("remote write to `{object}` failed: {error}")]
    RemoteWriteFailed {
        object: String,
        #[source]
        error: StoreError,
    },
}

/// Failures that end the export run as a whole.
#[derive(Error, Debug)]
pub enum ExportRunError {
    #[error("could not load checkpoints: {0}")]
    LoadCheckpoints(#[source] CheckpointError),

    #[error("could not save checkpoints: {0}")]
    SaveCheckpoints(#[source] CheckpointError),
}
