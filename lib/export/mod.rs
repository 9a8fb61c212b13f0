//! Checkpointed incremental export of local tables into cumulative remote statements.

pub mod checkpoint;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod merge_writer;
pub mod serializer;
pub mod spool;
pub mod types;

#[cfg(test)]
mod test_support;

pub use checkpoint::{
    CheckpointError, CheckpointStore, Checkpoints, InMemoryCheckpointStore, JsonFileCheckpointStore,
};
pub use coordinator::{
    ExportCoordinator, ExportRunSummary, SourceOutcome, SourceReport, SourceState,
};
pub use error::{ExportError, ExportRunError, SourceUnavailable};
pub use fetcher::{InMemoryRowFetcher, MysqlRowFetcher, RowFetcher, MYSQL_SOURCES};
pub use merge_writer::{merge_statement, CommitOutcome, MergeWriter, MergedContent};
pub use serializer::serialize;
pub use spool::IncrementSpool;
pub use types::{Payload, Row, RowSet, Value, Watermark};
