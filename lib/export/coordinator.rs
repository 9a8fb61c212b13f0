use std::fmt;

use tokio_util::sync::CancellationToken;

use super::checkpoint::CheckpointStore;
use super::error::{ExportError, ExportRunError};
use super::fetcher::RowFetcher;
use super::merge_writer::{CommitOutcome, MergeWriter};
use super::serializer::serialize;
use super::spool::IncrementSpool;
use super::types::{Row, Watermark};
use crate::config::ExportConfig;
use crate::remote_store::ObjectStore;

/// Lifecycle of one source within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    Fetched,
    Serialized,
    Committed,
    Checkpointed,
    Failed,
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Fetched => "fetched",
            Self::Serialized => "serialized",
            Self::Committed => "committed",
            Self::Checkpointed => "checkpointed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum SourceOutcome {
    /// Rows were written remotely and the in-memory checkpoint moved to `watermark`.
    Checkpointed {
        rows: usize,
        previous: Watermark,
        watermark: Watermark,
        commit: CommitOutcome,
    },
    /// No rows past the watermark; nothing was written.
    NothingToExport { watermark: Watermark },
    /// `reached` is the last state the source got to before `error`.
    Failed {
        reached: SourceState,
        error: ExportError,
    },
    /// The run was cancelled before this source started.
    Cancelled,
}

impl SourceOutcome {
    pub fn state(&self) -> SourceState {
        match self {
            Self::Checkpointed { .. } => SourceState::Checkpointed,
            Self::NothingToExport { .. } | Self::Cancelled => SourceState::Idle,
            Self::Failed { .. } => SourceState::Failed,
        }
    }
}

#[derive(Debug)]
pub struct SourceReport {
    pub source: String,
    pub outcome: SourceOutcome,
}

/// Outcome summary of one export `run()`.
#[derive(Debug, Default)]
pub struct ExportRunSummary {
    pub sources: Vec<SourceReport>,
}

impl ExportRunSummary {
    pub fn outcome(&self, source: &str) -> Option<&SourceOutcome> {
        self.sources
            .iter()
            .find(|report| report.source == source)
            .map(|report| &report.outcome)
    }

    pub fn checkpointed_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, SourceOutcome::Checkpointed { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, SourceOutcome::Failed { .. }))
    }

    pub fn cancelled_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, SourceOutcome::Cancelled))
    }

    pub fn rows_exported(&self) -> usize {
        self.sources
            .iter()
            .map(|report| match &report.outcome {
                SourceOutcome::Checkpointed { rows, .. } => *rows,
                _ => 0,
            })
            .sum()
    }

    fn count(&self, predicate: impl Fn(&SourceOutcome) -> bool) -> usize {
        self.sources
            .iter()
            .filter(|report| predicate(&report.outcome))
            .count()
    }
}

struct Committed {
    rows: usize,
    watermark: Watermark,
    commit: CommitOutcome,
}

struct Failure {
    reached: SourceState,
    error: ExportError,
}

/// Runs fetch -> serialize -> commit for every configured source, in order, and advances a
/// source's checkpoint only after its remote write is confirmed.
pub struct ExportCoordinator<F, S, C> {
    fetcher: F,
    writer: MergeWriter<S>,
    checkpoints: C,
    config: ExportConfig,
    spool: Option<IncrementSpool>,
    cancel: CancellationToken,
}

impl<F, S, C> ExportCoordinator<F, S, C>
where
    F: RowFetcher,
    S: ObjectStore,
    C: CheckpointStore,
{
    pub fn new(fetcher: F, writer: MergeWriter<S>, checkpoints: C, config: ExportConfig) -> Self {
        let spool = config.spool_dir.clone().map(IncrementSpool::new);
        Self {
            fetcher,
            writer,
            checkpoints,
            config,
            spool,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Loads checkpoints, exports each source, then saves the checkpoint map once.
    ///
    /// Per-source failures are reported in the summary. Only checkpoint load/save failures
    /// end the run with an error.
    pub async fn run(&self) -> Result<ExportRunSummary, ExportRunError> {
        let loaded = self
            .checkpoints
            .load()
            .map_err(ExportRunError::LoadCheckpoints)?;
        let mut working = loaded.clone();
        let mut summary = ExportRunSummary::default();

        for source in &self.config.sources {
            if self.cancel.is_cancelled() {
                tracing::warn!(event = "export_source_cancelled", source = %source);
                summary.sources.push(SourceReport {
                    source: source.clone(),
                    outcome: SourceOutcome::Cancelled,
                });
                continue;
            }

            let previous = loaded.get(source);
            let outcome = match self.export_source(source, previous).await {
                Ok(Some(committed)) => {
                    working.advance(source, committed.watermark);
                    tracing::info!(
                        event = "export_source_checkpointed",
                        source = %source,
                        rows = committed.rows,
                        previous = %previous,
                        watermark = %committed.watermark,
                        created = committed.commit.created,
                        repaired = committed.commit.repaired,
                        "source exported"
                    );
                    SourceOutcome::Checkpointed {
                        rows: committed.rows,
                        previous,
                        watermark: committed.watermark,
                        commit: committed.commit,
                    }
                }
                Ok(None) => {
                    tracing::info!(
                        event = "export_source_empty",
                        source = %source,
                        watermark = %previous,
                        "no new rows"
                    );
                    SourceOutcome::NothingToExport { watermark: previous }
                }
                Err(Failure { reached, error }) => {
                    tracing::error!(
                        event = "export_source_failed",
                        source = %source,
                        state = %reached,
                        watermark = %previous,
                        error = %error,
                        "source export failed; watermark kept"
                    );
                    SourceOutcome::Failed { reached, error }
                }
            };
            summary.sources.push(SourceReport {
                source: source.clone(),
                outcome,
            });
        }

        self.checkpoints
            .save(&working)
            .map_err(ExportRunError::SaveCheckpoints)?;

        tracing::info!(
            event = "export_run_completed",
            sources = summary.sources.len(),
            checkpointed = summary.checkpointed_count(),
            failed = summary.failed_count(),
            cancelled = summary.cancelled_count(),
            rows = summary.rows_exported(),
            "export run finished"
        );
        Ok(summary)
    }

    async fn export_source(
        &self,
        source: &str,
        watermark: Watermark,
    ) -> Result<Option<Committed>, Failure> {
        let mut reached = SourceState::Idle;
        let fail = |reached: SourceState, error: ExportError| Failure { reached, error };

        let rows = self
            .fetcher
            .fetch(source, watermark)
            .await
            .map_err(|err| fail(reached, err.into()))?;
        reached = SourceState::Fetched;
        tracing::debug!(event = "export_source_fetched", source, rows = rows.rows.len());

        validate_ordering(source, watermark, &rows.rows).map_err(|err| fail(reached, err))?;

        let Some(payload) = serialize(source, &rows.columns, &rows.rows) else {
            return Ok(None);
        };
        reached = SourceState::Serialized;

        if let Some(spool) = &self.spool {
            let now = chrono::Local::now().naive_local();
            match spool.write(source, &payload, now) {
                Ok(path) => tracing::debug!(
                    event = "export_increment_spooled",
                    source,
                    path = %path.display()
                ),
                Err(err) => tracing::warn!(
                    event = "export_spool_failed",
                    source,
                    dir = %spool.dir().display(),
                    error = %err,
                    "could not write local increment copy"
                ),
            }
        }

        let object_name = self.config.object_name(source);
        let commit = self
            .writer
            .commit(&object_name, &payload)
            .await
            .map_err(|error| {
                fail(
                    reached,
                    ExportError::RemoteWriteFailed {
                        object: object_name.clone(),
                        error,
                    },
                )
            })?;

        Ok(Some(Committed {
            rows: rows.rows.len(),
            watermark: rows.max_ordering().unwrap_or(watermark),
            commit,
        }))
    }
}

/// Rows must sit strictly after the watermark and never go backwards.
pub fn validate_ordering(
    source: &str,
    watermark: Watermark,
    rows: &[Row],
) -> Result<(), ExportError> {
    let mut floor = watermark;
    for (index, row) in rows.iter().enumerate() {
        let in_order = if index == 0 {
            row.ordering > floor
        } else {
            row.ordering >= floor
        };
        if !in_order {
            return Err(ExportError::OrderingViolation {
                source_name: source.to_string(),
                index,
                found: row.ordering,
                after: floor,
            });
        }
        floor = row.ordering;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::{validate_ordering, ExportCoordinator, SourceOutcome, SourceState};
    use crate::export::checkpoint::{Checkpoints, InMemoryCheckpointStore};
    use crate::export::error::ExportError;
    use crate::export::merge_writer::MergeWriter;
    use crate::export::test_support::{row, test_export_config, wm, ScriptedRowFetcher};
    use crate::export::types::{RowSet, Watermark};
    use crate::remote_store::InMemoryObjectStore;

    #[test]
    fn ordering_allows_ties_but_not_regressions() {
        let rows = vec![row(1, 9), row(2, 9), row(3, 10)];
        assert!(validate_ordering("t", wm(8), &rows).is_ok());

        let at_watermark = vec![row(1, 8)];
        assert!(matches!(
            validate_ordering("t", wm(8), &at_watermark),
            Err(ExportError::OrderingViolation { index: 0, .. })
        ));

        let backwards = vec![row(1, 10), row(2, 9)];
        assert!(matches!(
            validate_ordering("t", wm(8), &backwards),
            Err(ExportError::OrderingViolation { index: 1, .. })
        ));
    }

    #[tokio::test]
    async fn misordered_rows_fail_before_any_write() {
        let fetcher = ScriptedRowFetcher::with_plan(vec![(
            "attendance_logs",
            Ok(RowSet {
                columns: vec!["id".to_string()],
                rows: vec![row(1, 10), row(2, 9)],
            }),
        )]);
        let store = Arc::new(InMemoryObjectStore::new());
        let checkpoints = Arc::new(InMemoryCheckpointStore::new(Checkpoints::new()));
        let coordinator = ExportCoordinator::new(
            fetcher,
            MergeWriter::new(store.clone(), None),
            checkpoints.clone(),
            test_export_config(&["attendance_logs"]),
        );

        let summary = coordinator.run().await.unwrap();

        match summary.outcome("attendance_logs") {
            Some(SourceOutcome::Failed { reached, .. }) => {
                assert_eq!(*reached, SourceState::Fetched)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(store.write_count(), 0);
        assert_eq!(checkpoints.saved().get("attendance_logs"), Watermark::epoch());
    }

    #[tokio::test]
    async fn remote_failure_keeps_watermark_while_other_sources_advance() {
        let fetcher = ScriptedRowFetcher::with_plan(vec![
            (
                "attendance_logs",
                Ok(RowSet {
                    columns: vec!["id".to_string()],
                    rows: vec![row(1, 9)],
                }),
            ),
            (
                "raw_zoho_logs",
                Ok(RowSet {
                    columns: vec!["id".to_string()],
                    rows: vec![row(5, 11)],
                }),
            ),
        ]);
        let store = Arc::new(InMemoryObjectStore::new());
        let initial = Checkpoints::from([("attendance_logs", wm(8)), ("raw_zoho_logs", wm(8))]);
        let checkpoints = Arc::new(InMemoryCheckpointStore::new(initial));
        let coordinator = ExportCoordinator::new(
            fetcher,
            MergeWriter::new(store.clone(), None),
            checkpoints.clone(),
            test_export_config(&["attendance_logs", "raw_zoho_logs"]),
        );

        store.fail_writes(true);
        let summary = coordinator.run().await.unwrap();

        assert_eq!(summary.failed_count(), 2);
        assert!(matches!(
            summary.outcome("attendance_logs"),
            Some(SourceOutcome::Failed {
                reached: SourceState::Serialized,
                error: ExportError::RemoteWriteFailed { .. }
            })
        ));
        assert_eq!(checkpoints.saved().get("attendance_logs"), wm(8));
        assert_eq!(checkpoints.saved().get("raw_zoho_logs"), wm(8));
        assert_eq!(checkpoints.save_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_run_skips_remaining_sources_but_still_saves() {
        let fetcher = ScriptedRowFetcher::with_plan(vec![]);
        let checkpoints = Arc::new(InMemoryCheckpointStore::new(Checkpoints::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let coordinator = ExportCoordinator::new(
            fetcher,
            MergeWriter::new(InMemoryObjectStore::new(), None),
            checkpoints.clone(),
            test_export_config(&["attendance_logs", "raw_device_logs"]),
        )
        .with_cancellation(cancel);

        let summary = coordinator.run().await.unwrap();

        assert_eq!(summary.cancelled_count(), 2);
        assert_eq!(checkpoints.save_count(), 1);
    }

    #[tokio::test]
    async fn checkpoint_load_failure_aborts_before_fetching() {
        let fetcher = Arc::new(ScriptedRowFetcher::with_plan(vec![]));
        let checkpoints = InMemoryCheckpointStore::new(Checkpoints::new());
        checkpoints.fail_load(true);
        let coordinator = ExportCoordinator::new(
            fetcher.clone(),
            MergeWriter::new(InMemoryObjectStore::new(), None),
            checkpoints,
            test_export_config(&["attendance_logs"]),
        );

        assert!(coordinator.run().await.is_err());
        assert_eq!(fetcher.calls(), 0);
    }
}
