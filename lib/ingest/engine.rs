use chrono::{Duration, NaiveDateTime};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::feed::AttendanceFeed;
use crate::attendance::{AttendanceDbError, AttendanceStore, DedupKey};
use crate::hr_feed::{next_cursor, AttendanceEvent, FeedError};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("could not determine the ingest cursor: {0}")]
    Cursor(#[source] AttendanceDbError),
}

/// Counters for one ingest run.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub pages: u32,
    pub events_seen: usize,
    pub inserted: usize,
    pub duplicates: usize,
    /// Events whose dedup check or insert failed; they are picked up by a later run.
    pub failed: usize,
    /// Set when a page request failed and paging stopped early.
    pub feed_error: Option<FeedError>,
    pub cancelled: bool,
}

impl IngestSummary {
    pub fn is_clean(&self) -> bool {
        self.feed_error.is_none() && self.failed == 0 && !self.cancelled
    }
}

enum EventOutcome {
    Inserted,
    Duplicate,
    Failed,
}

/// Pages through the HR feed from a cursor and inserts unseen punches.
///
/// Every event is checked against both attendance tables before it is written; an event found
/// in either one is skipped.
pub struct DedupIngestEngine<F, S> {
    feed: F,
    store: S,
    lookback: Duration,
    cancel: CancellationToken,
}

impl<F, S> DedupIngestEngine<F, S>
where
    F: AttendanceFeed,
    S: AttendanceStore,
{
    pub fn new(feed: F, store: S, lookback_days: i64) -> Self {
        Self {
            feed,
            store,
            lookback: Duration::days(lookback_days.max(0)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Newest stored HR punch, or `now - lookback` on a first run.
    pub async fn starting_cursor(&self, now: NaiveDateTime) -> Result<NaiveDateTime, IngestError> {
        let latest = self
            .store
            .latest_hr_timestamp()
            .await
            .map_err(IngestError::Cursor)?;
        Ok(latest.unwrap_or(now - self.lookback))
    }

    pub async fn run(&self, now: NaiveDateTime) -> Result<IngestSummary, IngestError> {
        let start = self.starting_cursor(now).await?;
        let today = now.date();
        let mut cursor = start.date();
        let mut summary = IngestSummary::default();

        tracing::info!(event = "ingest_started", cursor = %cursor, "starting HR ingest");

        loop {
            if self.cancel.is_cancelled() {
                tracing::warn!(event = "ingest_cancelled", cursor = %cursor);
                summary.cancelled = true;
                break;
            }

            let events = match self.feed.fetch_page(cursor).await {
                Ok(events) => events,
                Err(err) => {
                    tracing::error!(
                        event = "ingest_feed_failed",
                        cursor = %cursor,
                        error = %err,
                        "HR feed request failed; stopping, committed inserts are kept"
                    );
                    summary.feed_error = Some(err);
                    break;
                }
            };
            summary.pages += 1;
            summary.events_seen += events.len();

            for event in &events {
                match self.ingest_event(event).await {
                    EventOutcome::Inserted => summary.inserted += 1,
                    EventOutcome::Duplicate => summary.duplicates += 1,
                    EventOutcome::Failed => summary.failed += 1,
                }
            }

            match next_cursor(&events, cursor, today) {
                Some(next) => cursor = next,
                None => break,
            }
        }

        tracing::info!(
            event = "ingest_completed",
            pages = summary.pages,
            events = summary.events_seen,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            failed = summary.failed,
            "HR ingest finished"
        );
        Ok(summary)
    }

    async fn ingest_event(&self, event: &AttendanceEvent) -> EventOutcome {
        let key = DedupKey::from(event);

        match self.store.find_duplicate(&key).await {
            Ok(Some(table)) => {
                tracing::debug!(
                    event = "ingest_event_duplicate",
                    user_id = %event.employee_id,
                    timestamp = %event.timestamp,
                    punch = %event.punch,
                    table = table.as_str()
                );
                return EventOutcome::Duplicate;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(
                    event = "ingest_event_check_failed",
                    user_id = %event.employee_id,
                    timestamp = %event.timestamp,
                    error = %err,
                    "duplicate check failed; event skipped"
                );
                return EventOutcome::Failed;
            }
        }

        match self.store.insert_hr_event(event).await {
            Ok(()) => {
                tracing::info!(
                    event = "ingest_event_inserted",
                    user_id = %event.employee_id,
                    timestamp = %event.timestamp,
                    punch = %event.punch
                );
                EventOutcome::Inserted
            }
            Err(err) => {
                tracing::error!(
                    event = "ingest_event_insert_failed",
                    user_id = %event.employee_id,
                    timestamp = %event.timestamp,
                    error = %err
                );
                EventOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::DedupIngestEngine;
    use crate::attendance::{DedupKey, InMemoryAttendanceStore};
    use crate::db::models::{SOURCE_DEVICE, SOURCE_HR};
    use crate::hr_feed::{FeedError, PunchType};
    use crate::ingest::test_support::{at, date, event, ScriptedFeed};

    #[tokio::test]
    async fn first_run_starts_from_lookback_window() {
        let feed = Arc::new(ScriptedFeed::with_pages(vec![Ok(vec![])]));
        let engine = DedupIngestEngine::new(feed.clone(), InMemoryAttendanceStore::new(), 30);

        engine.run(at(20, 12)).await.unwrap();

        assert_eq!(feed.requested(), vec![date(20) - chrono::Duration::days(30)]);
    }

    #[tokio::test]
    async fn cursor_resumes_from_latest_hr_punch_only() {
        let store = InMemoryAttendanceStore::new();
        store.seed_log("E1", at(10, 9), PunchType::CheckIn, true, SOURCE_HR);
        store.seed_log("E1", at(15, 9), PunchType::CheckIn, false, SOURCE_DEVICE);
        let feed = Arc::new(ScriptedFeed::with_pages(vec![Ok(vec![])]));
        let engine = DedupIngestEngine::new(feed.clone(), store, 30);

        engine.run(at(20, 12)).await.unwrap();

        assert_eq!(feed.requested(), vec![date(10)]);
    }

    #[tokio::test]
    async fn duplicates_in_either_table_are_skipped() {
        let store = Arc::new(InMemoryAttendanceStore::new());
        store.seed_log("E1", at(11, 9), PunchType::CheckIn, true, SOURCE_HR);
        store.seed_raw_hr("E2", at(11, 9), PunchType::CheckIn);
        let feed = ScriptedFeed::with_pages(vec![Ok(vec![
            event("E1", at(11, 9), PunchType::CheckIn),
            event("E2", at(11, 9), PunchType::CheckIn),
            event("E1", at(11, 17), PunchType::CheckOut),
            event("E1", at(11, 17), PunchType::CheckOut),
        ])]);
        let engine = DedupIngestEngine::new(feed, store.clone(), 30);

        let summary = engine.run(at(11, 20)).await.unwrap();

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.duplicates, 3);
        assert_eq!(store.logs().len(), 2);
        assert_eq!(store.raw_hr_count(), 2);
        let inserted = &store.logs()[1];
        assert!(inserted.synced);
        assert_eq!(inserted.source, SOURCE_HR);
    }

    #[tokio::test]
    async fn repeated_run_inserts_nothing_new() {
        let store = Arc::new(InMemoryAttendanceStore::new());
        let page = vec![
            event("E1", at(12, 9), PunchType::CheckIn),
            event("E1", at(12, 18), PunchType::CheckOut),
        ];

        let first = DedupIngestEngine::new(
            ScriptedFeed::with_pages(vec![Ok(page.clone())]),
            store.clone(),
            30,
        )
        .run(at(12, 20))
        .await
        .unwrap();
        let second = DedupIngestEngine::new(
            ScriptedFeed::with_pages(vec![Ok(page)]),
            store.clone(),
            30,
        )
        .run(at(12, 20))
        .await
        .unwrap();

        assert_eq!(first.inserted, 2);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(store.logs().len(), 2);
        assert_eq!(store.raw_hr_count(), 2);
    }

    #[tokio::test]
    async fn pages_advance_by_day_until_no_progress() {
        let feed = Arc::new(ScriptedFeed::with_pages(vec![
            Ok(vec![event("E1", at(3, 9), PunchType::CheckIn)]),
            Ok(vec![event("E1", at(5, 9), PunchType::CheckIn)]),
            Ok(vec![]),
        ]));
        let store = InMemoryAttendanceStore::new();
        store.seed_log("E0", at(1, 9), PunchType::CheckIn, true, SOURCE_HR);
        let engine = DedupIngestEngine::new(feed.clone(), store, 30);

        let summary = engine.run(at(20, 9)).await.unwrap();

        assert_eq!(feed.requested(), vec![date(1), date(4), date(6)]);
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.inserted, 2);
    }

    #[tokio::test]
    async fn feed_failure_stops_paging_and_keeps_earlier_inserts() {
        let store = Arc::new(InMemoryAttendanceStore::new());
        store.seed_log("E0", at(1, 9), PunchType::CheckIn, true, SOURCE_HR);
        let feed = Arc::new(ScriptedFeed::with_pages(vec![
            Ok(vec![event("E1", at(2, 9), PunchType::CheckIn)]),
            Err(FeedError::Malformed("truncated".to_string())),
            Ok(vec![event("E1", at(5, 9), PunchType::CheckIn)]),
        ]));
        let engine = DedupIngestEngine::new(feed.clone(), store.clone(), 30);

        let summary = engine.run(at(20, 9)).await.unwrap();

        assert_eq!(summary.inserted, 1);
        assert!(summary.feed_error.is_some());
        assert!(!summary.is_clean());
        assert_eq!(feed.requested().len(), 2);
        assert_eq!(store.logs().len(), 2);
    }

    #[tokio::test]
    async fn failed_duplicate_check_skips_only_that_event() {
        let store = Arc::new(InMemoryAttendanceStore::new());
        let broken = event("E1", at(2, 9), PunchType::CheckIn);
        store.fail_lookup_for(DedupKey::from(&broken));
        let feed = ScriptedFeed::with_pages(vec![Ok(vec![
            broken,
            event("E2", at(2, 9), PunchType::CheckIn),
        ])]);
        let engine = DedupIngestEngine::new(feed, store.clone(), 30);

        let summary = engine.run(at(2, 20)).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.inserted, 1);
        assert_eq!(store.logs()[0].user_id, "E2");
    }

    #[tokio::test]
    async fn cursor_lookup_failure_is_an_error() {
        let store = InMemoryAttendanceStore::new();
        store.fail_reads(true);
        let feed = Arc::new(ScriptedFeed::with_pages(vec![]));
        let engine = DedupIngestEngine::new(feed.clone(), store, 30);

        assert!(engine.run(at(2, 20)).await.is_err());
        assert!(feed.requested().is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_first_page() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let feed = Arc::new(ScriptedFeed::with_pages(vec![Ok(vec![])]));
        let engine = DedupIngestEngine::new(feed.clone(), InMemoryAttendanceStore::new(), 30)
            .with_cancellation(cancel);

        let summary = engine.run(at(2, 20)).await.unwrap();

        assert!(summary.cancelled);
        assert!(feed.requested().is_empty());
    }
}
