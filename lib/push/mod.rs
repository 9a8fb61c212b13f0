//! Sends locally captured punches that the HR system has not seen yet.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDateTime;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::attendance::{AttendanceDbError, AttendanceStore, PunchRecord};
use crate::hr_feed::{FeedError, PunchType, ZohoClient};

/// HR-side operations the push step needs.
pub trait PushTarget: Send + Sync {
    fn employee_ids<'a>(&'a self) -> BoxFuture<'a, Result<HashSet<String>, FeedError>>;

    fn push<'a>(
        &'a self,
        employee_id: &'a str,
        at: NaiveDateTime,
        punch: PunchType,
    ) -> BoxFuture<'a, Result<(), FeedError>>;
}

impl<T> PushTarget for Arc<T>
where
    T: PushTarget + ?Sized,
{
    fn employee_ids<'a>(&'a self) -> BoxFuture<'a, Result<HashSet<String>, FeedError>> {
        (**self).employee_ids()
    }

    fn push<'a>(
        &'a self,
        employee_id: &'a str,
        at: NaiveDateTime,
        punch: PunchType,
    ) -> BoxFuture<'a, Result<(), FeedError>> {
        (**self).push(employee_id, at, punch)
    }
}

impl PushTarget for ZohoClient {
    fn employee_ids<'a>(&'a self) -> BoxFuture<'a, Result<HashSet<String>, FeedError>> {
        Box::pin(self.fetch_employee_ids())
    }

    fn push<'a>(
        &'a self,
        employee_id: &'a str,
        at: NaiveDateTime,
        punch: PunchType,
    ) -> BoxFuture<'a, Result<(), FeedError>> {
        Box::pin(self.push_attendance(employee_id, at, punch))
    }
}

#[derive(Error, Debug)]
pub enum PushError {
    #[error("could not fetch HR employee ids: {0}")]
    Employees(#[source] FeedError),

    #[error("HR system returned no employees; refusing to push")]
    NoEmployees,

    #[error("could not load unsynced rows: {0}")]
    Load(#[source] AttendanceDbError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PushSummary {
    pub pending: usize,
    pub pushed: usize,
    pub unknown_employee: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// HR employee id for a row. Device rows carry it in `name`; fall back to `user_id`.
fn employee_id(record: &PunchRecord) -> &str {
    record
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(&record.user_id)
}

/// Pushes every unsynced row; a row is marked synced only once the HR system accepted it.
pub async fn push_unsynced<T, S>(
    target: &T,
    store: &S,
    cancel: &CancellationToken,
) -> Result<PushSummary, PushError>
where
    T: PushTarget + ?Sized,
    S: AttendanceStore + ?Sized,
{
    let known = target.employee_ids().await.map_err(PushError::Employees)?;
    if known.is_empty() {
        return Err(PushError::NoEmployees);
    }

    let pending = store.unsynced_punches().await.map_err(PushError::Load)?;
    let mut summary = PushSummary {
        pending: pending.len(),
        ..PushSummary::default()
    };
    if pending.is_empty() {
        tracing::info!(event = "push_nothing_pending", "no unsynced rows");
        return Ok(summary);
    }

    for record in &pending {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }

        let employee = employee_id(record);
        if !known.contains(employee) {
            tracing::warn!(
                event = "push_unknown_employee",
                id = record.id,
                employee_id = employee,
                "employee not present in the HR system; skipped"
            );
            summary.unknown_employee += 1;
            continue;
        }

        if let Err(err) = target.push(employee, record.timestamp, record.punch).await {
            tracing::error!(
                event = "push_failed",
                id = record.id,
                employee_id = employee,
                punch = %record.punch,
                error = %err
            );
            summary.failed += 1;
            continue;
        }

        match store.mark_synced(record.id).await {
            Ok(()) => {
                summary.pushed += 1;
                tracing::info!(
                    event = "push_succeeded",
                    id = record.id,
                    employee_id = employee,
                    timestamp = %record.timestamp,
                    punch = %record.punch
                );
            }
            Err(err) => {
                // Accepted remotely but still unsynced locally; the next run pushes it again.
                tracing::error!(
                    event = "push_mark_synced_failed",
                    id = record.id,
                    error = %err
                );
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        event = "push_completed",
        pending = summary.pending,
        pushed = summary.pushed,
        unknown_employee = summary.unknown_employee,
        failed = summary.failed
    );
    Ok(summary)
}
