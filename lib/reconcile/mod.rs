//! Removes device punches that duplicate an HR punch recorded close in time.

use chrono::Duration;
use thiserror::Error;

use crate::attendance::{AttendanceDbError, AttendanceStore, PunchRecord};
use crate::db::models::{SOURCE_DEVICE, SOURCE_HR};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("could not load attendance rows: {0}")]
    Load(#[source] AttendanceDbError),

    #[error("could not delete device row {id}: {error}")]
    Delete {
        id: i64,
        #[source]
        error: AttendanceDbError,
    },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub device_rows: usize,
    pub hr_rows: usize,
    pub removed: usize,
}

/// Device rows that share user and punch kind with some HR row no more than `window` apart.
///
/// Each device row appears at most once, in input order.
pub fn find_conflicts<'a>(
    device: &'a [PunchRecord],
    hr: &[PunchRecord],
    window: Duration,
) -> Vec<&'a PunchRecord> {
    device
        .iter()
        .filter(|device_row| {
            hr.iter().any(|hr_row| {
                hr_row.user_id == device_row.user_id
                    && hr_row.punch == device_row.punch
                    && (hr_row.timestamp - device_row.timestamp).abs() <= window
            })
        })
        .collect()
}

/// Deletes conflicting device rows from `attendance_logs`.
///
/// A failed delete stops the step; rows removed before it stay removed.
pub async fn reconcile<S>(store: &S, window_secs: i64) -> Result<ReconcileSummary, ReconcileError>
where
    S: AttendanceStore + ?Sized,
{
    let window = Duration::seconds(window_secs.max(0));
    let hr = store
        .punches_by_source(SOURCE_HR)
        .await
        .map_err(ReconcileError::Load)?;
    let device = store
        .punches_by_source(SOURCE_DEVICE)
        .await
        .map_err(ReconcileError::Load)?;

    let mut summary = ReconcileSummary {
        device_rows: device.len(),
        hr_rows: hr.len(),
        removed: 0,
    };

    for conflict in find_conflicts(&device, &hr, window) {
        let deleted = store
            .delete_punch(conflict.id)
            .await
            .map_err(|error| ReconcileError::Delete {
                id: conflict.id,
                error,
            })?;
        if deleted {
            summary.removed += 1;
            tracing::info!(
                event = "reconcile_device_row_removed",
                id = conflict.id,
                user_id = %conflict.user_id,
                name = conflict.name.as_deref().unwrap_or(""),
                timestamp = %conflict.timestamp,
                punch = %conflict.punch,
                "device punch conflicts with an HR punch"
            );
        }
    }

    tracing::info!(
        event = "reconcile_completed",
        device_rows = summary.device_rows,
        hr_rows = summary.hr_rows,
        removed = summary.removed
    );
    Ok(summary)
}
