//! Local attendance tables: the dedup checks, inserts and updates the HR steps run.

mod memory;
mod store;

use chrono::NaiveDateTime;
use diesel_async::pooled_connection::deadpool::PoolError;
use thiserror::Error;

use crate::hr_feed::{AttendanceEvent, PunchType};

pub use memory::{InMemoryAttendanceStore, InMemoryLog};
pub use store::{AttendanceStore, MysqlAttendanceStore};

#[derive(Error, Debug)]
pub enum AttendanceDbError {
    #[error("failed to acquire DB connection: {0}")]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Query(#[from] diesel::result::Error),

    #[error("attendance store unavailable: {0}")]
    Unavailable(String),
}

/// Joint uniqueness key checked against both attendance tables before an HR insert.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub user_id: String,
    pub timestamp: NaiveDateTime,
    pub punch: PunchType,
}

impl From<&AttendanceEvent> for DedupKey {
    fn from(event: &AttendanceEvent) -> Self {
        Self {
            user_id: event.employee_id.clone(),
            timestamp: event.timestamp,
            punch: event.punch,
        }
    }
}

/// Table in which a duplicate was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupTable {
    AttendanceLogs,
    RawHrLogs,
}

impl DedupTable {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AttendanceLogs => "attendance_logs",
            Self::RawHrLogs => "raw_zoho_logs",
        }
    }
}

/// One `attendance_logs` row as the reconcile and push steps see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunchRecord {
    pub id: i64,
    pub user_id: String,
    pub name: Option<String>,
    pub timestamp: NaiveDateTime,
    pub punch: PunchType,
}
