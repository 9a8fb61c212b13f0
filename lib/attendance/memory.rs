use std::collections::HashSet;
use std::sync::Mutex;

use chrono::NaiveDateTime;
use futures::future::BoxFuture;

use super::{AttendanceDbError, AttendanceStore, DedupKey, DedupTable, PunchRecord};
use crate::db::models::SOURCE_HR;
use crate::hr_feed::{AttendanceEvent, PunchType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMemoryLog {
    pub id: i64,
    pub user_id: String,
    pub name: Option<String>,
    pub timestamp: NaiveDateTime,
    pub punch: PunchType,
    pub synced: bool,
    pub source: String,
}

impl InMemoryLog {
    fn key(&self) -> DedupKey {
        DedupKey {
            user_id: self.user_id.clone(),
            timestamp: self.timestamp,
            punch: self.punch,
        }
    }

    fn to_record(&self) -> PunchRecord {
        PunchRecord {
            id: self.id,
            user_id: self.user_id.clone(),
            name: self.name.clone(),
            timestamp: self.timestamp,
            punch: self.punch,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    logs: Vec<InMemoryLog>,
    raw_hr: Vec<DedupKey>,
    next_id: i64,
    failing_lookups: HashSet<DedupKey>,
    fail_inserts: bool,
    fail_reads: bool,
}

/// Process-local attendance tables for tests.
#[derive(Debug, Default)]
pub struct InMemoryAttendanceStore {
    state: Mutex<State>,
}

impl InMemoryAttendanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an `attendance_logs` row and returns its id.
    pub fn seed_log(
        &self,
        user_id: &str,
        timestamp: NaiveDateTime,
        punch: PunchType,
        synced: bool,
        source: &str,
    ) -> i64 {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.logs.push(InMemoryLog {
            id,
            user_id: user_id.to_string(),
            name: Some(user_id.to_string()),
            timestamp,
            punch,
            synced,
            source: source.to_string(),
        });
        id
    }

    /// Seeds a raw HR row only, leaving `attendance_logs` untouched.
    pub fn seed_raw_hr(&self, user_id: &str, timestamp: NaiveDateTime, punch: PunchType) {
        self.lock().raw_hr.push(DedupKey {
            user_id: user_id.to_string(),
            timestamp,
            punch,
        });
    }

    /// Makes the duplicate check for `key` fail.
    pub fn fail_lookup_for(&self, key: DedupKey) {
        self.lock().failing_lookups.insert(key);
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.lock().fail_inserts = fail;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    pub fn logs(&self) -> Vec<InMemoryLog> {
        self.lock().logs.clone()
    }

    pub fn raw_hr_count(&self) -> usize {
        self.lock().raw_hr.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("attendance store mutex poisoned")
    }

    fn unavailable(what: &str) -> AttendanceDbError {
        AttendanceDbError::Unavailable(format!("injected {what} failure"))
    }
}

impl AttendanceStore for InMemoryAttendanceStore {
    fn latest_hr_timestamp<'a>(
        &'a self,
    ) -> BoxFuture<'a, Result<Option<NaiveDateTime>, AttendanceDbError>> {
        Box::pin(async move {
            let state = self.lock();
            if state.fail_reads {
                return Err(Self::unavailable("read"));
            }
            Ok(state
                .logs
                .iter()
                .filter(|log| log.source == SOURCE_HR)
                .map(|log| log.timestamp)
                .max())
        })
    }

    fn find_duplicate<'a>(
        &'a self,
        key: &'a DedupKey,
    ) -> BoxFuture<'a, Result<Option<DedupTable>, AttendanceDbError>> {
        Box::pin(async move {
            let state = self.lock();
            if state.failing_lookups.contains(key) {
                return Err(Self::unavailable("lookup"));
            }
            if state.logs.iter().any(|log| log.key() == *key) {
                return Ok(Some(DedupTable::AttendanceLogs));
            }
            Ok(state
                .raw_hr
                .iter()
                .any(|raw| raw == key)
                .then_some(DedupTable::RawHrLogs))
        })
    }

    fn insert_hr_event<'a>(
        &'a self,
        event: &'a AttendanceEvent,
    ) -> BoxFuture<'a, Result<(), AttendanceDbError>> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.fail_inserts {
                return Err(Self::unavailable("insert"));
            }
            state.next_id += 1;
            let id = state.next_id;
            state.logs.push(InMemoryLog {
                id,
                user_id: event.employee_id.clone(),
                name: Some(event.employee_id.clone()),
                timestamp: event.timestamp,
                punch: event.punch,
                synced: true,
                source: SOURCE_HR.to_string(),
            });
            state.raw_hr.push(DedupKey::from(event));
            Ok(())
        })
    }

    fn punches_by_source<'a>(
        &'a self,
        source: &'a str,
    ) -> BoxFuture<'a, Result<Vec<PunchRecord>, AttendanceDbError>> {
        Box::pin(async move {
            let state = self.lock();
            if state.fail_reads {
                return Err(Self::unavailable("read"));
            }
            let mut records: Vec<PunchRecord> = state
                .logs
                .iter()
                .filter(|log| log.source == source)
                .map(InMemoryLog::to_record)
                .collect();
            records.sort_by_key(|record| (record.timestamp, record.id));
            Ok(records)
        })
    }

    fn delete_punch<'a>(&'a self, id: i64) -> BoxFuture<'a, Result<bool, AttendanceDbError>> {
        Box::pin(async move {
            let mut state = self.lock();
            let before = state.logs.len();
            state.logs.retain(|log| log.id != id);
            Ok(state.logs.len() < before)
        })
    }

    fn unsynced_punches<'a>(
        &'a self,
    ) -> BoxFuture<'a, Result<Vec<PunchRecord>, AttendanceDbError>> {
        Box::pin(async move {
            let state = self.lock();
            if state.fail_reads {
                return Err(Self::unavailable("read"));
            }
            let mut records: Vec<PunchRecord> = state
                .logs
                .iter()
                .filter(|log| !log.synced)
                .map(InMemoryLog::to_record)
                .collect();
            records.sort_by_key(|record| (record.timestamp, record.id));
            Ok(records)
        })
    }

    fn mark_synced<'a>(&'a self, id: i64) -> BoxFuture<'a, Result<(), AttendanceDbError>> {
        Box::pin(async move {
            let mut state = self.lock();
            if let Some(log) = state.logs.iter_mut().find(|log| log.id == id) {
                log.synced = true;
            }
            Ok(())
        })
    }
}
