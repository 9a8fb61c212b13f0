use std::sync::Arc;

use chrono::NaiveDateTime;
use diesel::dsl::{exists, max};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncMysqlConnection, RunQueryDsl};
use futures::future::BoxFuture;

use super::{AttendanceDbError, DedupKey, DedupTable, PunchRecord};
use crate::db::models::{AttendanceLog, NewAttendanceLog, NewRawZohoLog, SOURCE_HR};
use crate::db::schema::{attendance_logs, raw_zoho_logs};
use crate::db::DbPool;
use crate::hr_feed::{AttendanceEvent, PunchType};

/// Data access for the ingest, reconcile and push steps.
pub trait AttendanceStore: Send + Sync {
    /// Newest `attendance_logs.timestamp` among HR-sourced rows.
    fn latest_hr_timestamp<'a>(
        &'a self,
    ) -> BoxFuture<'a, Result<Option<NaiveDateTime>, AttendanceDbError>>;

    /// Checks `attendance_logs` first, then the raw HR table.
    fn find_duplicate<'a>(
        &'a self,
        key: &'a DedupKey,
    ) -> BoxFuture<'a, Result<Option<DedupTable>, AttendanceDbError>>;

    /// Inserts the event into both tables as one unit.
    fn insert_hr_event<'a>(
        &'a self,
        event: &'a AttendanceEvent,
    ) -> BoxFuture<'a, Result<(), AttendanceDbError>>;

    fn punches_by_source<'a>(
        &'a self,
        source: &'a str,
    ) -> BoxFuture<'a, Result<Vec<PunchRecord>, AttendanceDbError>>;

    /// Returns whether a row was deleted.
    fn delete_punch<'a>(&'a self, id: i64) -> BoxFuture<'a, Result<bool, AttendanceDbError>>;

    /// Rows not yet pushed to the HR system, oldest first.
    fn unsynced_punches<'a>(&'a self)
        -> BoxFuture<'a, Result<Vec<PunchRecord>, AttendanceDbError>>;

    fn mark_synced<'a>(&'a self, id: i64) -> BoxFuture<'a, Result<(), AttendanceDbError>>;
}

impl<T> AttendanceStore for Arc<T>
where
    T: AttendanceStore + ?Sized,
{
    fn latest_hr_timestamp<'a>(
        &'a self,
    ) -> BoxFuture<'a, Result<Option<NaiveDateTime>, AttendanceDbError>> {
        (**self).latest_hr_timestamp()
    }

    fn find_duplicate<'a>(
        &'a self,
        key: &'a DedupKey,
    ) -> BoxFuture<'a, Result<Option<DedupTable>, AttendanceDbError>> {
        (**self).find_duplicate(key)
    }

    fn insert_hr_event<'a>(
        &'a self,
        event: &'a AttendanceEvent,
    ) -> BoxFuture<'a, Result<(), AttendanceDbError>> {
        (**self).insert_hr_event(event)
    }

    fn punches_by_source<'a>(
        &'a self,
        source: &'a str,
    ) -> BoxFuture<'a, Result<Vec<PunchRecord>, AttendanceDbError>> {
        (**self).punches_by_source(source)
    }

    fn delete_punch<'a>(&'a self, id: i64) -> BoxFuture<'a, Result<bool, AttendanceDbError>> {
        (**self).delete_punch(id)
    }

    fn unsynced_punches<'a>(
        &'a self,
    ) -> BoxFuture<'a, Result<Vec<PunchRecord>, AttendanceDbError>> {
        (**self).unsynced_punches()
    }

    fn mark_synced<'a>(&'a self, id: i64) -> BoxFuture<'a, Result<(), AttendanceDbError>> {
        (**self).mark_synced(id)
    }
}

impl From<AttendanceLog> for PunchRecord {
    fn from(log: AttendanceLog) -> Self {
        Self {
            id: log.id,
            user_id: log.user_id,
            name: log.name,
            timestamp: log.timestamp,
            punch: PunchType::from_code(log.punch_type),
        }
    }
}

/// MySQL-backed attendance store.
pub struct MysqlAttendanceStore {
    pool: DbPool,
}

impl MysqlAttendanceStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl AttendanceStore for MysqlAttendanceStore {
    fn latest_hr_timestamp<'a>(
        &'a self,
    ) -> BoxFuture<'a, Result<Option<NaiveDateTime>, AttendanceDbError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await?;
            let latest = attendance_logs::table
                .filter(attendance_logs::source.eq(SOURCE_HR))
                .select(max(attendance_logs::timestamp))
                .first::<Option<NaiveDateTime>>(&mut *conn)
                .await?;
            Ok(latest)
        })
    }

    fn find_duplicate<'a>(
        &'a self,
        key: &'a DedupKey,
    ) -> BoxFuture<'a, Result<Option<DedupTable>, AttendanceDbError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await?;
            let punch_code = key.punch.code();

            let in_attendance: bool = diesel::select(exists(
                attendance_logs::table
                    .filter(attendance_logs::user_id.eq(&key.user_id))
                    .filter(attendance_logs::timestamp.eq(key.timestamp))
                    .filter(attendance_logs::punch_type.eq(punch_code)),
            ))
            .get_result(&mut *conn)
            .await?;
            if in_attendance {
                return Ok(Some(DedupTable::AttendanceLogs));
            }

            let in_raw: bool = diesel::select(exists(
                raw_zoho_logs::table
                    .filter(raw_zoho_logs::user_id.eq(&key.user_id))
                    .filter(raw_zoho_logs::timestamp.eq(key.timestamp))
                    .filter(raw_zoho_logs::punch_type.eq(punch_code)),
            ))
            .get_result(&mut *conn)
            .await?;
            Ok(in_raw.then_some(DedupTable::RawHrLogs))
        })
    }

    fn insert_hr_event<'a>(
        &'a self,
        event: &'a AttendanceEvent,
    ) -> BoxFuture<'a, Result<(), AttendanceDbError>> {
        Box::pin(async move {
            let mut pooled = self.pool.get().await?;
            let conn: &mut AsyncMysqlConnection = &mut pooled;
            let attendance_row = NewAttendanceLog {
                user_id: &event.employee_id,
                name: Some(&event.employee_id),
                timestamp: event.timestamp,
                punch_type: event.punch.code(),
                synced: true,
                source: SOURCE_HR,
            };
            let raw_row = NewRawZohoLog {
                user_id: &event.employee_id,
                name: Some(&event.employee_id),
                timestamp: event.timestamp,
                punch_type: event.punch.code(),
                source: SOURCE_HR,
            };

            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                async move {
                    diesel::insert_into(attendance_logs::table)
                        .values(&attendance_row)
                        .execute(conn)
                        .await?;
                    diesel::insert_into(raw_zoho_logs::table)
                        .values(&raw_row)
                        .execute(conn)
                        .await?;
                    Ok(())
                }
                .scope_boxed()
            })
            .await?;
            Ok(())
        })
    }

    fn punches_by_source<'a>(
        &'a self,
        source: &'a str,
    ) -> BoxFuture<'a, Result<Vec<PunchRecord>, AttendanceDbError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await?;
            let rows = attendance_logs::table
                .filter(attendance_logs::source.eq(source))
                .order((attendance_logs::timestamp.asc(), attendance_logs::id.asc()))
                .select(AttendanceLog::as_select())
                .load(&mut *conn)
                .await?;
            Ok(rows.into_iter().map(PunchRecord::from).collect())
        })
    }

    fn delete_punch<'a>(&'a self, id: i64) -> BoxFuture<'a, Result<bool, AttendanceDbError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await?;
            let deleted = diesel::delete(attendance_logs::table.find(id))
                .execute(&mut *conn)
                .await?;
            Ok(deleted > 0)
        })
    }

    fn unsynced_punches<'a>(
        &'a self,
    ) -> BoxFuture<'a, Result<Vec<PunchRecord>, AttendanceDbError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await?;
            let rows = attendance_logs::table
                .filter(attendance_logs::synced.eq(false))
                .order((attendance_logs::timestamp.asc(), attendance_logs::id.asc()))
                .select(AttendanceLog::as_select())
                .load(&mut *conn)
                .await?;
            Ok(rows.into_iter().map(PunchRecord::from).collect())
        })
    }

    fn mark_synced<'a>(&'a self, id: i64) -> BoxFuture<'a, Result<(), AttendanceDbError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await?;
            diesel::update(attendance_logs::table.find(id))
                .set(attendance_logs::synced.eq(true))
                .execute(&mut *conn)
                .await?;
            Ok(())
        })
    }
}
