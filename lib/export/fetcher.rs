use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use futures::future::BoxFuture;

use super::error::SourceUnavailable;
use super::types::{Row, RowSet, Value, Watermark};
use crate::db::models::{AttendanceLog, RawDeviceLog, RawZohoLog};
use crate::db::schema::{attendance_logs, raw_device_logs, raw_zoho_logs};
use crate::db::DbPool;

/// Reads rows strictly after a watermark, ascending on the source's ordering column.
///
/// An empty result is not an error.
pub trait RowFetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        source: &'a str,
        watermark: Watermark,
    ) -> BoxFuture<'a, Result<RowSet, SourceUnavailable>>;
}

impl<T> RowFetcher for Arc<T>
where
    T: RowFetcher + ?Sized,
{
    fn fetch<'a>(
        &'a self,
        source: &'a str,
        watermark: Watermark,
    ) -> BoxFuture<'a, Result<RowSet, SourceUnavailable>> {
        (**self).fetch(source, watermark)
    }
}

/// A table model that can be exported row by row.
trait ExportRecord {
    const COLUMNS: &'static [&'static str];

    fn into_row(self) -> Row;
}

impl ExportRecord for AttendanceLog {
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "user_id",
        "name",
        "timestamp",
        "punch_type",
        "synced",
        "source",
    ];

    fn into_row(self) -> Row {
        Row {
            ordering: Watermark::new(self.timestamp),
            values: vec![
                self.id.into(),
                self.user_id.into(),
                self.name.into(),
                self.timestamp.into(),
                self.punch_type.into(),
                self.synced.into(),
                self.source.into(),
            ],
        }
    }
}

impl ExportRecord for RawDeviceLog {
    const COLUMNS: &'static [&'static str] =
        &["id", "user_id", "name", "timestamp", "status", "device_ip"];

    fn into_row(self) -> Row {
        Row {
            ordering: Watermark::new(self.timestamp),
            values: vec![
                self.id.into(),
                self.user_id.into(),
                self.name.into(),
                self.timestamp.into(),
                self.status.into(),
                self.device_ip.into(),
            ],
        }
    }
}

impl ExportRecord for RawZohoLog {
    const COLUMNS: &'static [&'static str] =
        &["id", "user_id", "name", "timestamp", "punch_type", "source"];

    fn into_row(self) -> Row {
        Row {
            ordering: Watermark::new(self.timestamp),
            values: vec![
                self.id.into(),
                self.user_id.into(),
                self.name.into(),
                self.timestamp.into(),
                self.punch_type.into(),
                self.source.into(),
            ],
        }
    }
}

fn to_row_set<R: ExportRecord>(records: Vec<R>) -> RowSet {
    RowSet {
        columns: R::COLUMNS.iter().map(|column| column.to_string()).collect(),
        rows: records.into_iter().map(ExportRecord::into_row).collect(),
    }
}

/// Sources the MySQL fetcher knows how to read.
pub const MYSQL_SOURCES: [&str; 3] = ["attendance_logs", "raw_device_logs", "raw_zoho_logs"];

/// MySQL-backed fetcher; each source maps to a typed diesel query on its `timestamp` column.
pub struct MysqlRowFetcher {
    pool: DbPool,
}

impl MysqlRowFetcher {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl RowFetcher for MysqlRowFetcher {
    fn fetch<'a>(
        &'a self,
        source: &'a str,
        watermark: Watermark,
    ) -> BoxFuture<'a, Result<RowSet, SourceUnavailable>> {
        Box::pin(async move {
            let mut pooled = self.pool.get().await.map_err(|err| {
                SourceUnavailable::new(source, format!("failed to acquire DB connection: {err}"))
            })?;
            let conn = &mut *pooled;
            let after = watermark.as_datetime();

            let loaded = match source {
                "attendance_logs" => attendance_logs::table
                    .filter(attendance_logs::timestamp.gt(after))
                    .order((attendance_logs::timestamp.asc(), attendance_logs::id.asc()))
                    .select(AttendanceLog::as_select())
                    .load(conn)
                    .await
                    .map(to_row_set),
                "raw_device_logs" => raw_device_logs::table
                    .filter(raw_device_logs::timestamp.gt(after))
                    .order((raw_device_logs::timestamp.asc(), raw_device_logs::id.asc()))
                    .select(RawDeviceLog::as_select())
                    .load(conn)
                    .await
                    .map(to_row_set),
                "raw_zoho_logs" => raw_zoho_logs::table
                    .filter(raw_zoho_logs::timestamp.gt(after))
                    .order((raw_zoho_logs::timestamp.asc(), raw_zoho_logs::id.asc()))
                    .select(RawZohoLog::as_select())
                    .load(conn)
                    .await
                    .map(to_row_set),
                other => {
                    return Err(SourceUnavailable::new(
                        other,
                        "no query is defined for this source",
                    ))
                }
            };

            loaded.map_err(|err| SourceUnavailable::new(source, err.to_string()))
        })
    }
}

#[derive(Debug, Default)]
struct InMemoryTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

/// Table-backed fetcher for tests and local dry runs.
#[derive(Debug, Default)]
pub struct InMemoryRowFetcher {
    tables: Mutex<BTreeMap<String, InMemoryTable>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<(String, Watermark)>>,
}

impl InMemoryRowFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, source: &str, columns: &[&str]) -> Self {
        self.tables
            .lock()
            .expect("tables mutex poisoned")
            .insert(
                source.to_string(),
                InMemoryTable {
                    columns: columns.iter().map(|column| column.to_string()).collect(),
                    rows: Vec::new(),
                },
            );
        self
    }

    /// Appends a row to `source`, which must have been declared with [`Self::with_table`].
    pub fn push_row(
        &self,
        source: &str,
        ordering: Watermark,
        values: Vec<Value>,
    ) -> Result<(), SourceUnavailable> {
        let mut tables = self.tables.lock().expect("tables mutex poisoned");
        let table = tables
            .get_mut(source)
            .ok_or_else(|| SourceUnavailable::new(source, "table was never declared"))?;
        table.rows.push(Row { values, ordering });
        Ok(())
    }

    pub fn fail_source(&self, source: &str, fail: bool) {
        let mut failing = self.failing.lock().expect("failing mutex poisoned");
        if fail {
            failing.insert(source.to_string());
        } else {
            failing.remove(source);
        }
    }

    /// Every `(source, watermark)` the fetcher was asked for, in call order.
    pub fn calls(&self) -> Vec<(String, Watermark)> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }
}

impl RowFetcher for InMemoryRowFetcher {
    fn fetch<'a>(
        &'a self,
        source: &'a str,
        watermark: Watermark,
    ) -> BoxFuture<'a, Result<RowSet, SourceUnavailable>> {
        Box::pin(async move {
            self.calls
                .lock()
                .expect("calls mutex poisoned")
                .push((source.to_string(), watermark));

            if self
                .failing
                .lock()
                .expect("failing mutex poisoned")
                .contains(source)
            {
                return Err(SourceUnavailable::new(source, "injected failure"));
            }

            let tables = self.tables.lock().expect("tables mutex poisoned");
            let table = tables
                .get(source)
                .ok_or_else(|| SourceUnavailable::new(source, "unknown table"))?;

            let mut rows: Vec<Row> = table
                .rows
                .iter()
                .filter(|row| row.ordering > watermark)
                .cloned()
                .collect();
            rows.sort_by_key(|row| row.ordering);

            Ok(RowSet {
                columns: table.columns.clone(),
                rows,
            })
        })
    }
}
