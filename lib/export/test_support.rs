use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::NaiveDate;
use futures::future::BoxFuture;

use super::error::SourceUnavailable;
use super::fetcher::RowFetcher;
use super::types::{Row, RowSet, Value, Watermark};
use crate::config::ExportConfig;

pub(super) fn wm(hour: u32) -> Watermark {
    Watermark::new(
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .expect("valid date")
            .and_hms_opt(hour, 0, 0)
            .expect("valid time"),
    )
}

pub(super) fn row(id: i64, hour: u32) -> Row {
    Row {
        values: vec![Value::Integer(id)],
        ordering: wm(hour),
    }
}

pub(super) fn test_export_config(sources: &[&str]) -> ExportConfig {
    ExportConfig {
        sources: sources.iter().map(|source| source.to_string()).collect(),
        checkpoint_path: "unused.json".into(),
        spool_dir: None,
        object_suffix: "_backup.sql".to_string(),
        remote_retry_attempts: 1,
    }
}

/// Returns pre-scripted row sets per source, verbatim and in order.
#[derive(Default)]
pub(super) struct ScriptedRowFetcher {
    plans: Mutex<HashMap<String, VecDeque<Result<RowSet, SourceUnavailable>>>>,
    calls: Mutex<u32>,
}

impl ScriptedRowFetcher {
    pub(super) fn with_plan(plan: Vec<(&str, Result<RowSet, SourceUnavailable>)>) -> Self {
        let mut plans: HashMap<String, VecDeque<_>> = HashMap::new();
        for (source, response) in plan {
            plans.entry(source.to_string()).or_default().push_back(response);
        }
        Self {
            plans: Mutex::new(plans),
            calls: Mutex::new(0),
        }
    }

    pub(super) fn calls(&self) -> u32 {
        *self.calls.lock().expect("calls mutex poisoned")
    }
}

impl RowFetcher for ScriptedRowFetcher {
    fn fetch<'a>(
        &'a self,
        source: &'a str,
        _watermark: Watermark,
    ) -> BoxFuture<'a, Result<RowSet, SourceUnavailable>> {
        Box::pin(async move {
            *self.calls.lock().expect("calls mutex poisoned") += 1;
            let mut plans = self.plans.lock().expect("plans mutex poisoned");
            plans
                .get_mut(source)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| {
                    Err(SourceUnavailable::new(source, "no scripted response"))
                })
        })
    }
}
