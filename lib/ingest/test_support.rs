use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{NaiveDate, NaiveDateTime};
use futures::future::BoxFuture;

use super::AttendanceFeed;
use crate::hr_feed::{AttendanceEvent, FeedError, PunchType};

pub(super) fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, day).expect("valid date")
}

pub(super) fn at(day: u32, hour: u32) -> NaiveDateTime {
    date(day).and_hms_opt(hour, 0, 0).expect("valid time")
}

pub(super) fn event(employee_id: &str, timestamp: NaiveDateTime, punch: PunchType) -> AttendanceEvent {
    AttendanceEvent {
        employee_id: employee_id.to_string(),
        timestamp,
        punch,
    }
}

/// Serves scripted pages in order and records each requested `from` date.
pub(super) struct ScriptedFeed {
    pages: Mutex<VecDeque<Result<Vec<AttendanceEvent>, FeedError>>>,
    requested: Mutex<Vec<NaiveDate>>,
}

impl ScriptedFeed {
    pub(super) fn with_pages(pages: Vec<Result<Vec<AttendanceEvent>, FeedError>>) -> Self {
        Self {
            pages: Mutex::new(pages.into_iter().collect()),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn requested(&self) -> Vec<NaiveDate> {
        self.requested.lock().expect("requested mutex poisoned").clone()
    }
}

impl AttendanceFeed for ScriptedFeed {
    fn fetch_page<'a>(
        &'a self,
        from: NaiveDate,
    ) -> BoxFuture<'a, Result<Vec<AttendanceEvent>, FeedError>> {
        Box::pin(async move {
            self.requested
                .lock()
                .expect("requested mutex poisoned")
                .push(from);
            self.pages
                .lock()
                .expect("pages mutex poisoned")
                .pop_front()
                .unwrap_or_else(|| Err(FeedError::Malformed("scripted pages exhausted".to_string())))
        })
    }
}
