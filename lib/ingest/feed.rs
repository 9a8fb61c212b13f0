use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::BoxFuture;

use crate::hr_feed::{AttendanceEvent, FeedError, ZohoClient};

/// Paged attendance source, one page per `from` date.
pub trait AttendanceFeed: Send + Sync {
    fn fetch_page<'a>(
        &'a self,
        from: NaiveDate,
    ) -> BoxFuture<'a, Result<Vec<AttendanceEvent>, FeedError>>;
}

impl<T> AttendanceFeed for Arc<T>
where
    T: AttendanceFeed + ?Sized,
{
    fn fetch_page<'a>(
        &'a self,
        from: NaiveDate,
    ) -> BoxFuture<'a, Result<Vec<AttendanceEvent>, FeedError>> {
        (**self).fetch_page(from)
    }
}

impl AttendanceFeed for ZohoClient {
    fn fetch_page<'a>(
        &'a self,
        from: NaiveDate,
    ) -> BoxFuture<'a, Result<Vec<AttendanceEvent>, FeedError>> {
        Box::pin(self.fetch_attendance(from))
    }
}
