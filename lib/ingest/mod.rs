//! Pulls HR attendance punches and inserts the ones not already stored.

mod engine;
mod feed;

#[cfg(test)]
mod test_support;

pub use engine::{DedupIngestEngine, IngestError, IngestSummary};
pub use feed::AttendanceFeed;
