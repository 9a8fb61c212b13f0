//! Client for the HR (Zoho People) attendance API.

mod client;
mod parse;
mod types;

use thiserror::Error;

use crate::oauth::OAuthError;

pub use client::{HrRateLimiter, ZohoClient, ZohoEndpoints};
pub use parse::{
    next_cursor, parse_attendance_response, parse_employee_ids, FEED_DATETIME_FORMAT,
    FEED_DATE_FORMAT,
};
pub use types::{AttendanceEvent, PunchType};

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("HR API authentication failed: {0}")]
    Auth(#[from] OAuthError),

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error("HR API returned HTTP {status} while {operation}: {body}")]
    UnexpectedStatus {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("HR API rejected the request (status {status:?}): {message}")]
    Rejected {
        status: Option<i64>,
        message: String,
    },

    #[error("HR API response could not be parsed: {0}")]
    Malformed(String),
}
