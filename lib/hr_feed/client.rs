use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use tokio::sync::Mutex;

use super::parse::{parse_attendance_response, parse_employee_ids, FEED_DATE_FORMAT};
use super::types::{AttendanceEvent, PunchType};
use super::FeedError;
use crate::config::HrApiConfig;
use crate::oauth::{refresh_access_token, RefreshCredentials};

/// Process-local request budget shared by every HR API call in a run.
pub type HrRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

const ATTENDANCE_PAGE_DURATION: &str = "200";
const FEED_DATETIME_PATTERN: &str = "dd-MM-yyyy HH:mm:ss";
const PUSH_DATETIME_PATTERN: &str = "dd/MM/yyyy HH:mm:ss";
const PUSH_DATETIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZohoEndpoints {
    /// `https://people.<domain>`
    pub people_base: String,
    pub token_url: String,
}

impl ZohoEndpoints {
    pub fn for_domain(domain: &str) -> Self {
        Self {
            people_base: format!("https://people.{domain}"),
            token_url: format!("https://accounts.{domain}/oauth/v2/token"),
        }
    }
}

pub struct ZohoClient {
    client: reqwest::Client,
    endpoints: ZohoEndpoints,
    credentials: RefreshCredentials,
    rate_limiter: HrRateLimiter,
    access_token: Mutex<Option<String>>,
}

impl ZohoClient {
    pub fn new(client: reqwest::Client, config: &HrApiConfig) -> Self {
        Self::with_endpoints(client, config, ZohoEndpoints::for_domain(&config.domain))
    }

    pub fn with_endpoints(
        client: reqwest::Client,
        config: &HrApiConfig,
        endpoints: ZohoEndpoints,
    ) -> Self {
        let per_second =
            NonZeroU32::new(config.requests_per_second).unwrap_or(nonzero!(5u32));
        Self {
            client,
            endpoints,
            credentials: RefreshCredentials {
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                refresh_token: config.refresh_token.clone(),
            },
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            access_token: Mutex::new(None),
        }
    }

    /// Cached access token; the first call performs the refresh-token exchange.
    async fn token(&self) -> Result<String, FeedError> {
        let mut cached = self.access_token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        self.rate_limiter.until_ready().await;
        let token =
            refresh_access_token(&self.client, &self.endpoints.token_url, &self.credentials)
                .await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    fn authorization(token: &str) -> String {
        format!("Zoho-oauthtoken {token}")
    }

    async fn checked_text(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<String, FeedError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(FeedError::UnexpectedStatus {
                operation,
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// One page of the latest attendance entries starting at `from`.
    pub async fn fetch_attendance(&self, from: NaiveDate) -> Result<Vec<AttendanceEvent>, FeedError> {
        let token = self.token().await?;
        let from_date = from.format(FEED_DATE_FORMAT).to_string();
        tracing::info!(event = "hr_feed_page_requested", from_date = %from_date);

        self.rate_limiter.until_ready().await;
        let response = self
            .client
            .get(format!(
                "{}/people/api/attendance/fetchLatestAttEntries",
                self.endpoints.people_base
            ))
            .header(reqwest::header::AUTHORIZATION, Self::authorization(&token))
            .query(&[
                ("duration", ATTENDANCE_PAGE_DURATION),
                ("fromDate", from_date.as_str()),
                ("dateTimeFormat", FEED_DATETIME_PATTERN),
            ])
            .send()
            .await?;

        let body = Self::checked_text(response, "fetching attendance").await?;
        parse_attendance_response(&body)
    }

    /// Employee ids known to the HR system.
    pub async fn fetch_employee_ids(&self) -> Result<HashSet<String>, FeedError> {
        let token = self.token().await?;
        self.rate_limiter.until_ready().await;
        let response = self
            .client
            .post(format!(
                "{}/people/api/forms/employee/getRecords",
                self.endpoints.people_base
            ))
            .header(reqwest::header::AUTHORIZATION, Self::authorization(&token))
            .json(&serde_json::json!({ "page": 1, "per_page": 200 }))
            .send()
            .await?;

        let body = Self::checked_text(response, "fetching employees").await?;
        let ids = parse_employee_ids(&body)?;
        tracing::info!(event = "hr_employees_fetched", count = ids.len());
        Ok(ids)
    }

    /// Records a check-in or check-out. Anything but HTTP 200 is a failure.
    pub async fn push_attendance(
        &self,
        employee_id: &str,
        at: NaiveDateTime,
        punch: PunchType,
    ) -> Result<(), FeedError> {
        let token = self.token().await?;
        let formatted = at.format(PUSH_DATETIME_FORMAT).to_string();
        let field = match punch {
            PunchType::CheckIn => "checkIn",
            PunchType::CheckOut => "checkOut",
        };

        self.rate_limiter.until_ready().await;
        let response = self
            .client
            .post(format!("{}/people/api/attendance", self.endpoints.people_base))
            .header(reqwest::header::AUTHORIZATION, Self::authorization(&token))
            .form(&[
                ("dateFormat", PUSH_DATETIME_PATTERN),
                ("empId", employee_id),
                (field, formatted.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::UnexpectedStatus {
                operation: "pushing attendance",
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
