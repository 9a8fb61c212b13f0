//! Refresh-token exchange shared by the Drive and HR API clients.
//!
//! Only the `refresh_token` grant is implemented; obtaining the refresh token in the first place
//! happens outside this program.

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OAuthError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error("token endpoint returned HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("token endpoint did not return an access token (error: {0})")]
    MissingAccessToken(String),
}

/// Client credentials plus a long-lived refresh token.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for RefreshCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

/// Exchanges the refresh token for a short-lived access token.
///
/// Some providers answer `200 OK` with an `error` field instead of a token, so the body is
/// checked even on success.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    token_url: &str,
    credentials: &RefreshCredentials,
) -> Result<String, OAuthError> {
    let response = client
        .post(token_url)
        .form(&[
            ("refresh_token", credentials.refresh_token.as_str()),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OAuthError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        });
    }

    extract_access_token(response.json::<TokenResponse>().await?)
}

fn extract_access_token(token: TokenResponse) -> Result<String, OAuthError> {
    match token.access_token {
        Some(access_token) if !access_token.is_empty() => {
            tracing::info!(event = "access_token_refreshed", "access token retrieved");
            Ok(access_token)
        }
        _ => Err(OAuthError::MissingAccessToken(
            token.error.unwrap_or_else(|| "none".to_string()),
        )),
    }
}
