use std::path::Path;

use futures::future::BoxFuture;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{DriveQuery, ObjectStore, RemoteObject, StoreError};
use crate::oauth::{refresh_access_token, RefreshCredentials};
use crate::retry::{run_with_retry, seed_from_key, RetryPolicy};

const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const MULTIPART_BOUNDARY: &str = "attendance_sync_part_boundary";
const SQL_MIME_TYPE: &str = "application/sql";

/// Base URLs of the Drive v3 metadata and upload APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveEndpoints {
    pub files_url: String,
    pub upload_url: String,
}

impl Default for DriveEndpoints {
    fn default() -> Self {
        Self {
            files_url: "https://www.googleapis.com/drive/v3/files".to_string(),
            upload_url: "https://www.googleapis.com/upload/drive/v3/files".to_string(),
        }
    }
}

/// Authorized-user credentials as written by the Google tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveCredentials {
    pub refresh: RefreshCredentials,
    pub token_url: String,
}

#[derive(Deserialize)]
struct AuthorizedUserFile {
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    token_uri: Option<String>,
}

impl DriveCredentials {
    pub fn from_file(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            StoreError::Credentials(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        let file: AuthorizedUserFile = serde_json::from_str(raw)
            .map_err(|err| StoreError::Credentials(format!("malformed credentials file: {err}")))?;

        let require = |value: Option<String>, field: &str| {
            value
                .filter(|value| !value.is_empty())
                .ok_or_else(|| StoreError::Credentials(format!("missing `{field}`")))
        };

        Ok(Self {
            refresh: RefreshCredentials {
                client_id: require(file.client_id, "client_id")?,
                client_secret: require(file.client_secret, "client_secret")?,
                refresh_token: require(file.refresh_token, "refresh_token")?,
            },
            token_url: file
                .token_uri
                .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    id: String,
    name: String,
}

/// Google Drive v3 backed object store.
///
/// The access token is fetched lazily and reused for the lifetime of the store, which matches a
/// single export run.
pub struct DriveStore {
    client: reqwest::Client,
    endpoints: DriveEndpoints,
    credentials: DriveCredentials,
    retry_policy: RetryPolicy,
    access_token: Mutex<Option<String>>,
}

impl DriveStore {
    pub fn new(client: reqwest::Client, credentials: DriveCredentials, retry_policy: RetryPolicy) -> Self {
        Self::with_endpoints(client, credentials, retry_policy, DriveEndpoints::default())
    }

    pub fn with_endpoints(
        client: reqwest::Client,
        credentials: DriveCredentials,
        retry_policy: RetryPolicy,
        endpoints: DriveEndpoints,
    ) -> Self {
        Self {
            client,
            endpoints,
            credentials,
            retry_policy,
            access_token: Mutex::new(None),
        }
    }

    async fn token(&self) -> Result<String, StoreError> {
        let mut cached = self.access_token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token = refresh_access_token(
            &self.client,
            &self.credentials.token_url,
            &self.credentials.refresh,
        )
        .await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn with_retry<T, F, Fut>(&self, key: &str, op: F) -> Result<T, StoreError>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        match run_with_retry(&self.retry_policy, seed_from_key(key), op, StoreError::is_retryable).await {
            Ok((value, _attempts)) => Ok(value),
            Err(terminal) => {
                tracing::warn!(
                    event = "remote_store_gave_up",
                    object = key,
                    attempts = terminal.attempts,
                    exhausted_retryable = terminal.exhausted_retryable,
                    error = %terminal.error,
                    "remote store operation failed"
                );
                Err(terminal.error)
            }
        }
    }

    async fn find_once(&self, name: &str, parent: Option<&str>) -> Result<Option<RemoteObject>, StoreError> {
        let token = self.token().await?;
        let mut query = DriveQuery::new().name_equals(name).not_trashed();
        if let Some(folder_id) = parent {
            query = query.in_folder(folder_id);
        }

        let response = self
            .client
            .get(&self.endpoints.files_url)
            .bearer_auth(token)
            .query(&[
                ("q", query.build().as_str()),
                ("fields", "files(id, name)"),
                ("spaces", "drive"),
                ("orderBy", "createdTime"),
            ])
            .send()
            .await?;
        let response = check_status(response, "listing objects").await?;
        let listing: FileList = response.json().await?;

        // The server-side name filter is not guaranteed to be case-sensitive. With duplicates,
        // the oldest object wins.
        Ok(listing
            .files
            .into_iter()
            .find(|file| file.name == name)
            .map(|file| RemoteObject {
                id: file.id,
                name: file.name,
            }))
    }

    async fn create_once(
        &self,
        name: &str,
        content: &str,
        parent: Option<&str>,
    ) -> Result<RemoteObject, StoreError> {
        let token = self.token().await?;
        let mut metadata = serde_json::json!({ "name": name, "mimeType": SQL_MIME_TYPE });
        if let Some(folder_id) = parent {
            metadata["parents"] = serde_json::json!([folder_id]);
        }

        let (boundary, body) = multipart_related_body(&metadata, content);
        let content_type = format!("multipart/related; boundary={boundary}");
        let response = self
            .client
            .post(&self.endpoints.upload_url)
            .bearer_auth(token)
            .query(&[("uploadType", "multipart"), ("fields", "id, name")])
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        let response = check_status(response, "creating object").await?;
        let created: FileEntry = response.json().await?;
        Ok(RemoteObject {
            id: created.id,
            name: created.name,
        })
    }

    async fn read_once(&self, object: &RemoteObject) -> Result<String, StoreError> {
        let token = self.token().await?;
        let response = self
            .client
            .get(format!("{}/{}", self.endpoints.files_url, object.id))
            .bearer_auth(token)
            .query(&[("alt", "media")])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(object.name.clone()));
        }
        let response = check_status(response, "downloading object").await?;
        Ok(response.text().await?)
    }

    async fn update_once(&self, object: &RemoteObject, content: &str) -> Result<(), StoreError> {
        let token = self.token().await?;
        let response = self
            .client
            .patch(format!("{}/{}", self.endpoints.upload_url, object.id))
            .bearer_auth(token)
            .query(&[("uploadType", "media")])
            .header(CONTENT_TYPE, SQL_MIME_TYPE)
            .body(content.to_string())
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(object.name.clone()));
        }
        check_status(response, "uploading object").await?;
        Ok(())
    }
}

impl ObjectStore for DriveStore {
    fn find<'a>(
        &'a self,
        name: &'a str,
        parent: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<RemoteObject>, StoreError>> {
        Box::pin(async move { self.with_retry(name, |_| self.find_once(name, parent)).await })
    }

    fn create<'a>(
        &'a self,
        name: &'a str,
        content: &'a str,
        parent: Option<&'a str>,
    ) -> BoxFuture<'a, Result<RemoteObject, StoreError>> {
        Box::pin(async move {
            // A create that timed out may still have landed; look before posting again.
            let object = self
                .with_retry(name, move |attempt| async move {
                    if attempt > 1 {
                        if let Some(existing) = self.find_once(name, parent).await? {
                            tracing::warn!(
                                event = "remote_object_create_recovered",
                                object = %existing.name,
                                id = %existing.id,
                                attempt,
                                "earlier create attempt already stored the object"
                            );
                            return Ok(existing);
                        }
                    }
                    self.create_once(name, content, parent).await
                })
                .await?;
            tracing::info!(event = "remote_object_created", object = %object.name, id = %object.id);
            Ok(object)
        })
    }

    fn read<'a>(&'a self, object: &'a RemoteObject) -> BoxFuture<'a, Result<String, StoreError>> {
        Box::pin(async move { self.with_retry(&object.name, |_| self.read_once(object)).await })
    }

    fn update<'a>(
        &'a self,
        object: &'a RemoteObject,
        content: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.with_retry(&object.name, |_| self.update_once(object, content))
                .await?;
            tracing::info!(event = "remote_object_updated", object = %object.name, id = %object.id);
            Ok(())
        })
    }
}

async fn check_status(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::UnexpectedStatus {
        operation,
        status: status.as_u16(),
        body,
    })
}

/// Metadata part followed by the media part, as expected by `uploadType=multipart`.
///
/// Returns the boundary used, which never occurs inside `content`.
fn multipart_related_body(metadata: &serde_json::Value, content: &str) -> (String, String) {
    let boundary = boundary_absent_from(content);
    let body = format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
         --{b}\r\nContent-Type: {SQL_MIME_TYPE}\r\n\r\n{content}\r\n--{b}--\r\n",
        b = boundary,
    );
    (boundary, body)
}

fn boundary_absent_from(content: &str) -> String {
    let mut boundary = MULTIPART_BOUNDARY.to_string();
    let mut suffix = 0u32;
    while content.contains(boundary.as_str()) {
        suffix += 1;
        boundary = format!("{MULTIPART_BOUNDARY}_{suffix}");
    }
    boundary
}
