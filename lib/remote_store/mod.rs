//! Named-blob storage for the cumulative per-source archives.

mod drive;
mod memory;
mod query;

use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::oauth::OAuthError;

pub use drive::{DriveCredentials, DriveEndpoints, DriveStore};
pub use memory::InMemoryObjectStore;
pub use query::DriveQuery;

/// Handle to an existing remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub id: String,
    pub name: String,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} while {operation}: {body}")]
    UnexpectedStatus {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("remote store authentication failed: {0}")]
    Auth(#[from] OAuthError),

    #[error("invalid remote store credentials: {0}")]
    Credentials(String),

    #[error("remote object `{0}` does not exist")]
    NotFound(String),
}

impl StoreError {
    /// Rate limiting, server-side errors and transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.is_request()
                    || err
                        .status()
                        .is_some_and(|status| status.as_u16() == 429 || status.is_server_error())
            }
            Self::UnexpectedStatus { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::Auth(_) | Self::Credentials(_) | Self::NotFound(_) => false,
        }
    }
}

/// Remote object operations used by the merge writer.
///
/// `update` must replace the whole content in one request so readers never observe a partially
/// merged object.
pub trait ObjectStore: Send + Sync {
    /// Finds a non-trashed object whose name matches exactly (case-sensitive).
    fn find<'a>(
        &'a self,
        name: &'a str,
        parent: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<RemoteObject>, StoreError>>;

    fn create<'a>(
        &'a self,
        name: &'a str,
        content: &'a str,
        parent: Option<&'a str>,
    ) -> BoxFuture<'a, Result<RemoteObject, StoreError>>;

    fn read<'a>(&'a self, object: &'a RemoteObject) -> BoxFuture<'a, Result<String, StoreError>>;

    fn update<'a>(
        &'a self,
        object: &'a RemoteObject,
        content: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>>;
}

impl<T> ObjectStore for Arc<T>
where
    T: ObjectStore + ?Sized,
{
    fn find<'a>(
        &'a self,
        name: &'a str,
        parent: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<RemoteObject>, StoreError>> {
        (**self).find(name, parent)
    }

    fn create<'a>(
        &'a self,
        name: &'a str,
        content: &'a str,
        parent: Option<&'a str>,
    ) -> BoxFuture<'a, Result<RemoteObject, StoreError>> {
        (**self).create(name, content, parent)
    }

    fn read<'a>(&'a self, object: &'a RemoteObject) -> BoxFuture<'a, Result<String, StoreError>> {
        (**self).read(object)
    }

    fn update<'a>(
        &'a self,
        object: &'a RemoteObject,
        content: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        (**self).update(object, content)
    }
}
