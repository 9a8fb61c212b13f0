use std::collections::BTreeMap;
use std::sync::Mutex;

use futures::future::BoxFuture;

use super::{ObjectStore, RemoteObject, StoreError};

#[derive(Debug, Clone)]
struct StoredObject {
    name: String,
    parent: Option<String>,
    content: String,
    trashed: bool,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    next_id: u64,
    fail_writes: bool,
    fail_reads: bool,
    writes: u32,
}

/// Process-local object store with failure injection, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    state: Mutex<State>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object directly, bypassing the write counter.
    pub fn insert(&self, name: &str, content: &str, parent: Option<&str>) -> RemoteObject {
        let mut state = self.lock();
        Self::insert_locked(&mut state, name, content, parent)
    }

    /// Marks every object with `name` as trashed.
    pub fn trash(&self, name: &str) {
        let mut state = self.lock();
        for object in state.objects.values_mut().filter(|object| object.name == name) {
            object.trashed = true;
        }
    }

    /// Makes every subsequent `create`/`update` fail with a 503.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Makes every subsequent `read` fail with a 503.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Content of the live (non-trashed) object called `name`.
    pub fn content_of(&self, name: &str) -> Option<String> {
        self.lock()
            .objects
            .values()
            .find(|object| object.name == name && !object.trashed)
            .map(|object| object.content.clone())
    }

    pub fn object_count(&self) -> usize {
        self.lock()
            .objects
            .values()
            .filter(|object| !object.trashed)
            .count()
    }

    /// Number of successful `create`/`update` calls.
    pub fn write_count(&self) -> u32 {
        self.lock().writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("in-memory object store mutex poisoned")
    }

    fn insert_locked(
        state: &mut State,
        name: &str,
        content: &str,
        parent: Option<&str>,
    ) -> RemoteObject {
        state.next_id += 1;
        let id = format!("mem-{}", state.next_id);
        state.objects.insert(
            id.clone(),
            StoredObject {
                name: name.to_string(),
                parent: parent.map(str::to_string),
                content: content.to_string(),
                trashed: false,
            },
        );
        RemoteObject {
            id,
            name: name.to_string(),
        }
    }

    fn unavailable(operation: &'static str) -> StoreError {
        StoreError::UnexpectedStatus {
            operation,
            status: 503,
            body: "injected failure".to_string(),
        }
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn find<'a>(
        &'a self,
        name: &'a str,
        parent: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<RemoteObject>, StoreError>> {
        Box::pin(async move {
            let state = self.lock();
            Ok(state
                .objects
                .iter()
                .find(|(_, object)| {
                    object.name == name
                        && !object.trashed
                        && (parent.is_none() || object.parent.as_deref() == parent)
                })
                .map(|(id, object)| RemoteObject {
                    id: id.clone(),
                    name: object.name.clone(),
                }))
        })
    }

    fn create<'a>(
        &'a self,
        name: &'a str,
        content: &'a str,
        parent: Option<&'a str>,
    ) -> BoxFuture<'a, Result<RemoteObject, StoreError>> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.fail_writes {
                return Err(Self::unavailable("creating object"));
            }
            state.writes += 1;
            Ok(Self::insert_locked(&mut state, name, content, parent))
        })
    }

    fn read<'a>(&'a self, object: &'a RemoteObject) -> BoxFuture<'a, Result<String, StoreError>> {
        Box::pin(async move {
            let state = self.lock();
            if state.fail_reads {
                return Err(Self::unavailable("reading object"));
            }
            state
                .objects
                .get(&object.id)
                .map(|stored| stored.content.clone())
                .ok_or_else(|| StoreError::NotFound(object.name.clone()))
        })
    }

    fn update<'a>(
        &'a self,
        object: &'a RemoteObject,
        content: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.fail_writes {
                return Err(Self::unavailable("updating object"));
            }
            let stored = state
                .objects
                .get_mut(&object.id)
                .ok_or_else(|| StoreError::NotFound(object.name.clone()))?;
            stored.content = content.to_string();
            state.writes += 1;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryObjectStore;
    use crate::remote_store::ObjectStore;

    #[tokio::test]
    async fn find_is_exact_and_skips_trashed_objects() {
        let store = InMemoryObjectStore::new();
        store.insert("Attendance_logs_backup.sql", "x", None);
        store.insert("attendance_logs_backup.sql", "old", None);
        store.trash("attendance_logs_backup.sql");
        let live = store.insert("attendance_logs_backup.sql", "new", Some("folder"));

        let found = store
            .find("attendance_logs_backup.sql", Some("folder"))
            .await
            .unwrap();
        assert_eq!(found, Some(live));
        assert!(store
            .find("attendance_logs_backup.sql", Some("other"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn injected_write_failures_leave_content_untouched() {
        let store = InMemoryObjectStore::new();
        let object = store.insert("a.sql", "original", None);
        store.fail_writes(true);

        let err = store.update(&object, "changed").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.content_of("a.sql").as_deref(), Some("original"));
        assert_eq!(store.write_count(), 0);
    }
}
