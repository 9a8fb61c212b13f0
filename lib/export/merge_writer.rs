use super::types::{Payload, RECORD_SEPARATOR, TERMINATOR};
use crate::remote_store::{ObjectStore, RemoteObject, StoreError};

/// Result of merging new tuples into existing object content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedContent {
    pub content: String,
    /// Prior content did not end on a complete tuple; a newline was inserted instead of a
    /// record separator.
    pub repaired: bool,
}

/// Appends `payload`'s tuples to an existing cumulative statement.
///
/// Trailing whitespace and one trailing terminator are stripped first. Content that is empty
/// after stripping is replaced by the full payload statement.
pub fn merge_statement(existing: &str, payload: &Payload) -> MergedContent {
    let trimmed = existing.trim_end();
    let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();

    if trimmed.is_empty() {
        return MergedContent {
            content: payload.render(),
            repaired: false,
        };
    }

    let (separator, repaired) = if trimmed.ends_with(')') {
        (RECORD_SEPARATOR, false)
    } else {
        ("\n", true)
    };

    let body = payload.body();
    let mut content =
        String::with_capacity(trimmed.len() + separator.len() + body.len() + TERMINATOR.len());
    content.push_str(trimmed);
    content.push_str(separator);
    content.push_str(&body);
    content.push_str(TERMINATOR);

    MergedContent { content, repaired }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub object: RemoteObject,
    pub created: bool,
    pub repaired: bool,
    pub tuples_written: usize,
}

/// Keeps one cumulative statement per target object in the remote store.
pub struct MergeWriter<S> {
    store: S,
    folder_id: Option<String>,
}

impl<S> MergeWriter<S>
where
    S: ObjectStore,
{
    pub fn new(store: S, folder_id: Option<String>) -> Self {
        Self { store, folder_id }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates `object_name` or appends to it. The remote content is replaced in one update.
    ///
    /// Replaying the same payload appends its tuples again; the caller owns exactly-once.
    pub async fn commit(
        &self,
        object_name: &str,
        payload: &Payload,
    ) -> Result<CommitOutcome, StoreError> {
        let folder = self.folder_id.as_deref();

        match self.store.find(object_name, folder).await? {
            None => {
                let object = self
                    .store
                    .create(object_name, &payload.render(), folder)
                    .await?;
                Ok(CommitOutcome {
                    object,
                    created: true,
                    repaired: false,
                    tuples_written: payload.tuples.len(),
                })
            }
            Some(object) => {
                let existing = self.store.read(&object).await?;
                let merged = merge_statement(&existing, payload);
                if merged.repaired {
                    tracing::warn!(
                        event = "remote_object_repaired",
                        object = %object.name,
                        "existing content did not end with a complete tuple; appended on a new line"
                    );
                }
                self.store.update(&object, &merged.content).await?;
                Ok(CommitOutcome {
                    object,
                    created: false,
                    repaired: merged.repaired,
                    tuples_written: payload.tuples.len(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{merge_statement, MergeWriter};
    use crate::export::types::Payload;
    use crate::remote_store::InMemoryObjectStore;

    const HEADER: &str = "INSERT INTO `attendance_logs` (id) VALUES\n";

    fn payload(tuples: &[&str]) -> Payload {
        Payload {
            header: HEADER.to_string(),
            tuples: tuples.iter().map(|tuple| tuple.to_string()).collect(),
        }
    }

    #[test]
    fn appends_after_terminated_statement() {
        let existing = format!("{HEADER}(1),\n(2);\n");
        let merged = merge_statement(&existing, &payload(&["(3)", "(4)"]));

        assert_eq!(merged.content, format!("{HEADER}(1),\n(2),\n(3),\n(4);\n"));
        assert!(!merged.repaired);
    }

    #[test]
    fn appends_after_unterminated_statement() {
        let existing = format!("{HEADER}(1),\n(2)");
        let merged = merge_statement(&existing, &payload(&["(3)"]));

        assert_eq!(merged.content, format!("{HEADER}(1),\n(2),\n(3);\n"));
        assert_eq!(merged.content.matches(';').count(), 1);
        assert!(!merged.repaired);
    }

    #[test]
    fn partial_trailing_line_gets_a_newline() {
        let existing = format!("{HEADER}(1),");
        let merged = merge_statement(&existing, &payload(&["(2)"]));

        assert_eq!(merged.content, format!("{HEADER}(1),\n(2);\n"));
        assert!(merged.repaired);
    }

    #[test]
    fn header_only_object_gets_a_newline() {
        let merged = merge_statement(HEADER.trim_end(), &payload(&["(1)"]));
        assert_eq!(merged.content, format!("{HEADER}(1);\n"));
        assert!(merged.repaired);
    }

    #[test]
    fn blank_object_is_rewritten_whole() {
        let merged = merge_statement(" \n;\n", &payload(&["(1)"]));
        assert_eq!(merged.content, format!("{HEADER}(1);\n"));
        assert!(!merged.repaired);
    }

    #[tokio::test]
    async fn commit_creates_then_appends() {
        let writer = MergeWriter::new(InMemoryObjectStore::new(), Some("folder".to_string()));

        let first = writer
            .commit("attendance_logs_backup.sql", &payload(&["(1)", "(2)"]))
            .await
            .unwrap();
        assert!(first.created);

        let second = writer
            .commit("attendance_logs_backup.sql", &payload(&["(3)"]))
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.object, first.object);

        assert_eq!(
            writer.store().content_of("attendance_logs_backup.sql").unwrap(),
            format!("{HEADER}(1),\n(2),\n(3);\n")
        );
        assert_eq!(writer.store().object_count(), 1);
    }

    #[tokio::test]
    async fn failed_update_leaves_prior_content() {
        let store = InMemoryObjectStore::new();
        store.insert("a_backup.sql", &format!("{HEADER}(1);\n"), None);
        store.fail_writes(true);
        let writer = MergeWriter::new(store, None);

        let err = writer.commit("a_backup.sql", &payload(&["(2)"])).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(
            writer.store().content_of("a_backup.sql").unwrap(),
            format!("{HEADER}(1);\n")
        );
    }
}
