use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use super::types::{Watermark, WatermarkParseError};

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("failed to read checkpoint file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint file {path} is not a JSON object of source -> timestamp: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint for `{source_name}` is invalid: {error}")]
    InvalidWatermark {
        source_name: String,
        error: WatermarkParseError,
    },

    #[error("failed to write checkpoint file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
}

/// Per-source watermarks for one run.
///
/// Entries for sources that are no longer configured are carried through untouched so a later
/// reconfiguration does not restart them from epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoints {
    entries: BTreeMap<String, Watermark>,
}

impl Checkpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored watermark, or epoch for a source never exported.
    pub fn get(&self, source: &str) -> Watermark {
        self.entries.get(source).copied().unwrap_or_default()
    }

    /// Moves the watermark forward; an older value is ignored.
    pub fn advance(&mut self, source: &str, watermark: Watermark) {
        let entry = self
            .entries
            .entry(source.to_string())
            .or_insert_with(Watermark::epoch);
        if watermark > *entry {
            *entry = watermark;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Watermark)> {
        self.entries
            .iter()
            .map(|(source, watermark)| (source.as_str(), *watermark))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn from_raw(raw: BTreeMap<String, String>) -> Result<Self, CheckpointError> {
        let mut entries = BTreeMap::new();
        for (source_name, value) in raw {
            let watermark = Watermark::parse(&value).map_err(|error| {
                CheckpointError::InvalidWatermark {
                    source_name: source_name.clone(),
                    error,
                }
            })?;
            entries.insert(source_name, watermark);
        }
        Ok(Self { entries })
    }

    fn to_raw(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(source, watermark)| (source.clone(), watermark.to_string()))
            .collect()
    }
}

impl<const N: usize> From<[(&str, Watermark); N]> for Checkpoints {
    fn from(pairs: [(&str, Watermark); N]) -> Self {
        Self {
            entries: pairs
                .into_iter()
                .map(|(source, watermark)| (source.to_string(), watermark))
                .collect(),
        }
    }
}

/// Durable home of the checkpoint map: read fully at start, replaced fully at end.
pub trait CheckpointStore: Send + Sync {
    fn load(&self) -> Result<Checkpoints, CheckpointError>;
    fn save(&self, checkpoints: &Checkpoints) -> Result<(), CheckpointError>;
}

/// JSON object file, `{"source": "YYYY-MM-DD HH:MM:SS"}`.
#[derive(Debug, Clone)]
pub struct JsonFileCheckpointStore {
    path: PathBuf,
}

impl JsonFileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointStore for JsonFileCheckpointStore {
    fn load(&self) -> Result<Checkpoints, CheckpointError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::info!(
                    event = "checkpoint_file_missing",
                    path = %self.path.display(),
                    "no checkpoint file yet; every source starts at epoch"
                );
                return Ok(Checkpoints::new());
            }
            Err(source) => {
                return Err(CheckpointError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if raw.trim().is_empty() {
            return Ok(Checkpoints::new());
        }

        let parsed: BTreeMap<String, String> =
            serde_json::from_str(&raw).map_err(|source| CheckpointError::Malformed {
                path: self.path.clone(),
                source,
            })?;
        Checkpoints::from_raw(parsed)
    }

    /// Writes a sibling temp file and renames it over the checkpoint file.
    fn save(&self, checkpoints: &Checkpoints) -> Result<(), CheckpointError> {
        let write_err = |source: std::io::Error| CheckpointError::Write {
            path: self.path.clone(),
            source,
        };

        let mut rendered = serde_json::to_string_pretty(&checkpoints.to_raw())
            .map_err(|err| CheckpointError::Unavailable(err.to_string()))?;
        rendered.push('\n');

        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).map_err(write_err)?;
            file.write_all(rendered.as_bytes()).map_err(write_err)?;
            file.sync_all().map_err(write_err)?;
        }
        fs::rename(&temp_path, &self.path).map_err(write_err)?;
        Ok(())
    }
}

/// Process-local checkpoint store for tests.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    state: Mutex<InMemoryCheckpointState>,
}

#[derive(Debug, Default)]
struct InMemoryCheckpointState {
    saved: Checkpoints,
    saves: u32,
    fail_load: bool,
    fail_save: bool,
}

impl InMemoryCheckpointStore {
    pub fn new(initial: Checkpoints) -> Self {
        Self {
            state: Mutex::new(InMemoryCheckpointState {
                saved: initial,
                ..InMemoryCheckpointState::default()
            }),
        }
    }

    pub fn saved(&self) -> Checkpoints {
        self.lock().saved.clone()
    }

    pub fn save_count(&self) -> u32 {
        self.lock().saves
    }

    pub fn fail_load(&self, fail: bool) {
        self.lock().fail_load = fail;
    }

    pub fn fail_save(&self, fail: bool) {
        self.lock().fail_save = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryCheckpointState> {
        self.state.lock().expect("checkpoint store mutex poisoned")
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self) -> Result<Checkpoints, CheckpointError> {
        let state = self.lock();
        if state.fail_load {
            return Err(CheckpointError::Unavailable("injected load failure".to_string()));
        }
        Ok(state.saved.clone())
    }

    fn save(&self, checkpoints: &Checkpoints) -> Result<(), CheckpointError> {
        let mut state = self.lock();
        if state.fail_save {
            return Err(CheckpointError::Unavailable("injected save failure".to_string()));
        }
        state.saved = checkpoints.clone();
        state.saves += 1;
        Ok(())
    }
}

impl<T> CheckpointStore for std::sync::Arc<T>
where
    T: CheckpointStore + ?Sized,
{
    fn load(&self) -> Result<Checkpoints, CheckpointError> {
        (**self).load()
    }

    fn save(&self, checkpoints: &Checkpoints) -> Result<(), CheckpointError> {
        (**self).save(checkpoints)
    }
}
