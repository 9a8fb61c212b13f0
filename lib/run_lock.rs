use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunLockError {
    #[error("another run holds {path} (owner: {owner})")]
    Held { path: PathBuf, owner: String },

    #[error("failed to lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exclusive advisory lock on `path`, held for the duration of a run.
///
/// The kernel drops the lock when the descriptor closes, so a process that dies without
/// running `Drop` does not block later runs. The file itself stays behind and only records
/// the last owner.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: File,
}

impl RunLock {
    /// Takes the lock without waiting and records `owner` in the file.
    pub fn acquire(path: &Path, owner: &str) -> Result<Self, RunLockError> {
        let io_err = |source: std::io::Error| RunLockError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        if let Err(err) = file.try_lock_exclusive() {
            if err.raw_os_error() != fs2::lock_contended_error().raw_os_error() {
                return Err(io_err(err));
            }
            let mut owner = String::new();
            let _ = file.read_to_string(&mut owner);
            return Err(RunLockError::Held {
                path: path.to_path_buf(),
                owner: owner.trim().to_string(),
            });
        }

        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        file.write_all(owner.as_bytes()).map_err(io_err)?;
        file.sync_data().map_err(io_err)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(
                event = "run_lock_release_failed",
                path = %self.path.display(),
                error = %err
            );
        }
    }
}
