use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use super::types::Payload;

/// Local copy of every exported increment, one self-contained statement per file.
#[derive(Debug, Clone)]
pub struct IncrementSpool {
    dir: PathBuf,
}

impl IncrementSpool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<source>_increment_<YYYYmmdd_HHMMSS>.sql`
    pub fn file_path(&self, source: &str, at: NaiveDateTime) -> PathBuf {
        self.dir.join(format!(
            "{source}_increment_{}.sql",
            at.format("%Y%m%d_%H%M%S")
        ))
    }

    pub fn write(&self, source: &str, payload: &Payload, at: NaiveDateTime) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.file_path(source, at);
        fs::write(&path, payload.render())?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::IncrementSpool;
    use crate::export::types::Payload;
    use chrono::NaiveDate;

    #[test]
    fn writes_named_increment_file() {
        let dir = tempfile::tempdir().unwrap();
        let spool = IncrementSpool::new(dir.path().join("backups"));
        let at = NaiveDate::from_ymd_opt(2024, 7, 2)
            .unwrap()
            .and_hms_opt(13, 5, 9)
            .unwrap();
        let payload = Payload {
            header: "INSERT INTO `raw_zoho_logs` (id) VALUES\n".to_string(),
            tuples: vec!["(1)".to_string()],
        };

        let path = spool.write("raw_zoho_logs", &payload, at).unwrap();

        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "raw_zoho_logs_increment_20240702_130509.sql"
        );
        assert_eq!(std::fs::read_to_string(path).unwrap(), payload.render());
    }
}
