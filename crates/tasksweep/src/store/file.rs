use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{SessionBackend, StoreError};
use crate::types::{SessionKey, SessionRecord};

pub const DEFAULT_COOKIE_FILE: &str = "sessionCookies.json";

/// Local session tier: a JSON file holding one record per (service, account).
#[derive(Debug, Clone)]
pub struct FileSessionBackend {
    path: PathBuf,
}

impl FileSessionBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<SessionRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }
}

impl SessionBackend for FileSessionBackend {
    fn name(&self) -> &str {
        "local file"
    }

    fn load(&self, key: &SessionKey) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self
            .read_all()?
            .into_iter()
            .find(|r| r.service == key.service && r.account == key.account))
    }

    fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let mut records = self.read_all().unwrap_or_else(|e| {
            log::warn!(
                "Replacing unreadable session file {}: {}",
                self.path.display(),
                e
            );
            Vec::new()
        });
        records.retain(|r| !(r.service == record.service && r.account == record.account));
        records.push(record.clone());

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        // Write beside the target and rename over it; readers never see a partial file.
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &records)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}
