pub mod file;
pub mod sqlite;

pub use file::FileSessionBackend;
pub use sqlite::SqliteStore;

use crate::types::{
    NaturalKey, ResolvedTask, RunId, RunRecord, RunReport, RunStats, SessionKey, SessionRecord,
    StoredTask,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// One tier of session storage.
pub trait SessionBackend: Send + Sync {
    fn name(&self) -> &str;
    fn load(&self, key: &SessionKey) -> Result<Option<SessionRecord>, StoreError>;
    fn save(&self, record: &SessionRecord) -> Result<(), StoreError>;
}

/// Prioritised session tiers: reads take the first tier holding a usable record,
/// writes go to every tier independently.
pub struct SessionStore {
    backends: Vec<Box<dyn SessionBackend>>,
}

impl SessionStore {
    pub fn new(backends: Vec<Box<dyn SessionBackend>>) -> Self {
        Self { backends }
    }

    /// `None` means no tier holds cookies for `key`: authenticate fresh.
    pub fn load(&self, key: &SessionKey) -> Option<SessionRecord> {
        for backend in &self.backends {
            match backend.load(key) {
                Ok(Some(record)) if record.is_usable() => {
                    log::info!(
                        "Session cookies for {} loaded from {} ({} cookies)",
                        key,
                        backend.name(),
                        record.cookies.len()
                    );
                    return Some(record);
                }
                Ok(_) => log::info!("No stored session for {} in {}", key, backend.name()),
                Err(e) => log::warn!(
                    "Could not load session for {} from {}: {}",
                    key,
                    backend.name(),
                    e
                ),
            }
        }
        None
    }

    /// Returns how many tiers accepted the write.
    pub fn save(&self, record: &SessionRecord) -> usize {
        let mut written = 0;
        for backend in &self.backends {
            match backend.save(record) {
                Ok(()) => {
                    written += 1;
                    log::info!("Session cookies saved to {}", backend.name());
                }
                Err(e) => log::warn!(
                    "Could not persist session cookies to {}: {}",
                    backend.name(),
                    e
                ),
            }
        }
        written
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Canonical task storage keyed by (project id, parent id).
pub trait TaskRepository: Send + Sync {
    fn upsert(&self, task: &ResolvedTask) -> Result<UpsertOutcome, StoreError>;
    fn find(&self, key: &NaturalKey) -> Result<Option<StoredTask>, StoreError>;
    fn list(&self, limit: usize) -> Result<Vec<StoredTask>, StoreError>;
}

/// Run bookkeeping.
pub trait RunLedger: Send + Sync {
    /// Creates the run in `running` state; opening an existing id is a no-op.
    fn open_run(&self, id: &RunId, initiated_by: &str) -> Result<(), StoreError>;
    fn append_log(&self, id: &RunId, level: log::Level, message: &str) -> Result<(), StoreError>;
    fn finish(&self, id: &RunId, report: &RunReport) -> Result<(), StoreError>;
    fn get_run(&self, id: &RunId) -> Result<Option<RunRecord>, StoreError>;
    fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, StoreError>;
    fn stats(&self) -> Result<RunStats, StoreError>;
}
