use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{RunLedger, SessionBackend, StoreError, TaskRepository, UpsertOutcome};
use crate::types::{
    NaturalKey, ResolvedTask, RunId, RunLogLine, RunRecord, RunReport, RunStats, RunStatus,
    SessionKey, SessionRecord, StoredTask,
};

pub const DEFAULT_DB_FILE: &str = "tasksweep.sqlite";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    service TEXT NOT NULL,
    account TEXT NOT NULL DEFAULT '',
    cookies TEXT NOT NULL DEFAULT '[]',
    run_id TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (service, account)
);
CREATE TABLE IF NOT EXISTS tasks (
    project_id TEXT NOT NULL,
    parent_id TEXT NOT NULL,
    task_name TEXT NOT NULL,
    project_name TEXT NOT NULL,
    task_url TEXT NOT NULL,
    due_date INTEGER,
    category TEXT NOT NULL DEFAULT 'Uncategorized',
    time_tracked TEXT,
    time_tracked_decimal REAL NOT NULL DEFAULT 0,
    estimate_hours REAL NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'unassigned',
    assigned_to TEXT,
    priority TEXT NOT NULL DEFAULT 'medium',
    designer_notes TEXT NOT NULL DEFAULT '',
    notes TEXT NOT NULL DEFAULT '',
    run_id TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (project_id, parent_id)
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    run_date INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'running',
    total_tasks_found INTEGER NOT NULL DEFAULT 0,
    tasks_imported INTEGER NOT NULL DEFAULT 0,
    tasks_updated INTEGER NOT NULL DEFAULT 0,
    tasks_skipped INTEGER NOT NULL DEFAULT 0,
    duration_seconds INTEGER NOT NULL DEFAULT 0,
    error_message TEXT NOT NULL DEFAULT '',
    initiated_by TEXT NOT NULL DEFAULT 'automated'
);
CREATE INDEX IF NOT EXISTS idx_runs_run_date ON runs(run_date DESC);
CREATE TABLE IF NOT EXISTS run_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    timestamp INTEGER NOT NULL,
    level TEXT NOT NULL,
    message TEXT NOT NULL
);
";

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Durable storage: sessions, tasks and run bookkeeping in one SQLite file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             PRAGMA foreign_keys=ON;\
             PRAGMA busy_timeout=5000;",
        )?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::init(conn)
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_DB_FILE)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<R, StoreError>,
    {
        // a poisoned lock still guards a usable connection
        let mut guard = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    fn logs_for(conn: &Connection, id: &str) -> Result<Vec<RunLogLine>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT timestamp, level, message FROM run_logs WHERE run_id = ?1 ORDER BY id",
        )?;
        let lines = stmt
            .query_map(params![id], |row| {
                Ok(RunLogLine {
                    timestamp: from_millis(row.get(0)?),
                    level: row.get(1)?,
                    message: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }
}

const TASK_COLUMNS: &str = "project_id, parent_id, task_name, project_name, task_url, status, \
     category, priority, estimate_hours, time_tracked_decimal, run_id, created_at, updated_at";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<StoredTask> {
    Ok(StoredTask {
        project_id: row.get(0)?,
        parent_id: row.get(1)?,
        task_name: row.get(2)?,
        project_name: row.get(3)?,
        task_url: row.get(4)?,
        status: row.get(5)?,
        category: row.get(6)?,
        priority: row.get(7)?,
        estimate_hours: row.get(8)?,
        time_tracked_decimal: row.get(9)?,
        run_id: row.get::<_, Option<String>>(10)?.map(RunId::new),
        created_at: from_millis(row.get(11)?),
        updated_at: from_millis(row.get(12)?),
    })
}

const RUN_COLUMNS: &str = "id, run_date, status, total_tasks_found, tasks_imported, \
     tasks_updated, tasks_skipped, duration_seconds, error_message, initiated_by";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let status: String = row.get(2)?;
    Ok(RunRecord {
        id: RunId::new(row.get::<_, String>(0)?),
        run_date: from_millis(row.get(1)?),
        status: status.parse().unwrap_or(RunStatus::Failed),
        total_tasks_found: row.get::<_, i64>(3)? as u64,
        tasks_imported: row.get::<_, i64>(4)? as u64,
        tasks_updated: row.get::<_, i64>(5)? as u64,
        tasks_skipped: row.get::<_, i64>(6)? as u64,
        duration_seconds: row.get::<_, i64>(7)? as u64,
        error_message: row.get(8)?,
        initiated_by: row.get(9)?,
        logs: Vec::new(),
    })
}

impl SessionBackend for SqliteStore {
    fn name(&self) -> &str {
        "database"
    }

    fn load(&self, key: &SessionKey) -> Result<Option<SessionRecord>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT cookies, run_id, updated_at FROM sessions \
                     WHERE service = ?1 AND account = ?2",
                    params![key.service, key.account],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()?;

            let Some((cookies, run_id, updated_at)) = row else {
                return Ok(None);
            };
            Ok(Some(SessionRecord {
                service: key.service.clone(),
                account: key.account.clone(),
                cookies: serde_json::from_str(&cookies)?,
                updated_at: from_millis(updated_at),
                run_id: run_id.map(RunId::new),
            }))
        })
    }

    fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let cookies = serde_json::to_string(&record.cookies)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (service, account, cookies, run_id, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5) \
                 ON CONFLICT(service, account) DO UPDATE SET \
                   cookies = excluded.cookies, \
                   run_id = excluded.run_id, \
                   updated_at = excluded.updated_at",
                params![
                    record.service,
                    record.account,
                    cookies,
                    record.run_id.as_ref().map(RunId::as_str),
                    record.updated_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
    }
}

impl TaskRepository for SqliteStore {
    fn upsert(&self, task: &ResolvedTask) -> Result<UpsertOutcome, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let exists = tx
                .query_row(
                    "SELECT 1 FROM tasks WHERE project_id = ?1 AND parent_id = ?2",
                    params![task.key.project_id, task.key.parent_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();

            tx.execute(
                "INSERT INTO tasks (project_id, parent_id, task_name, project_name, task_url, \
                   run_id, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7) \
                 ON CONFLICT(project_id, parent_id) DO UPDATE SET \
                   task_name = excluded.task_name, \
                   project_name = excluded.project_name, \
                   task_url = excluded.task_url, \
                   run_id = COALESCE(excluded.run_id, tasks.run_id), \
                   updated_at = excluded.updated_at",
                params![
                    task.key.project_id,
                    task.key.parent_id,
                    task.task_name,
                    task.project_name,
                    task.task_url,
                    task.run_id.as_ref().map(RunId::as_str),
                    now_millis(),
                ],
            )?;
            tx.commit()?;

            Ok(if exists {
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Created
            })
        })
    }

    fn find(&self, key: &NaturalKey) -> Result<Option<StoredTask>, StoreError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {} FROM tasks WHERE project_id = ?1 AND parent_id = ?2",
                        TASK_COLUMNS
                    ),
                    params![key.project_id, key.parent_id],
                    task_from_row,
                )
                .optional()?)
        })
    }

    fn list(&self, limit: usize) -> Result<Vec<StoredTask>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM tasks ORDER BY updated_at DESC, project_id, parent_id LIMIT ?1",
                TASK_COLUMNS
            ))?;
            let tasks = stmt
                .query_map(params![limit as i64], task_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }
}

impl RunLedger for SqliteStore {
    fn open_run(&self, id: &RunId, initiated_by: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO runs (id, run_date, status, initiated_by) \
                 VALUES (?1, ?2, 'running', ?3)",
                params![id.as_str(), now_millis(), initiated_by],
            )?;
            Ok(())
        })
    }

    fn append_log(&self, id: &RunId, level: log::Level, message: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO run_logs (run_id, timestamp, level, message) VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.as_str(),
                    now_millis(),
                    level.as_str().to_lowercase(),
                    message.trim()
                ],
            )?;
            Ok(())
        })
    }

    fn finish(&self, id: &RunId, report: &RunReport) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE runs SET status = ?2, total_tasks_found = ?3, tasks_imported = ?4, \
                   tasks_updated = ?5, tasks_skipped = ?6, duration_seconds = ?7, \
                   error_message = ?8 \
                 WHERE id = ?1",
                params![
                    id.as_str(),
                    report.status.as_str(),
                    report.found as i64,
                    report.created as i64,
                    report.updated as i64,
                    report.skipped() as i64,
                    report.duration_seconds as i64,
                    report.error.as_deref().unwrap_or_default(),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::Unavailable(format!("run {} was never opened", id)));
            }
            Ok(())
        })
    }

    fn get_run(&self, id: &RunId) -> Result<Option<RunRecord>, StoreError> {
        self.with_conn(|conn| {
            let run = conn
                .query_row(
                    &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                    params![id.as_str()],
                    run_from_row,
                )
                .optional()?;
            match run {
                Some(mut run) => {
                    run.logs = Self::logs_for(conn, id.as_str())?;
                    Ok(Some(run))
                }
                None => Ok(None),
            }
        })
    }

    fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM runs ORDER BY run_date DESC LIMIT ?1",
                RUN_COLUMNS
            ))?;
            let runs = stmt
                .query_map(params![limit as i64], run_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(runs)
        })
    }

    fn stats(&self) -> Result<RunStats, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM runs GROUP BY status")?;
            let mut stats = RunStats::default();
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?;
            for row in rows {
                let (status, count) = row?;
                match status.parse::<RunStatus>() {
                    Ok(RunStatus::Running) => stats.running += count,
                    Ok(RunStatus::Completed) => stats.completed += count,
                    Ok(RunStatus::Failed) | Err(_) => stats.failed += count,
                }
                stats.total += count;
            }
            Ok(stats)
        })
    }
}
