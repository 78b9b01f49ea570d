use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One browser cookie as captured after a successful login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    /// Seconds since the epoch; `None` for session cookies.
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: Option<String>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub service: String,
    pub account: String,
}

impl SessionKey {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

impl Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service, self.account)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub service: String,
    pub account: String,
    pub cookies: Vec<SessionCookie>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub run_id: Option<RunId>,
}

impl SessionRecord {
    pub fn new(key: &SessionKey, cookies: Vec<SessionCookie>, run_id: Option<RunId>) -> Self {
        Self {
            service: key.service.clone(),
            account: key.account.clone(),
            cookies,
            updated_at: Utc::now(),
            run_id,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.service, &self.account)
    }

    pub fn is_usable(&self) -> bool {
        !self.cookies.is_empty()
    }
}

/// One listing row as scraped from the grouped assignments report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAssignmentEntry {
    pub group_header: String,
    pub project_name: String,
    pub displayed_name: String,
    pub href: String,
    pub absolute_url: String,
    pub object_modal: Option<String>,
}

impl Display for RawAssignmentEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.project_name, self.displayed_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    pub project_id: String,
    pub parent_id: String,
}

impl Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.project_id, self.parent_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTask {
    pub key: NaturalKey,
    pub task_name: String,
    pub project_name: String,
    pub task_url: String,
    pub run_id: Option<RunId>,
}

impl Display for ResolvedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {} ({})",
            self.key, self.task_name, self.project_name
        )
    }
}

/// A task row as held by canonical task storage, including insert defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTask {
    pub project_id: String,
    pub parent_id: String,
    pub task_name: String,
    pub project_name: String,
    pub task_url: String,
    pub status: String,
    pub category: String,
    pub priority: String,
    pub estimate_hours: f64,
    pub time_tracked_decimal: f64,
    pub run_id: Option<RunId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Display for StoredTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} [{}] {} - {}",
            self.project_id, self.parent_id, self.status, self.task_name, self.project_name
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid run status '{0}'. Accepted values: 'running', 'completed', 'failed'")]
pub struct RunStatusParseError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = RunStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(RunStatusParseError(s.to_string())),
        }
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLogLine {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub run_date: DateTime<Utc>,
    pub status: RunStatus,
    pub total_tasks_found: u64,
    pub tasks_imported: u64,
    pub tasks_updated: u64,
    pub tasks_skipped: u64,
    pub duration_seconds: u64,
    pub error_message: String,
    pub initiated_by: String,
    pub logs: Vec<RunLogLine>,
}

impl Display for RunRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} [{}] found {}, imported {}, updated {}, skipped {} ({}s)",
            self.run_date.format("%Y-%m-%d %H:%M:%S"),
            self.id,
            self.status,
            self.total_tasks_found,
            self.tasks_imported,
            self.tasks_updated,
            self.tasks_skipped,
            self.duration_seconds
        )?;
        if !self.error_message.is_empty() {
            write!(f, " - {}", self.error_message)?;
        }
        Ok(())
    }
}

/// Final figures of one run, as handed to run bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub found: usize,
    pub saved: usize,
    pub created: usize,
    pub updated: usize,
    pub duration_seconds: u64,
    pub error: Option<String>,
}

impl RunReport {
    pub fn skipped(&self) -> usize {
        self.found.saturating_sub(self.saved)
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nRun summary:")?;
        writeln!(f, "  Status:   {}", self.status)?;
        writeln!(f, "  Found:    {}", self.found)?;
        writeln!(
            f,
            "  Saved:    {} ({} new, {} updated)",
            self.saved, self.created, self.updated
        )?;
        writeln!(f, "  Skipped:  {}", self.skipped())?;
        if let Some(error) = &self.error {
            writeln!(f, "  Error:    {}", error)?;
        }
        writeln!(f, "  Duration: {}s", self.duration_seconds)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

impl Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nStatistics:")?;
        writeln!(f, "  Completed runs: {}", self.completed)?;
        writeln!(f, "  Failed runs:    {}", self.failed)?;
        writeln!(f, "  Running:        {}", self.running)?;
        writeln!(f, "  Total:          {}", self.total)
    }
}
