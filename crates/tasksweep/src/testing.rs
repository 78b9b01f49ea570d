//! In-memory stand-ins for the browser and the storage collaborators.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

use crate::config::SiteProfile;
use crate::driver::{Driver, DriverError, ElementHandle, FrameId, Probe};
use crate::store::{RunLedger, SessionBackend, StoreError, TaskRepository, UpsertOutcome};
use crate::types::{
    NaturalKey, ResolvedTask, RunId, RunRecord, RunReport, RunStats, SessionCookie, SessionKey,
    SessionRecord, StoredTask,
};

pub const VALID_TOKEN: &str = "valid-token";
pub const DASHBOARD_URL: &str = "https://login.smartsites.com/dashboard";

/// Time between a login form submission and the resulting URL committing.
pub const SUBMIT_COMMIT_DELAY: Duration = Duration::from_millis(300);

pub fn session_cookie(value: &str) -> SessionCookie {
    SessionCookie {
        name: "sid".to_string(),
        value: value.to_string(),
        domain: ".smartsites.com".to_string(),
        path: "/".to_string(),
        expires: None,
        http_only: true,
        secure: true,
        same_site: Some("Lax".to_string()),
    }
}

/// Builds a grouped assignments report: `(header, [(href, object_modal, name)])`.
pub fn listing_html(groups: &[(&str, &[(&str, Option<&str>, &str)])]) -> String {
    let mut html = String::from("<html><body><div id=\"report_results\">");
    for (header, rows) in groups {
        html.push_str(&format!(
            "<div class=\"assignment_result_group\"><h2>{}</h2><table><tbody>",
            header
        ));
        for (href, modal, name) in rows.iter() {
            let modal = modal
                .map(|m| format!(" object-modal=\"{}\"", m))
                .unwrap_or_default();
            html.push_str(&format!(
                "<tr><td class=\"col_name\"><a href=\"{}\"{}>{}</a></td></tr>",
                href, modal, name
            ));
        }
        html.push_str("</tbody></table></div>");
    }
    html.push_str("</div></body></html>");
    html
}

struct PendingCommit {
    at: Instant,
    url: String,
    navigates: bool,
}

#[derive(Debug, Clone)]
struct Panel {
    task_name: String,
    project_name: String,
}

struct FakeState {
    url: String,
    frames: Vec<String>,
    elements: HashMap<(String, String), Probe>,
    delayed: HashMap<(String, String), u32>,

    login_frame: String,
    login_fields: Vec<String>,
    accepted: Option<(String, String)>,
    typed: HashMap<String, String>,
    single_page_login: bool,
    idle_navigation_wait: bool,
    navigations: u64,
    pending_commit: Option<PendingCommit>,
    authenticated: bool,
    cookies: Vec<SessionCookie>,
    login_attempts: usize,

    report_html: String,
    banner: bool,
    fail_goto: bool,
    failing_gotos: usize,
    report_behind_login: bool,
    presets: Vec<String>,
    menu_open: bool,
    selected_preset: Option<String>,

    anchors: HashMap<String, Option<Panel>>,
    panel: Option<Panel>,
    sticky_panel: bool,
    overlapping_clicks: usize,
    events: Vec<String>,
}

/// Scriptable [`Driver`] that simulates the target site: a login form, the
/// report page with its preset dropdown and listing, and detail panels.
pub struct FakeDriver {
    profile: SiteProfile,
    state: Mutex<FakeState>,
}

impl FakeDriver {
    pub fn new() -> Self {
        let profile = SiteProfile::default();
        Self {
            state: Mutex::new(FakeState {
                url: "about:blank".to_string(),
                frames: vec!["main".to_string()],
                elements: HashMap::new(),
                delayed: HashMap::new(),
                login_frame: "main".to_string(),
                login_fields: vec![
                    r#"input[name="email"]"#.to_string(),
                    r#"input[type="password"]"#.to_string(),
                    r#"button[type="submit"]"#.to_string(),
                ],
                accepted: None,
                typed: HashMap::new(),
                single_page_login: false,
                idle_navigation_wait: false,
                navigations: 0,
                pending_commit: None,
                authenticated: false,
                cookies: Vec::new(),
                login_attempts: 0,
                report_html: listing_html(&[]),
                banner: false,
                fail_goto: false,
                failing_gotos: 0,
                report_behind_login: false,
                presets: vec![profile.preset.clone()],
                menu_open: false,
                selected_preset: None,
                anchors: HashMap::new(),
                panel: None,
                sticky_panel: false,
                overlapping_clicks: 0,
                events: Vec::new(),
            }),
            profile,
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        if state
            .pending_commit
            .as_ref()
            .is_some_and(|c| c.at <= Instant::now())
            && let Some(commit) = state.pending_commit.take()
        {
            state.url = commit.url;
            if commit.navigates {
                state.navigations += 1;
            }
        }
        f(&mut state)
    }

    pub fn show(&self, frame: &str, selector: &str) {
        self.with_state(|s| {
            s.elements
                .insert((frame.to_string(), selector.to_string()), Probe::Visible);
        });
    }

    pub fn hide(&self, frame: &str, selector: &str) {
        self.with_state(|s| {
            s.elements
                .insert((frame.to_string(), selector.to_string()), Probe::Hidden);
        });
    }

    pub fn add_frame(&self, name: &str) {
        self.with_state(|s| s.frames.push(name.to_string()));
    }

    /// The element becomes visible after `probes` unsuccessful probes.
    pub fn show_after(&self, frame: &str, selector: &str, probes: u32) {
        self.with_state(|s| {
            s.delayed
                .insert((frame.to_string(), selector.to_string()), probes);
        });
    }

    pub fn accept_login(&self, email: &str, password: &str) {
        self.with_state(|s| s.accepted = Some((email.to_string(), password.to_string())));
    }

    /// Serves the login form inside a child frame.
    pub fn login_in_frame(&self, frame: &str) {
        self.with_state(|s| {
            s.frames.push(frame.to_string());
            s.login_frame = frame.to_string();
        });
    }

    pub fn set_login_fields(&self, fields: &[&str]) {
        self.with_state(|s| s.login_fields = fields.iter().map(|f| f.to_string()).collect());
    }

    /// Submitting changes the URL without a navigation event.
    pub fn single_page_login(&self) {
        self.with_state(|s| s.single_page_login = true);
    }

    /// Navigation waits resolve at once while the current page is loaded,
    /// like a CDP driver that only checks the frame's load state.
    pub fn idle_navigation_wait(&self) {
        self.with_state(|s| s.idle_navigation_wait = true);
    }

    pub fn set_report(&self, html: impl Into<String>) {
        let html = html.into();
        self.with_state(|s| s.report_html = html);
    }

    pub fn set_presets(&self, presets: &[&str]) {
        self.with_state(|s| s.presets = presets.iter().map(|p| p.to_string()).collect());
    }

    pub fn show_error_banner(&self) {
        self.with_state(|s| s.banner = true);
    }

    pub fn fail_goto(&self) {
        self.with_state(|s| s.fail_goto = true);
    }

    /// Only the next `count` navigations fail.
    pub fn fail_next_gotos(&self, count: usize) {
        self.with_state(|s| s.failing_gotos = count);
    }

    /// The report keeps redirecting to login even with a valid session.
    pub fn report_behind_login(&self) {
        self.with_state(|s| s.report_behind_login = true);
    }

    /// Clicking `selector` opens a panel with the given canonical fields.
    pub fn panel_for(&self, selector: &str, task_name: &str, project_name: &str) {
        self.with_state(|s| {
            s.anchors.insert(
                selector.to_string(),
                Some(Panel {
                    task_name: task_name.to_string(),
                    project_name: project_name.to_string(),
                }),
            );
        });
    }

    /// Clicking `selector` succeeds but no panel ever opens.
    pub fn dead_anchor(&self, selector: &str) {
        self.with_state(|s| {
            s.anchors.insert(selector.to_string(), None);
        });
    }

    /// Escape no longer closes an open panel.
    pub fn sticky_panel(&self) {
        self.with_state(|s| s.sticky_panel = true);
    }

    pub fn typed(&self, selector: &str) -> Option<String> {
        self.with_state(|s| s.typed.get(selector).cloned())
    }

    pub fn login_attempts(&self) -> usize {
        self.with_state(|s| s.login_attempts)
    }

    pub fn selected_preset(&self) -> Option<String> {
        self.with_state(|s| s.selected_preset.clone())
    }

    /// Panel clicks issued while a previous panel was still open.
    pub fn overlapping_clicks(&self) -> usize {
        self.with_state(|s| s.overlapping_clicks)
    }

    pub fn events(&self) -> Vec<String> {
        self.with_state(|s| s.events.clone())
    }

    fn on_login_page(&self, state: &FakeState) -> bool {
        state.url.starts_with(&self.profile.login_url)
    }

    fn on_report_page(&self, state: &FakeState) -> bool {
        state.url == self.profile.report_url
    }

    fn site_probe(&self, state: &FakeState, frame: &str, selector: &str) -> Probe {
        let matchers = &self.profile.matchers;
        let selector = selector.to_string();

        if self.on_login_page(state) {
            if frame == state.login_frame && state.login_fields.contains(&selector) {
                return Probe::Visible;
            }
            return Probe::Missing;
        }
        if frame != "main" || !self.on_report_page(state) {
            return Probe::Missing;
        }

        let has_presets = !state.presets.is_empty();
        if matchers.preset_container.contains(&selector) || matchers.preset_toggle.contains(&selector)
        {
            return if has_presets { Probe::Visible } else { Probe::Missing };
        }
        if matchers.preset_menu_item.contains(&selector) {
            return match (has_presets, state.menu_open) {
                (true, true) => Probe::Visible,
                (true, false) => Probe::Hidden,
                _ => Probe::Missing,
            };
        }
        if matchers.listing_group.contains(&selector) {
            return if state.report_html.contains("assignment_result_group") {
                Probe::Visible
            } else {
                Probe::Missing
            };
        }
        if matchers.panel_marker.contains(&selector) && state.panel.is_some() {
            return Probe::Visible;
        }
        Probe::Missing
    }

    fn submit(&self, state: &mut FakeState) {
        state.login_attempts += 1;
        let matchers = &self.profile.matchers;
        let typed_in = |fields: &[String]| {
            fields
                .iter()
                .find_map(|f| state.typed.get(f).cloned())
                .unwrap_or_default()
        };
        let email = typed_in(&matchers.username);
        let password = typed_in(&matchers.password);

        let accepted = state
            .accepted
            .as_ref()
            .is_some_and(|(e, p)| *e == email && *p == password);
        let url = if accepted {
            state.authenticated = true;
            state.cookies = vec![session_cookie(VALID_TOKEN)];
            DASHBOARD_URL.to_string()
        } else {
            format!("{}?login=failed", self.profile.login_url)
        };
        state.pending_commit = Some(PendingCommit {
            at: Instant::now() + SUBMIT_COMMIT_DELAY,
            url,
            navigates: !state.single_page_login,
        });
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        self.with_state(|s| {
            if s.fail_goto || s.failing_gotos > 0 {
                s.failing_gotos = s.failing_gotos.saturating_sub(1);
                return Err(DriverError::Protocol(format!("net::ERR_FAILED at {}", url)));
            }
            s.panel = None;
            s.menu_open = false;
            s.pending_commit = None;
            s.navigations += 1;
            let behind_login = !s.authenticated || s.report_behind_login;
            s.url = if url == self.profile.report_url && behind_login {
                format!("{}?next=%2Freports%2Fassignments", self.profile.login_url)
            } else {
                url.to_string()
            };
            s.events.push(format!("goto:{}", s.url));
            Ok(())
        })
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.with_state(|s| s.url.clone()))
    }

    async fn content(&self) -> Result<String, DriverError> {
        Ok(self.with_state(|s| {
            if !self.on_report_page(s) {
                return "<html><body></body></html>".to_string();
            }
            if s.banner {
                format!(
                    "<div class=\"alert\">{}</div>{}",
                    self.profile.error_banner, s.report_html
                )
            } else {
                s.report_html.clone()
            }
        }))
    }

    async fn frames(&self) -> Result<Vec<FrameId>, DriverError> {
        Ok(self.with_state(|s| s.frames.iter().map(FrameId::new).collect()))
    }

    async fn probe(&self, frame: &FrameId, selector: &str) -> Result<Probe, DriverError> {
        Ok(self.with_state(|s| {
            let key = (frame.as_str().to_string(), selector.to_string());
            if let Some(remaining) = s.delayed.get_mut(&key) {
                if *remaining == 0 {
                    return Probe::Visible;
                }
                *remaining -= 1;
                return Probe::Missing;
            }
            if let Some(probe) = s.elements.get(&key) {
                return *probe;
            }
            self.site_probe(s, frame.as_str(), selector)
        }))
    }

    async fn fill(&self, element: &ElementHandle, text: &str) -> Result<(), DriverError> {
        self.with_state(|s| {
            s.typed.insert(element.selector.clone(), text.to_string());
        });
        Ok(())
    }

    async fn scroll_into_view(&self, _element: &ElementHandle) -> Result<(), DriverError> {
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), DriverError> {
        self.with_state(|s| {
            let matchers = &self.profile.matchers;
            if matchers.submit.contains(&element.selector) && self.on_login_page(s) {
                self.submit(s);
            } else if matchers.preset_toggle.contains(&element.selector) {
                s.menu_open = true;
            }
            s.events.push(format!("click:{}", element.selector));
        });
        Ok(())
    }

    async fn wait_for_navigation(&self) -> Result<(), DriverError> {
        let (idle, start) = self.with_state(|s| (s.idle_navigation_wait, s.navigations));
        if idle {
            return Ok(());
        }
        loop {
            if self.with_state(|s| s.navigations > start) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn dispatch_click(&self, selector: &str) -> Result<bool, DriverError> {
        Ok(self.with_state(|s| {
            let Some(target) = s.anchors.get(selector).cloned() else {
                return false;
            };
            if s.panel.is_some() {
                s.overlapping_clicks += 1;
            }
            s.events.push(format!("open:{}", selector));
            if let Some(panel) = target {
                s.panel = Some(panel);
            }
            true
        }))
    }

    async fn click_by_text(&self, selector: &str, text: &str) -> Result<bool, DriverError> {
        Ok(self.with_state(|s| {
            let is_menu = self.profile.matchers.preset_menu_item.iter().any(|m| m == selector);
            if !is_menu || !s.menu_open || !s.presets.iter().any(|p| p == text) {
                return false;
            }
            s.selected_preset = Some(text.to_string());
            s.menu_open = false;
            s.events.push(format!("preset:{}", text));
            true
        }))
    }

    async fn read_text(&self, selector: &str) -> Result<Option<String>, DriverError> {
        Ok(self.with_state(|s| {
            let panel = s.panel.as_ref()?;
            let listing = &self.profile.listing;
            let text = if selector == listing.panel_task_name {
                panel.task_name.trim()
            } else if selector == listing.panel_project_name {
                panel.project_name.trim()
            } else {
                return None;
            };
            Some(text.to_string()).filter(|t| !t.is_empty())
        }))
    }

    async fn press_escape(&self) -> Result<(), DriverError> {
        self.with_state(|s| {
            if !s.sticky_panel {
                s.panel = None;
            }
            s.events.push("escape".to_string());
        });
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>, DriverError> {
        Ok(self.with_state(|s| s.cookies.clone()))
    }

    async fn set_cookies(&self, cookies: &[SessionCookie]) -> Result<(), DriverError> {
        self.with_state(|s| {
            s.authenticated = cookies.iter().any(|c| c.name == "sid" && c.value == VALID_TOKEN);
            s.cookies = cookies.to_vec();
        });
        Ok(())
    }
}

struct MemorySessionInner {
    records: Vec<SessionRecord>,
    fail_reads: bool,
    fail_writes: bool,
}

/// Session tier held in memory; clones share state.
#[derive(Clone)]
pub struct MemorySessionBackend {
    name: String,
    inner: Arc<Mutex<MemorySessionInner>>,
}

impl MemorySessionBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: Arc::new(Mutex::new(MemorySessionInner {
                records: Vec::new(),
                fail_reads: false,
                fail_writes: false,
            })),
        }
    }

    pub fn insert(&self, record: SessionRecord) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .records
            .retain(|r| !(r.service == record.service && r.account == record.account));
        inner.records.push(record);
    }

    pub fn fail_reads(&self) {
        self.inner.lock().unwrap().fail_reads = true;
    }

    pub fn fail_writes(&self) {
        self.inner.lock().unwrap().fail_writes = true;
    }

    pub fn records(&self) -> Vec<SessionRecord> {
        self.inner.lock().unwrap().records.clone()
    }
}

impl SessionBackend for MemorySessionBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self, key: &SessionKey) -> Result<Option<SessionRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_reads {
            return Err(StoreError::Unavailable(format!("{} is unreachable", self.name)));
        }
        Ok(inner
            .records
            .iter()
            .find(|r| r.service == key.service && r.account == key.account)
            .cloned())
    }

    fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        if self.inner.lock().unwrap().fail_writes {
            return Err(StoreError::Unavailable(format!("{} is read-only", self.name)));
        }
        self.insert(record.clone());
        Ok(())
    }
}

/// Task repository held in memory that can be told to reject chosen keys.
#[derive(Clone, Default)]
pub struct MemoryTaskRepository {
    tasks: Arc<Mutex<BTreeMap<NaturalKey, StoredTask>>>,
    rejected: Arc<Mutex<HashSet<NaturalKey>>>,
}

impl MemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, project_id: &str, parent_id: &str) {
        self.rejected.lock().unwrap().insert(NaturalKey {
            project_id: project_id.to_string(),
            parent_id: parent_id.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

impl TaskRepository for MemoryTaskRepository {
    fn upsert(&self, task: &ResolvedTask) -> Result<UpsertOutcome, StoreError> {
        if self.rejected.lock().unwrap().contains(&task.key) {
            return Err(StoreError::Unavailable(format!("write rejected for {}", task.key)));
        }
        let now = Utc::now();
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&task.key) {
            Some(existing) => {
                existing.task_name = task.task_name.clone();
                existing.project_name = task.project_name.clone();
                existing.task_url = task.task_url.clone();
                if task.run_id.is_some() {
                    existing.run_id = task.run_id.clone();
                }
                existing.updated_at = now;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                tasks.insert(
                    task.key.clone(),
                    StoredTask {
                        project_id: task.key.project_id.clone(),
                        parent_id: task.key.parent_id.clone(),
                        task_name: task.task_name.clone(),
                        project_name: task.project_name.clone(),
                        task_url: task.task_url.clone(),
                        status: "unassigned".to_string(),
                        category: "Uncategorized".to_string(),
                        priority: "medium".to_string(),
                        estimate_hours: 0.0,
                        time_tracked_decimal: 0.0,
                        run_id: task.run_id.clone(),
                        created_at: now,
                        updated_at: now,
                    },
                );
                Ok(UpsertOutcome::Created)
            }
        }
    }

    fn find(&self, key: &NaturalKey) -> Result<Option<StoredTask>, StoreError> {
        Ok(self.tasks.lock().unwrap().get(key).cloned())
    }

    fn list(&self, limit: usize) -> Result<Vec<StoredTask>, StoreError> {
        Ok(self.tasks.lock().unwrap().values().take(limit).cloned().collect())
    }
}

/// Run ledger whose every call fails.
pub struct BrokenLedger;

impl RunLedger for BrokenLedger {
    fn open_run(&self, _id: &RunId, _initiated_by: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("ledger offline".to_string()))
    }

    fn append_log(&self, _id: &RunId, _level: log::Level, _message: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("ledger offline".to_string()))
    }

    fn finish(&self, _id: &RunId, _report: &RunReport) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("ledger offline".to_string()))
    }

    fn get_run(&self, _id: &RunId) -> Result<Option<RunRecord>, StoreError> {
        Err(StoreError::Unavailable("ledger offline".to_string()))
    }

    fn recent_runs(&self, _limit: usize) -> Result<Vec<RunRecord>, StoreError> {
        Err(StoreError::Unavailable("ledger offline".to_string()))
    }

    fn stats(&self) -> Result<RunStats, StoreError> {
        Err(StoreError::Unavailable("ledger offline".to_string()))
    }
}
