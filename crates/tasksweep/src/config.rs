use std::time::Duration;

pub const SESSION_SERVICE: &str = "smartsites";
pub const DEFAULT_ACCOUNT: &str = "default";

/// Logical fields the locator can be asked for. Each maps to an ordered list of
/// CSS selectors in [`MatcherTable`]; earlier entries win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Username,
    Password,
    Submit,
    PresetContainer,
    PresetToggle,
    PresetMenuItem,
    ListingGroup,
    PanelMarker,
}

impl Field {
    pub fn label(&self) -> &'static str {
        match self {
            Field::Username => "username field",
            Field::Password => "password field",
            Field::Submit => "submit control",
            Field::PresetContainer => "preset dropdown",
            Field::PresetToggle => "preset dropdown toggle",
            Field::PresetMenuItem => "preset menu",
            Field::ListingGroup => "assignment groups",
            Field::PanelMarker => "task detail panel",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatcherTable {
    pub username: Vec<String>,
    pub password: Vec<String>,
    pub submit: Vec<String>,
    pub preset_container: Vec<String>,
    pub preset_toggle: Vec<String>,
    pub preset_menu_item: Vec<String>,
    pub listing_group: Vec<String>,
    pub panel_marker: Vec<String>,
}

impl MatcherTable {
    pub fn selectors(&self, field: Field) -> &[String] {
        match field {
            Field::Username => &self.username,
            Field::Password => &self.password,
            Field::Submit => &self.submit,
            Field::PresetContainer => &self.preset_container,
            Field::PresetToggle => &self.preset_toggle,
            Field::PresetMenuItem => &self.preset_menu_item,
            Field::ListingGroup => &self.listing_group,
            Field::PanelMarker => &self.panel_marker,
        }
    }
}

fn owned(selectors: &[&str]) -> Vec<String> {
    selectors.iter().map(|s| s.to_string()).collect()
}

impl Default for MatcherTable {
    fn default() -> Self {
        Self {
            username: owned(&[
                r#"input[name="username"]"#,
                "input#username",
                r#"input[name="email"]"#,
                "input#email",
                r#"input[type="email"]"#,
            ]),
            password: owned(&[
                r#"input[name="password"]"#,
                "input#password",
                r#"input[type="password"]"#,
            ]),
            submit: owned(&[
                r#"button[type="submit"]"#,
                "button#login",
                r#"button[data-testid="login"]"#,
            ]),
            preset_container: owned(&[".custom_reports_dropdown"]),
            preset_toggle: owned(&[
                r#".custom_reports_dropdown button[data-qa-id="button-dropdown-open"]"#,
            ]),
            preset_menu_item: owned(&[".custom_reports_dropdown .menu .menu-list a"]),
            listing_group: owned(&[".assignment_result_group"]),
            panel_marker: owned(&[".task_name"]),
        }
    }
}

/// Selectors used by the one-shot listing scan and the detail panel reads.
#[derive(Debug, Clone)]
pub struct ListingSelectors {
    pub group: String,
    pub header: String,
    pub anchor: String,
    pub modal_attribute: String,
    pub panel_task_name: String,
    pub panel_project_name: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            group: ".assignment_result_group".to_string(),
            header: "h2".to_string(),
            anchor: "tbody tr td.col_name a[href]".to_string(),
            modal_attribute: "object-modal".to_string(),
            panel_task_name: ".task_name".to_string(),
            panel_project_name: ".task__projectname .project_name_task_modal".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Timeouts {
    pub poll_interval: Duration,
    pub typing_delay: Duration,
    pub login_page_load: Duration,
    pub credential_field: Duration,
    pub submit_control: Duration,
    pub post_submit_navigation: Duration,
    pub report_load: Duration,
    pub preset_container: Duration,
    pub preset_toggle: Duration,
    pub preset_menu: Duration,
    pub preset_settle: Duration,
    pub listing_groups: Duration,
    pub panel_open: Duration,
    pub panel_settle: Duration,
    pub panel_close: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            typing_delay: Duration::from_millis(50),
            login_page_load: Duration::from_secs(30),
            credential_field: Duration::from_secs(45),
            submit_control: Duration::from_secs(30),
            post_submit_navigation: Duration::from_secs(45),
            report_load: Duration::from_secs(45),
            preset_container: Duration::from_secs(30),
            preset_toggle: Duration::from_secs(20),
            preset_menu: Duration::from_secs(15),
            preset_settle: Duration::from_secs(1),
            listing_groups: Duration::from_secs(30),
            panel_open: Duration::from_secs(20),
            panel_settle: Duration::from_millis(500),
            panel_close: Duration::from_secs(10),
        }
    }
}

/// Everything that binds the engine to one target site.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    pub service: String,
    pub login_url: String,
    pub report_url: String,
    pub preset: String,
    pub error_banner: String,
    pub matchers: MatcherTable,
    pub listing: ListingSelectors,
    pub timeouts: Timeouts,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            service: SESSION_SERVICE.to_string(),
            login_url: "https://login.smartsites.com/login".to_string(),
            report_url: "https://login.smartsites.com/reports/assignments".to_string(),
            preset: "Dashboard".to_string(),
            error_banner: "Something went wrong".to_string(),
            matchers: MatcherTable::default(),
            listing: ListingSelectors::default(),
            timeouts: Timeouts::default(),
        }
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Parses a HEADLESS-style toggle. `None` means "not recognised, use the default".
pub fn parse_toggle(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "false" | "0" | "no" | "off" | "" => Some(false),
        "true" | "1" | "yes" | "on" => Some(true),
        _ => None,
    }
}

/// Deployment environment name: `APP_ENV` first, then `NODE_ENV`.
pub fn resolve_environment<'a>(
    app_env: Option<&'a str>,
    node_env: Option<&'a str>,
) -> Option<&'a str> {
    [app_env, node_env]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
}

pub fn resolve_headless(headless: Option<&str>, app_env: Option<&str>) -> bool {
    let is_production = app_env.is_some_and(|env| env.trim().eq_ignore_ascii_case("production"));
    headless.and_then(parse_toggle).unwrap_or(is_production)
}

/// `true` always keeps the browser, `false` always closes it, anything else keeps
/// it only for visible runs.
pub fn resolve_keep_open(keep_open: Option<&str>, headless: bool) -> bool {
    match keep_open.map(|v| v.trim().to_lowercase()) {
        Some(v) if v == "true" => true,
        Some(v) if v == "false" => false,
        _ => !headless,
    }
}

pub fn resolve_account(session_identifier: Option<&str>, email: Option<&str>) -> String {
    [session_identifier, email]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
        .unwrap_or(DEFAULT_ACCOUNT)
        .to_string()
}
