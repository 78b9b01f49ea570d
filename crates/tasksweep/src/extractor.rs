use std::fmt::Display;

use crate::config::Field;
use crate::context::RunContext;
use crate::driver::DriverError;
use crate::locator::Locator;
use crate::parser::{ParseError, parse_assignment_listing, parse_natural_key};
use crate::types::{RawAssignmentEntry, ResolvedTask};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The listing URL carries no `/projects/<id>/tasks/<id>` segment.
    Identifiers(String),
    AnchorMissing(String),
    PanelTimeout,
    Driver(String),
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Identifiers(e) => write!(f, "unparsable identifiers: {}", e),
            SkipReason::AnchorMissing(selector) => write!(f, "anchor {} not found", selector),
            SkipReason::PanelTimeout => f.write_str("detail panel did not open"),
            SkipReason::Driver(e) => write!(f, "browser error: {}", e),
        }
    }
}

impl From<DriverError> for SkipReason {
    fn from(e: DriverError) -> Self {
        SkipReason::Driver(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Skip {
    pub entry: RawAssignmentEntry,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub found: usize,
    pub tasks: Vec<ResolvedTask>,
    pub skipped: Vec<Skip>,
}

/// Quotes `value` for use inside a CSS attribute selector.
fn css_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Targets an entry's anchor by its panel identifier when it has one, by href
/// otherwise. Never by position: closing a panel can re-render the list.
pub fn anchor_selector(entry: &RawAssignmentEntry, modal_attribute: &str) -> String {
    match &entry.object_modal {
        Some(id) => format!("a[{}={}]", modal_attribute, css_string(id)),
        None => format!("a[href={}]", css_string(&entry.href)),
    }
}

/// Scans the open report once, then resolves every entry through its detail
/// panel, one at a time.
pub async fn extract(ctx: &RunContext<'_>) -> Result<Extraction, ExtractError> {
    let driver = ctx.driver;
    let profile = ctx.profile;
    let locator = ctx.locator();

    if let Err(e) = locator
        .wait_visible(Field::ListingGroup, profile.timeouts.listing_groups)
        .await
    {
        ctx.info(&format!("No assignment groups on the report ({})", e));
        return Ok(Extraction::default());
    }

    let html = driver.content().await?;
    let page_url = driver.current_url().await?;
    let entries = parse_assignment_listing(&html, &page_url, &profile.listing)?;
    ctx.info(&format!("Found {} assignment entries", entries.len()));

    let mut extraction = Extraction {
        found: entries.len(),
        ..Extraction::default()
    };
    for (idx, entry) in entries.into_iter().enumerate() {
        match resolve(ctx, &locator, &entry).await {
            Ok(task) => {
                log::debug!("[{}/{}] resolved {}", idx + 1, extraction.found, task);
                extraction.tasks.push(task);
            }
            Err(reason) => {
                ctx.warn(&format!("Skipping {} ({}): {}", entry, entry.absolute_url, reason));
                extraction.skipped.push(Skip { entry, reason });
            }
        }
    }

    ctx.info(&format!(
        "Resolved {} of {} entries, skipped {}",
        extraction.tasks.len(),
        extraction.found,
        extraction.skipped.len()
    ));
    Ok(extraction)
}

async fn resolve(
    ctx: &RunContext<'_>,
    locator: &Locator<'_>,
    entry: &RawAssignmentEntry,
) -> Result<ResolvedTask, SkipReason> {
    let driver = ctx.driver;
    let listing = &ctx.profile.listing;
    let timeouts = &ctx.profile.timeouts;

    let key = parse_natural_key(&entry.absolute_url)
        .map_err(|e| SkipReason::Identifiers(e.to_string()))?;

    let selector = anchor_selector(entry, &listing.modal_attribute);
    if !driver.dispatch_click(&selector).await? {
        return Err(SkipReason::AnchorMissing(selector));
    }
    if let Err(e) = locator
        .wait_visible(Field::PanelMarker, timeouts.panel_open)
        .await
    {
        log::debug!("Panel for {} never appeared: {}", entry, e);
        return Err(SkipReason::PanelTimeout);
    }

    let task_name = panel_text(ctx, &listing.panel_task_name)
        .await
        .unwrap_or_else(|| entry.displayed_name.clone());
    let project_name = panel_text(ctx, &listing.panel_project_name)
        .await
        .unwrap_or_else(|| entry.project_name.clone());

    dismiss_panel(ctx, locator).await;

    Ok(ResolvedTask {
        key,
        task_name,
        project_name,
        task_url: entry.absolute_url.clone(),
        run_id: ctx.run_id.clone(),
    })
}

async fn panel_text(ctx: &RunContext<'_>, selector: &str) -> Option<String> {
    match ctx.driver.read_text(selector).await {
        Ok(text) => text.filter(|t| !t.is_empty()),
        Err(e) => {
            log::debug!("Could not read {} from panel: {}", selector, e);
            None
        }
    }
}

/// Escape, settle, then wait for the marker to go. The next click is only
/// issued after this returns.
async fn dismiss_panel(ctx: &RunContext<'_>, locator: &Locator<'_>) {
    let timeouts = &ctx.profile.timeouts;

    if let Err(e) = ctx.driver.press_escape().await {
        log::warn!("Could not dismiss detail panel: {}", e);
    }
    tokio::time::sleep(timeouts.panel_settle).await;
    if let Err(e) = locator
        .wait_hidden(Field::PanelMarker, timeouts.panel_close)
        .await
    {
        log::warn!("{}", e);
    }
}
