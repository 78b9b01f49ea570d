use crate::config::Field;
use crate::context::RunContext;
use crate::driver::{DriverError, bounded};
use crate::locator::LocateError;
use crate::parser::is_login_url;

#[derive(Debug, thiserror::Error)]
pub enum NavigationError {
    #[error("Report page did not load: {0}")]
    Load(#[from] DriverError),
}

#[derive(Debug, thiserror::Error)]
enum PresetError {
    #[error(transparent)]
    Locate(#[from] LocateError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("no menu item named '{0}'")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// The report is open; extraction can start.
    Ready,
    /// The site bounced us to its login page: the session is missing or stale.
    RequiresLogin,
}

/// Opens the protected report and applies the configured preset.
pub async fn open_report(ctx: &RunContext<'_>) -> Result<NavigationOutcome, NavigationError> {
    let driver = ctx.driver;
    let profile = ctx.profile;

    ctx.info(&format!("Opening {}", profile.report_url));
    bounded(
        "report page",
        profile.timeouts.report_load,
        driver.goto(&profile.report_url),
    )
    .await?;

    let url = driver.current_url().await?;
    if is_login_url(&url) {
        ctx.info(&format!("Redirected to login ({}), session is not valid", url));
        return Ok(NavigationOutcome::RequiresLogin);
    }

    match driver.content().await {
        Ok(html) if html.contains(&profile.error_banner) => ctx.warn(&format!(
            "Report page shows '{}', continuing with whatever loaded",
            profile.error_banner
        )),
        Ok(_) => {}
        Err(e) => log::debug!("Could not read page content for banner check: {}", e),
    }

    match select_preset(ctx).await {
        Ok(()) => ctx.info(&format!("Preset '{}' selected", profile.preset)),
        Err(e) => ctx.warn(&format!("Preset not selected: {}", e)),
    }

    Ok(NavigationOutcome::Ready)
}

async fn select_preset(ctx: &RunContext<'_>) -> Result<(), PresetError> {
    let driver = ctx.driver;
    let profile = ctx.profile;
    let timeouts = &profile.timeouts;
    let locator = ctx.locator();

    locator
        .wait_visible(Field::PresetContainer, timeouts.preset_container)
        .await?;
    let toggle = locator
        .wait_visible(Field::PresetToggle, timeouts.preset_toggle)
        .await?;
    driver.click(&toggle).await?;

    let menu = locator
        .wait_visible(Field::PresetMenuItem, timeouts.preset_menu)
        .await?;
    if !driver.click_by_text(&menu.selector, &profile.preset).await? {
        return Err(PresetError::NotFound(profile.preset.clone()));
    }

    tokio::time::sleep(timeouts.preset_settle).await;
    Ok(())
}
