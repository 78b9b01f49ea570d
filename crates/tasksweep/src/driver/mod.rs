//! The browser seam. Everything the engine does to a page goes through
//! [`Driver`]; [`chromium::ChromiumDriver`] is the production implementation.

pub mod chromium;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::SessionCookie;

pub use chromium::{ChromiumDriver, LaunchOptions};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Browser launch failed: {0}")]
    Launch(String),
    #[error("Browser protocol error: {0}")]
    Protocol(String),
    #[error("Script evaluation failed: {0}")]
    Script(String),
    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameId(String);

impl FrameId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A located element: the first node matching `selector` inside `frame`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub frame: FrameId,
    pub selector: String,
}

/// Result of probing one selector in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Missing,
    /// Attached but `display:none`, `visibility:hidden` or zero-sized.
    Hidden,
    Visible,
}

#[async_trait]
pub trait Driver: Send + Sync {
    /// Navigates the page and resolves once the load settles. Unbounded; callers
    /// wrap it with [`bounded`].
    async fn goto(&self, url: &str) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    async fn content(&self) -> Result<String, DriverError>;

    /// Every currently attached frame, main frame first.
    async fn frames(&self) -> Result<Vec<FrameId>, DriverError>;

    async fn probe(&self, frame: &FrameId, selector: &str) -> Result<Probe, DriverError>;

    /// Selects the element's current content and types `text` over it.
    async fn fill(&self, element: &ElementHandle, text: &str) -> Result<(), DriverError>;

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<(), DriverError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), DriverError>;

    /// Resolves on the next main-frame navigation committed after the call
    /// starts. Unbounded. A navigation already finished does not count.
    async fn wait_for_navigation(&self) -> Result<(), DriverError>;

    /// Dispatches a synthetic bubbling click on the first main-document match.
    /// Returns `false` when nothing matched.
    async fn dispatch_click(&self, selector: &str) -> Result<bool, DriverError>;

    /// Clicks the first match whose trimmed text equals `text`.
    async fn click_by_text(&self, selector: &str, text: &str) -> Result<bool, DriverError>;

    /// Trimmed text of the first main-document match, if any.
    async fn read_text(&self, selector: &str) -> Result<Option<String>, DriverError>;

    async fn press_escape(&self) -> Result<(), DriverError>;

    async fn cookies(&self) -> Result<Vec<SessionCookie>, DriverError>;

    async fn set_cookies(&self, cookies: &[SessionCookie]) -> Result<(), DriverError>;
}

/// Bounds a driver wait, turning an elapsed deadline into [`DriverError::Timeout`].
pub async fn bounded<T, F>(what: &str, after: Duration, fut: F) -> Result<T, DriverError>
where
    F: Future<Output = Result<T, DriverError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::Timeout {
            what: what.to_string(),
            after,
        }),
    }
}
