use std::time::Duration;

use tokio::time::Instant;

use crate::config::{Field, MatcherTable};
use crate::driver::{Driver, DriverError, ElementHandle, Probe};

#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    #[error("Timeout waiting for {field} ({selectors}) after {after:?}")]
    Timeout {
        field: &'static str,
        selectors: String,
        after: Duration,
    },
    #[error("Timeout waiting for {field} to disappear after {after:?}")]
    StillVisible { field: &'static str, after: Duration },
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Polls every attached frame for the first visible element matching a field's
/// selector list. Frames are scanned in order, selectors in table order within
/// each frame.
pub struct Locator<'a> {
    driver: &'a dyn Driver,
    matchers: &'a MatcherTable,
    poll_interval: Duration,
}

impl<'a> Locator<'a> {
    pub fn new(driver: &'a dyn Driver, matchers: &'a MatcherTable, poll_interval: Duration) -> Self {
        Self {
            driver,
            matchers,
            poll_interval,
        }
    }

    pub async fn wait_visible(
        &self,
        field: Field,
        timeout: Duration,
    ) -> Result<ElementHandle, LocateError> {
        let selectors = self.matchers.selectors(field);
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(found) = self.scan(selectors).await {
                log::debug!(
                    "Located {} via '{}' in frame {}",
                    field.label(),
                    found.selector,
                    found.frame.as_str()
                );
                return Ok(found);
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(LocateError::Timeout {
                    field: field.label(),
                    selectors: selectors.join(", "),
                    after: timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Resolves once no selector of `field` is visible in any frame.
    pub async fn wait_hidden(&self, field: Field, timeout: Duration) -> Result<(), LocateError> {
        let selectors = self.matchers.selectors(field);
        let deadline = Instant::now() + timeout;

        loop {
            if self.scan(selectors).await.is_none() {
                return Ok(());
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(LocateError::StillVisible {
                    field: field.label(),
                    after: timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn scan(&self, selectors: &[String]) -> Option<ElementHandle> {
        let frames = match self.driver.frames().await {
            Ok(frames) => frames,
            Err(e) => {
                log::debug!("Could not list frames: {}", e);
                return None;
            }
        };

        for frame in frames {
            for selector in selectors {
                match self.driver.probe(&frame, selector).await {
                    Ok(Probe::Visible) => {
                        return Some(ElementHandle {
                            frame,
                            selector: selector.clone(),
                        });
                    }
                    Ok(Probe::Hidden | Probe::Missing) => {}
                    // frames detach mid-scan; the next poll sees the new tree
                    Err(e) => log::trace!(
                        "Probe of '{}' in frame {} failed: {}",
                        selector,
                        frame.as_str(),
                        e
                    ),
                }
            }
        }
        None
    }
}
