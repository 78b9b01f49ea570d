use crate::config::SiteProfile;
use crate::driver::Driver;
use crate::locator::Locator;
use crate::store::RunLedger;
use crate::types::{RunId, SessionKey};

/// Everything one run threads through its components: the browser, the target
/// site, whose session is in use and where run events are journaled.
pub struct RunContext<'a> {
    pub driver: &'a dyn Driver,
    pub profile: &'a SiteProfile,
    pub account: String,
    pub run_id: Option<RunId>,
    pub ledger: Option<&'a dyn RunLedger>,
}

impl<'a> RunContext<'a> {
    pub fn new(driver: &'a dyn Driver, profile: &'a SiteProfile, account: impl Into<String>) -> Self {
        Self {
            driver,
            profile,
            account: account.into(),
            run_id: None,
            ledger: None,
        }
    }

    pub fn with_run(mut self, run_id: RunId, ledger: Option<&'a dyn RunLedger>) -> Self {
        self.run_id = Some(run_id);
        self.ledger = ledger;
        self
    }

    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.profile.service, &self.account)
    }

    pub fn locator(&self) -> Locator<'a> {
        Locator::new(
            self.driver,
            &self.profile.matchers,
            self.profile.timeouts.poll_interval,
        )
    }

    /// Logs `message` and appends it to the run's journal when one is attached.
    pub fn record(&self, level: log::Level, message: &str) {
        log::log!(level, "{}", message);

        if let (Some(ledger), Some(run_id)) = (self.ledger, &self.run_id)
            && let Err(e) = ledger.append_log(run_id, level, message)
        {
            log::debug!("Could not journal to run {}: {}", run_id, e);
        }
    }

    pub fn info(&self, message: &str) {
        self.record(log::Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.record(log::Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.record(log::Level::Error, message);
    }
}
