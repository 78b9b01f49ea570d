use std::fmt::Display;

use tokio::time::{Instant, sleep};

use crate::config::{Credentials, Field};
use crate::context::RunContext;
use crate::driver::{DriverError, bounded};
use crate::locator::LocateError;
use crate::parser::is_login_url;
use crate::store::SessionStore;
use crate::types::SessionRecord;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Login page did not load: {0}")]
    LoginPage(#[source] DriverError),
    #[error(transparent)]
    Locate(#[from] LocateError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("Login rejected, still on the login page ({url})")]
    Rejected { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Submitting,
    AuthenticatedFresh,
    Failed,
}

impl Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Submitting => "submitting",
            AuthState::AuthenticatedFresh => "authenticated",
            AuthState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Drives the login form and writes the captured session through every tier.
/// A rejected login is final: the same credentials would be rejected again.
pub struct Authenticator<'a> {
    credentials: &'a Credentials,
    sessions: &'a SessionStore,
    state: AuthState,
}

impl<'a> Authenticator<'a> {
    pub fn new(credentials: &'a Credentials, sessions: &'a SessionStore) -> Self {
        Self {
            credentials,
            sessions,
            state: AuthState::Unauthenticated,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    fn advance(&mut self, next: AuthState) {
        log::debug!("Authenticator: {} -> {}", self.state, next);
        self.state = next;
    }

    pub async fn login(&mut self, ctx: &RunContext<'_>) -> Result<SessionRecord, AuthError> {
        match self.submit(ctx).await {
            Ok(record) => {
                self.advance(AuthState::AuthenticatedFresh);
                Ok(record)
            }
            Err(e) => {
                self.advance(AuthState::Failed);
                ctx.error(&format!("Login failed: {}", e));
                Err(e)
            }
        }
    }

    async fn submit(&mut self, ctx: &RunContext<'_>) -> Result<SessionRecord, AuthError> {
        let driver = ctx.driver;
        let profile = ctx.profile;
        let timeouts = &profile.timeouts;
        let locator = ctx.locator();

        ctx.info(&format!("Logging in to {} as {}", profile.login_url, self.credentials.email));
        bounded("login page", timeouts.login_page_load, driver.goto(&profile.login_url))
            .await
            .map_err(AuthError::LoginPage)?;

        self.advance(AuthState::Submitting);

        let username = locator
            .wait_visible(Field::Username, timeouts.credential_field)
            .await?;
        driver.fill(&username, &self.credentials.email).await?;

        let password = locator
            .wait_visible(Field::Password, timeouts.credential_field)
            .await?;
        driver.fill(&password, &self.credentials.password).await?;

        let submit = locator
            .wait_visible(Field::Submit, timeouts.submit_control)
            .await?;
        driver.scroll_into_view(&submit).await?;

        let deadline = Instant::now() + timeouts.post_submit_navigation;
        let (navigation, clicked) = tokio::join!(
            bounded(
                "post-submit navigation",
                timeouts.post_submit_navigation,
                driver.wait_for_navigation()
            ),
            driver.click(&submit),
        );
        clicked?;
        if let Err(e) = navigation {
            log::info!("No navigation after submit, assuming a single-page flow ({})", e);
        }

        let url = self.landing_url(ctx, deadline).await?;
        if is_login_url(&url) {
            return Err(AuthError::Rejected { url });
        }
        ctx.info(&format!("Login succeeded, landed on {}", url));

        let cookies = driver.cookies().await?;
        let record = SessionRecord::new(&ctx.session_key(), cookies, ctx.run_id.clone());
        if record.is_usable() {
            let written = self.sessions.save(&record);
            if written == 0 {
                ctx.warn("Session cookies could not be saved to any tier");
            }
        } else {
            ctx.warn("Login succeeded but the browser holds no cookies to save");
        }

        Ok(record)
    }

    /// Polls the page URL until it leaves the login page or `deadline` passes.
    /// The navigation signal can arrive before the form submission commits.
    async fn landing_url(
        &self,
        ctx: &RunContext<'_>,
        deadline: Instant,
    ) -> Result<String, AuthError> {
        loop {
            let url = ctx.driver.current_url().await?;
            if !is_login_url(&url) || Instant::now() >= deadline {
                return Ok(url);
            }
            sleep(ctx.profile.timeouts.poll_interval).await;
        }
    }
}
