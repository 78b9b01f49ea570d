use std::fmt::Display;
use std::time::Instant;

use crate::auth::{AuthError, Authenticator};
use crate::config::{Credentials, SiteProfile};
use crate::context::RunContext;
use crate::driver::{Driver, DriverError};
use crate::extractor::{self, Extraction};
use crate::navigator::{self, NavigationError, NavigationOutcome};
use crate::persister::{self, PersistSummary};
use crate::store::{RunLedger, SessionStore, TaskRepository};
use crate::types::{RunId, RunReport, RunStatus};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Report unavailable after login: {0}")]
    Navigation(#[from] NavigationError),
    #[error("Report still redirects to login after a successful login")]
    SessionRejected,
    #[error(transparent)]
    Driver(#[from] DriverError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    TryResume,
    Authenticating,
    Extracting,
    Done,
    Aborted,
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::TryResume => "try-resume",
            Phase::Authenticating => "authenticating",
            Phase::Extracting => "extracting",
            Phase::Done => "done",
            Phase::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Collaborators of a run. The browser is handed to [`Orchestrator::run`]
/// separately so one orchestrator can drive several browsers.
pub struct Orchestrator<'a> {
    pub profile: &'a SiteProfile,
    pub credentials: &'a Credentials,
    pub sessions: &'a SessionStore,
    pub tasks: &'a dyn TaskRepository,
    pub ledger: Option<&'a dyn RunLedger>,
}

impl<'a> Orchestrator<'a> {
    /// Runs resume, login, extraction and persistence to completion. Only a
    /// failed login (or a report that stays unreachable after one) fails the run.
    pub async fn run(
        &self,
        driver: &dyn Driver,
        account: &str,
        run_id: RunId,
        initiated_by: &str,
    ) -> RunReport {
        let started = Instant::now();

        if let Some(ledger) = self.ledger
            && let Err(e) = ledger.open_run(&run_id, initiated_by)
        {
            log::warn!("Could not open run {} in the ledger: {}", run_id, e);
        }

        let ctx = RunContext::new(driver, self.profile, account).with_run(run_id, self.ledger);
        ctx.info(&format!(
            "Run {} started for {}",
            ctx.run_id.as_ref().map(RunId::as_str).unwrap_or_default(),
            ctx.session_key()
        ));

        let mut phase = Phase::TryResume;
        let mut results: Option<(Extraction, PersistSummary)> = None;
        let mut failure: Option<RunError> = None;

        loop {
            let next = match phase {
                Phase::TryResume => self.try_resume(&ctx).await,
                Phase::Authenticating => match self.authenticate(&ctx).await {
                    Ok(()) => Phase::Extracting,
                    Err(e) => {
                        failure = Some(e);
                        Phase::Aborted
                    }
                },
                Phase::Extracting => {
                    results = Some(self.extract_and_persist(&ctx).await);
                    Phase::Done
                }
                Phase::Done | Phase::Aborted => break,
            };
            log::debug!("Run phase: {} -> {}", phase, next);
            phase = next;
        }

        let (extraction, summary) = results.unwrap_or_default();
        let report = RunReport {
            status: if phase == Phase::Done {
                RunStatus::Completed
            } else {
                RunStatus::Failed
            },
            found: extraction.found,
            saved: summary.saved,
            created: summary.created,
            updated: summary.updated,
            duration_seconds: started.elapsed().as_secs(),
            error: failure.map(|e| e.to_string()),
        };

        match &report.error {
            Some(error) => ctx.error(&format!("Run failed: {}", error)),
            None => ctx.info(&format!(
                "Run completed: {} found, {} saved, {} skipped",
                report.found,
                report.saved,
                report.skipped()
            )),
        }

        if let (Some(ledger), Some(run_id)) = (self.ledger, &ctx.run_id)
            && let Err(e) = ledger.finish(run_id, &report)
        {
            log::warn!("Could not record the outcome of run {}: {}", run_id, e);
        }

        report
    }

    async fn try_resume(&self, ctx: &RunContext<'_>) -> Phase {
        let Some(record) = self.sessions.load(&ctx.session_key()) else {
            ctx.info("No stored session, logging in");
            return Phase::Authenticating;
        };

        if let Err(e) = ctx.driver.set_cookies(&record.cookies).await {
            ctx.warn(&format!("Could not restore stored session: {}", e));
            return Phase::Authenticating;
        }

        match navigator::open_report(ctx).await {
            Ok(NavigationOutcome::Ready) => {
                ctx.info(&format!(
                    "Resumed session from {}",
                    record.updated_at.format("%Y-%m-%d %H:%M:%S")
                ));
                Phase::Extracting
            }
            Ok(NavigationOutcome::RequiresLogin) => {
                ctx.info("Stored session has expired, logging in");
                Phase::Authenticating
            }
            Err(e) => {
                ctx.warn(&format!("Resume failed ({}), logging in", e));
                Phase::Authenticating
            }
        }
    }

    async fn authenticate(&self, ctx: &RunContext<'_>) -> Result<(), RunError> {
        Authenticator::new(self.credentials, self.sessions)
            .login(ctx)
            .await?;

        match navigator::open_report(ctx).await? {
            NavigationOutcome::Ready => Ok(()),
            NavigationOutcome::RequiresLogin => Err(RunError::SessionRejected),
        }
    }

    async fn extract_and_persist(&self, ctx: &RunContext<'_>) -> (Extraction, PersistSummary) {
        let extraction = match extractor::extract(ctx).await {
            Ok(extraction) => extraction,
            Err(e) => {
                ctx.error(&format!("Listing could not be read: {}", e));
                Extraction::default()
            }
        };
        let summary = persister::persist(ctx, self.tasks, &extraction.tasks);
        (extraction, summary)
    }
}
