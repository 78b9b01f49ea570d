use std::fmt::Display;

use crate::context::RunContext;
use crate::store::{TaskRepository, UpsertOutcome};
use crate::types::ResolvedTask;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistSummary {
    pub saved: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

impl Display for PersistSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "saved {} ({} new, {} updated), failed {}",
            self.saved, self.created, self.updated, self.failed
        )
    }
}

/// Upserts every task by natural key. A failed write is logged and the
/// remaining tasks are still written.
pub fn persist(
    ctx: &RunContext<'_>,
    repository: &dyn TaskRepository,
    tasks: &[ResolvedTask],
) -> PersistSummary {
    let mut summary = PersistSummary::default();

    for task in tasks {
        match repository.upsert(task) {
            Ok(outcome) => {
                summary.saved += 1;
                match outcome {
                    UpsertOutcome::Created => summary.created += 1,
                    UpsertOutcome::Updated => summary.updated += 1,
                }
                log::debug!("{:?} {}", outcome, task);
            }
            Err(e) => {
                summary.failed += 1;
                ctx.warn(&format!("Failed to save task {}: {}", task.key, e));
            }
        }
    }

    ctx.info(&format!("Persisted tasks: {}", summary));
    summary
}
