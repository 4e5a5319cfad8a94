use tokio::sync::broadcast::{self, error::RecvError};

use crate::queue::ActionOutcome;

/// Counts of what an [`OutcomeLogger`] saw before its channel closed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeTally {
    pub applied: u64,
    pub abandoned: u64,
    /// Outcomes overwritten before the logger could read them
    pub missed: u64,
}

/// Logs every applied or abandoned mutation until the queue goes away.
///
/// Falling behind the broadcast buffer costs the oldest outcomes, not the
/// logger: a lag is reported and the loop keeps reading.
pub struct OutcomeLogger {
    outcomes: broadcast::Receiver<ActionOutcome>,
}

impl OutcomeLogger {
    pub fn new(outcomes: broadcast::Receiver<ActionOutcome>) -> Self {
        Self { outcomes }
    }

    pub async fn run(mut self) -> OutcomeTally {
        let mut tally = OutcomeTally::default();

        loop {
            match self.outcomes.recv().await {
                Ok(ActionOutcome::Applied { id, kind, attempts }) => {
                    tally.applied += 1;
                    tracing::info!(action_id = %id, kind = kind, attempts = attempts, "Queued mutation applied");
                }
                Ok(ActionOutcome::Abandoned { id, kind, reason, last_error, .. }) => {
                    tally.abandoned += 1;
                    tracing::warn!(
                        action_id = %id,
                        kind = kind,
                        reason = ?reason,
                        error = %last_error,
                        "Queued mutation abandoned"
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    tally.missed += skipped;
                    tracing::warn!(skipped = skipped, "Outcome logger fell behind, outcomes dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }

        tracing::debug!(
            applied = tally.applied,
            abandoned = tally.abandoned,
            missed = tally.missed,
            "Outcome logger stopped"
        );
        tally
    }
}
