//! Queue data models

use serde::Serialize;
use uuid::Uuid;

/// Final fate of a queued action, broadcast to outcome subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Applied {
        id: Uuid,
        kind: &'static str,
        attempts: u32,
    },
    Abandoned {
        id: Uuid,
        kind: &'static str,
        attempts: u32,
        reason: AbandonReason,
        last_error: String,
    },
}

impl ActionOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            ActionOutcome::Applied { id, .. } | ActionOutcome::Abandoned { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    /// Retry budget used up
    Exhausted,
    /// Remote rejected the content
    Permanent,
}

/// Why a drain call did not run a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainSkip {
    /// Another pass was already running
    Busy,
    /// Connectivity was unreachable before the first action
    Offline,
}

/// Result of a drain call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Actions applied and removed
    pub applied: usize,
    /// Actions that failed and stay queued
    pub retried: usize,
    /// Actions removed after failing
    pub abandoned: usize,
    /// Actions still queued after the pass
    pub remaining: usize,
    /// Set when no pass ran
    pub skipped: Option<DrainSkip>,
    /// The pass stopped at its deadline with actions left untried
    pub deadline_reached: bool,
}

impl DrainReport {
    pub fn skipped(reason: DrainSkip, remaining: usize) -> Self {
        Self {
            remaining,
            skipped: Some(reason),
            ..Default::default()
        }
    }

    pub fn ran(&self) -> bool {
        self.skipped.is_none()
    }
}

/// Statistics about the mutation queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub draining: bool,
    pub oldest_attempts: Option<u32>,
    pub max_retries: u32,
    pub storage_key: String,
    pub store_backend: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_report() {
        let report = DrainReport::skipped(DrainSkip::Busy, 4);
        assert!(!report.ran());
        assert_eq!(report.remaining, 4);
        assert_eq!(report.applied, 0);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = ActionOutcome::Abandoned {
            id: Uuid::nil(),
            kind: "AvatarUpdate",
            attempts: 3,
            reason: AbandonReason::Exhausted,
            last_error: "HTTP 503".to_string(),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], "abandoned");
        assert_eq!(value["reason"], "exhausted");
        assert_eq!(outcome.id(), Uuid::nil());
    }
}
