//! Remote write API seam.

use async_trait::async_trait;
use thiserror::Error;

use super::{AvatarUpdate, Mutation, ProfileUpdate, SettingsUpdate};

/// Failure of a single remote apply call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApplyError {
    /// Worth retrying: timeouts, connection resets, 5xx, throttling
    #[error("transient failure: {0}")]
    Transient(String),

    /// The backend rejected the content; retrying cannot succeed
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl ApplyError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, ApplyError::Permanent(_))
    }

    /// Classify an HTTP status code.
    ///
    /// 408 and 429 are transient; every other 4xx is permanent.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let message = format!("HTTP {}: {}", status, body.into());
        match status {
            408 | 429 => ApplyError::Transient(message),
            400..=499 => ApplyError::Permanent(message),
            _ => ApplyError::Transient(message),
        }
    }
}

/// Backend write API, one call per mutation kind.
#[async_trait]
pub trait MutationEndpoint: Send + Sync {
    async fn apply_profile_update(&self, payload: &ProfileUpdate) -> Result<(), ApplyError>;

    async fn apply_settings_update(&self, payload: &SettingsUpdate) -> Result<(), ApplyError>;

    /// Deletes the prior avatar object (if any) before updating the reference.
    async fn apply_avatar_update(&self, payload: &AvatarUpdate) -> Result<(), ApplyError>;

    async fn apply(&self, mutation: &Mutation) -> Result<(), ApplyError> {
        match mutation {
            Mutation::ProfileUpdate(p) => self.apply_profile_update(p).await,
            Mutation::SettingsUpdate(s) => self.apply_settings_update(s).await,
            Mutation::AvatarUpdate(a) => self.apply_avatar_update(a).await,
        }
    }
}
