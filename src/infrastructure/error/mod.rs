//! Crate-level error type.
//!
//! Each component has its own narrow error enum; `SyncError` covers the
//! failures the composition root hands back to the agent binary.

use thiserror::Error;

use crate::mutation::ApplyError;
use crate::realtime::RealtimeError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote apply error: {0}")]
    Apply(#[from] ApplyError),

    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),
}

impl SyncError {
    /// Stable short code for logs and host-side error reporting
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Apply(_) => "APPLY_ERROR",
            SyncError::Realtime(_) => "REALTIME_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
