//! Durable mutation queue.
//!
//! Writes made while offline are appended here, persisted through a
//! [`KeyValueStore`](crate::store::KeyValueStore), and applied in FIFO order
//! against a [`MutationEndpoint`](crate::mutation::MutationEndpoint) once
//! connectivity allows.

mod engine;
mod models;

pub use engine::MutationQueue;
pub use models::{AbandonReason, ActionOutcome, DrainReport, DrainSkip, QueueStats};
