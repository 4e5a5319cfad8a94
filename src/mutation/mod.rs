//! Mutation kinds and the remote endpoint they are applied against.

mod endpoint;
pub mod http;
mod types;

pub use endpoint::{ApplyError, MutationEndpoint};
pub use http::HttpMutationEndpoint;
pub use types::{AvatarUpdate, Mutation, ProfileUpdate, QueuedAction, SettingsUpdate};
