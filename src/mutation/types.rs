//! Mutation payloads and the durable queued-action record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Full profile document written on a profile edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

/// User settings document; `values` is stored as-is by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub user_id: String,
    pub values: serde_json::Value,
}

/// Avatar swap: the previous object is deleted before the reference moves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarUpdate {
    pub user_id: String,
    pub avatar_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_avatar_url: Option<String>,
}

/// A write that must reach the remote store.
///
/// Serialized as `{"kind": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum Mutation {
    ProfileUpdate(ProfileUpdate),
    SettingsUpdate(SettingsUpdate),
    AvatarUpdate(AvatarUpdate),
}

impl Mutation {
    /// Kind name, matching the serialized `kind` tag
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::ProfileUpdate(_) => "ProfileUpdate",
            Mutation::SettingsUpdate(_) => "SettingsUpdate",
            Mutation::AvatarUpdate(_) => "AvatarUpdate",
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Mutation::ProfileUpdate(p) => &p.user_id,
            Mutation::SettingsUpdate(s) => &s.user_id,
            Mutation::AvatarUpdate(a) => &a.user_id,
        }
    }
}

/// A pending mutation as persisted in the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAction {
    /// Assigned at enqueue, stable for the action's lifetime
    pub id: Uuid,
    #[serde(flatten)]
    pub mutation: Mutation,
    pub enqueued_at: DateTime<Utc>,
    /// Apply attempts made so far
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueuedAction {
    pub fn new(mutation: Mutation) -> Self {
        Self::with_timestamp(mutation, Utc::now())
    }

    pub fn with_timestamp(mutation: Mutation, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mutation,
            enqueued_at,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.mutation.kind()
    }

    /// Record a failed attempt
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn avatar() -> Mutation {
        Mutation::AvatarUpdate(AvatarUpdate {
            user_id: "u1".to_string(),
            avatar_url: "https://cdn.example.com/a/new.png".to_string(),
            old_avatar_url: Some("https://cdn.example.com/a/old.png".to_string()),
        })
    }

    #[test]
    fn test_queued_action_new() {
        let action = QueuedAction::new(avatar());
        assert!(!action.id.is_nil());
        assert_eq!(action.attempts, 0);
        assert!(action.last_error.is_none());
        assert_eq!(action.kind(), "AvatarUpdate");
        assert_eq!(action.mutation.user_id(), "u1");
    }

    #[test]
    fn test_wire_shape() {
        let action = QueuedAction::new(avatar());
        let value = serde_json::to_value(&action).unwrap();

        assert_eq!(value["kind"], "AvatarUpdate");
        assert_eq!(value["payload"]["userId"], "u1");
        assert_eq!(value["payload"]["oldAvatarUrl"], "https://cdn.example.com/a/old.png");
        assert_eq!(value["attempts"], 0);
        assert!(value.get("enqueuedAt").is_some());
        assert!(value.get("lastError").is_none());
    }

    #[test]
    fn test_deserialize_record_without_optional_fields() {
        let value = json!({
            "id": "6f1c2d34-1111-4a6e-9a8b-0123456789ab",
            "kind": "SettingsUpdate",
            "payload": {"userId": "u9", "values": {"theme": "dark"}},
            "enqueuedAt": "2026-01-01T00:00:00Z"
        });
        let action: QueuedAction = serde_json::from_value(value).unwrap();
        assert_eq!(action.attempts, 0);
        assert_eq!(action.kind(), "SettingsUpdate");
    }

    #[test]
    fn test_record_failure_increments() {
        let mut action = QueuedAction::new(avatar());
        action.record_failure("timeout");
        action.record_failure("503");
        assert_eq!(action.attempts, 2);
        assert_eq!(action.last_error.as_deref(), Some("503"));
    }
}
