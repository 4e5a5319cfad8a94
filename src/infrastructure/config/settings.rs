use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Apply attempts before an action is abandoned
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Periodic drain interval in seconds
    #[serde(default = "default_drain_interval")]
    pub drain_interval_secs: u64,
    /// Upper bound for a single remote apply call in seconds
    #[serde(default = "default_apply_timeout")]
    pub apply_timeout_secs: u64,
    /// Key the serialized queue is stored under
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    /// Abandon on the first permanent (4xx-class) failure instead of retrying
    #[serde(default = "default_true")]
    pub abandon_permanent_failures: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_drain_interval() -> u64 {
    60 // 1 minute
}

fn default_apply_timeout() -> u64 {
    30
}

fn default_storage_key() -> String {
    "sync:mutation_queue".to_string()
}

fn default_true() -> bool {
    true
}

impl QueueConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs.max(1))
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Base of the event-stream URL; the session id is appended as a path segment
    #[serde(default = "default_url_base")]
    pub url_base: String,
    /// Consecutive failed reconnects before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0), off by default
    #[serde(default)]
    pub jitter_factor: f64,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Ping interval while connected in seconds (0 disables)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Messages kept while disconnected (0 drops them)
    #[serde(default)]
    pub outbound_buffer: usize,
    /// Session the agent binary connects on startup
    #[serde(default)]
    pub session_id: Option<String>,
}

fn default_url_base() -> String {
    "wss://localhost/ws".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    30_000 // 30 seconds
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_heartbeat_interval() -> u64 {
    30
}

impl RealtimeConfig {
    /// Event-stream address for a session: `<url_base>/<session_id>`
    pub fn session_url(&self, session_id: &str) -> String {
        format!("{}/{}", self.url_base.trim_end_matches('/'), session_id)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs.max(1))
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_endpoint_url")]
    pub base_url: String,
    #[serde(default = "default_endpoint_timeout")]
    pub timeout_secs: u64,
    pub bearer_token: Option<String>,
}

fn default_endpoint_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_endpoint_timeout() -> u64 {
    15
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// "memory", "file" or "sqlite"
    #[serde(default = "default_store_backend")]
    pub backend: String,
    /// Directory for the file backend
    #[serde(default = "default_store_path")]
    pub path: String,
    /// Connection string for the sqlite backend
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

fn default_store_backend() -> String {
    "memory".to_string()
}

fn default_store_path() -> String {
    "data/sync".to_string()
}

fn default_database_url() -> String {
    "sqlite://data/sync.db?mode=rwc".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
    /// Emit log lines as JSON objects instead of human-readable text
    #[serde(default)]
    pub json_logs: bool,
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "sync-resilience".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("queue.max_retries", 3)?
            .set_default("queue.drain_interval_secs", 60)?
            .set_default("realtime.max_reconnect_attempts", 5)?
            .set_default("store.backend", "memory")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SYNC_QUEUE__MAX_RETRIES, SYNC_REALTIME__URL_BASE, SYNC_STORE__BACKEND, ...
            .add_source(
                Environment::with_prefix("SYNC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            drain_interval_secs: default_drain_interval(),
            apply_timeout_secs: default_apply_timeout(),
            storage_key: default_storage_key(),
            abandon_permanent_failures: true,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url_base: default_url_base(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            jitter_factor: 0.0,
            handshake_timeout_secs: default_handshake_timeout(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            outbound_buffer: 0,
            session_id: None,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_endpoint_url(),
            timeout_secs: default_endpoint_timeout(),
            bearer_token: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
            database_url: default_database_url(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
            json_logs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.queue.max_retries, 3);
        assert_eq!(settings.queue.drain_interval(), Duration::from_secs(60));
        assert_eq!(settings.realtime.max_reconnect_attempts, 5);
        assert_eq!(settings.realtime.initial_delay_ms, 1000);
        assert_eq!(settings.realtime.max_delay_ms, 30_000);
        assert_eq!(settings.realtime.outbound_buffer, 0);
        assert_eq!(settings.store.backend, "memory");
    }

    #[test]
    fn test_session_url() {
        let config = RealtimeConfig {
            url_base: "wss://chat.example.com/ws/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.session_url("s1"), "wss://chat.example.com/ws/s1");
    }

    #[test]
    fn test_heartbeat_disabled_at_zero() {
        let config = RealtimeConfig {
            heartbeat_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.heartbeat_interval().is_none());
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let queue: QueueConfig = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(queue.max_retries, 5);
        assert_eq!(queue.drain_interval_secs, 60);
        assert!(queue.abandon_permanent_failures);
    }
}
