// Infrastructure layer (shared components)
pub mod infrastructure;

// Re-export infrastructure modules at the crate root
pub use infrastructure::backoff;
pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;

// Resilience components
pub mod connectivity;
pub mod mutation;
pub mod queue;
pub mod realtime;
pub mod store;

// Composition root
pub mod runtime;

// Supporting modules
pub mod shutdown;
pub mod tasks;
pub mod telemetry;
