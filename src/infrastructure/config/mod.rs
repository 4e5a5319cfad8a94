mod settings;

pub use settings::{
    EndpointConfig, OtelConfig, QueueConfig, RealtimeConfig, Settings, StoreConfig,
};
