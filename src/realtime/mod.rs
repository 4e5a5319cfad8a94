//! Live event-stream connection with automatic reconnect.

mod manager;
pub mod message;
mod registry;
pub mod transport;

pub use manager::{ConnectionState, RealtimeError, RealtimeManager, SendStatus};
pub use message::{
    ChatMessage, ClientMessage, EventKind, InboundError, NotificationPayload, PresenceStatus,
    PresenceUpdate, ReactionUpdate, RealtimeEvent, ServerEvent, TypingIndicator,
};
pub use registry::{Handler, HandlerId, HandlerRegistry};
pub use transport::{Connector, FrameSink, FrameStream, TransportError, WebSocketConnector};
