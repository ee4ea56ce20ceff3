pub mod realtime;

pub use realtime::{
    ConnectionState, ConversationEntry, EndpointConfig, RealtimeConfig, RealtimeError,
    RealtimeResult, SessionController, SessionUpdate, TransportKind,
};
