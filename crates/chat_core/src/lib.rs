pub mod api;
pub mod client;
pub mod connection;
pub mod error;
pub mod presence;
pub mod registry;
pub mod session;
pub mod status;
pub mod transport;

pub use api::{ConversationApi, HttpConversationApi, MissingConversationApi};
pub use client::{ChangeEvent, ChatClient, ClientConfig};
pub use connection::{
    ChannelEvent, ConnectionManager, ConnectionSnapshot, ConnectionState, ReconnectPolicy,
};
pub use error::{ConnectError, ConnectFailure, SendError, TransportError};
pub use presence::PresenceTracker;
pub use registry::{Conversation, ConversationRegistry};
pub use session::{ChatSession, Delivery, Message};
pub use status::{StatusPresenter, StatusView};
pub use transport::{Transport, TransportChannel, WsTransport};
