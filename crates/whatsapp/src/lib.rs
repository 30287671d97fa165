pub mod outbox;
pub mod session;
pub mod transport;

pub use outbox::{Outbox, OutboxConfig};
pub use session::SessionJanitor;
pub use transport::{
    ChatTransport, ConnectionManager, ConnectionState, InboundMessage, NoopChatTransport,
    ReconnectPolicy, StartupPolicy, StatusHandle, TransportError, TransportEvent, TransportStatus,
};
