pub mod chat;
pub mod connection;
pub mod control;
pub mod input_budget;
pub mod memory;
pub mod pointer;
pub mod rate_limit;
pub mod surface;
pub mod transport;
pub mod types;

pub use connection::WebRtcTransport;
pub use memory::{MemoryHandle, MemoryTransport};
pub use transport::{Connectivity, Transport, TransportEvent};
pub use types::{ChannelId, ChannelKind, Payload, Role, ServerConfig};
