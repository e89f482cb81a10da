pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use commands::{spawn_session, SessionHandle, SessionSnapshot};
pub use config::SessionConfig;
pub use error::{Result, SessionError, SignalError, StateError, TransportError};
pub use events::{EventSink, MessageOrigin, Notice, RemoteControlState, SessionEvent};
pub use session::{Session, SessionState};
pub use signaling::{SdpKind, SessionDescription};
