//! Error taxonomy for the session layer.
//!
//! Nothing here is fatal to a session: every variant is reported to the caller of the
//! failing command (and usually mirrored as a [`Notice`](crate::events::Notice)),
//! after which the session stays usable.

use thiserror::Error;

/// Why a pasted session description was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("remote signal is empty")]
    Empty,
    #[error("remote signal is malformed: {0}")]
    MalformedJson(String),
    #[error("remote signal is missing data: {0}")]
    MissingFields(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is not started")]
    NotStarted,
    #[error("channel is not open")]
    ChannelNotOpen,
    #[error("failed to create local description: {0}")]
    Description(String),
    #[error("failed to apply remote description: {0}")]
    RemoteDescription(String),
    #[error("failed to create data channel: {0}")]
    Channel(String),
    #[error("send failed: {0}")]
    Send(String),
}

/// A command issued in a state that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("another negotiation step is still in progress")]
    Busy,
    #[error("an offer must be applied before creating an answer")]
    NeedOfferForAnswer,
    #[error("received an answer without a local offer")]
    UnexpectedAnswer,
    #[error("a negotiation is already underway; disconnect first")]
    AlreadyNegotiating,
    #[error("control channel is not open")]
    ControlUnavailable,
    #[error("screen sharing must be active to allow remote control")]
    ScreenShareInactive,
    #[error("peer has not granted remote control")]
    NotPermitted,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("invalid remote description: {0}")]
    InvalidRemoteDescription(#[from] SignalError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("rate limited")]
    RateLimited,
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("session task has stopped")]
    Stopped,
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
