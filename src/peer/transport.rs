//! What the session needs from a peer-to-peer transport.
//!
//! The transport owns the NAT traversal, DTLS and SCTP plumbing; the session only drives
//! it through [`Transport`] and consumes the [`TransportEvent`]s it pushes into the
//! channel it was constructed with. Events for a single data channel arrive in order.

use crate::error::TransportError;
use crate::peer::types::{ChannelId, ChannelKind, Payload, Role};
use crate::signaling::SessionDescription;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The peer opened a data channel. Nothing from it reaches the session until accepted.
    IncomingChannel { id: ChannelId, label: String },
    ChannelOpen { id: ChannelId },
    ChannelClosed { id: ChannelId },
    Message { id: ChannelId, payload: Payload },
    Connectivity(Connectivity),
    /// Local candidate discovered (trickle); informational only.
    LocalCandidate(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Creates a fresh peer connection, dropping any previous one.
    async fn start(&mut self, role: Role) -> Result<(), TransportError>;

    /// Opens a locally-initiated data channel. Only the initiator calls this.
    async fn create_channel(&mut self, kind: ChannelKind) -> Result<ChannelId, TransportError>;

    /// Generates an offer (initiator) or answer (responder), sets it locally and
    /// starts ICE gathering. The result is read back via [`Transport::local_description`].
    async fn create_local_description(&mut self, role: Role) -> Result<(), TransportError>;

    /// Flips to true once ICE gathering has finished for the current local description.
    fn gathering_complete(&self) -> bool;

    /// Current local description, including every candidate gathered so far.
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn apply_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), TransportError>;

    /// Closes and forgets a channel; further events for it are not delivered.
    async fn close_channel(&mut self, id: ChannelId);

    async fn send(&self, id: ChannelId, payload: Payload) -> Result<(), TransportError>;

    /// Tears down the peer connection. Must be safe to call when not started.
    async fn close(&mut self);
}
