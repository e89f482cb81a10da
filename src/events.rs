//! Events the session reports to whatever renders it.

use crate::peer::transport::Connectivity;
use crate::peer::types::ChannelKind;
use crate::session::SessionState;
use crate::signaling::SdpKind;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageOrigin {
    Local,
    Remote,
}

/// Both control directions, reported together so a UI never shows one stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RemoteControlState {
    /// The peer lets us drive their shared screen.
    pub granted_to_me: bool,
    /// We let the peer drive ours.
    pub allowed_to_peer: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SessionEvent {
    ConnectionStatusChanged {
        state: SessionState,
        connectivity: Connectivity,
    },
    ChannelStatusChanged {
        channel: ChannelKind,
        open: bool,
    },
    /// Final local signal, ready to be copied to the peer.
    LocalDescriptionReady {
        kind: SdpKind,
        text: String,
    },
    MessageReceived {
        text: String,
        origin: MessageOrigin,
    },
    SystemNotice {
        notice: Notice,
        text: String,
    },
    RemoteControlStateChanged(RemoteControlState),
    /// Where the peer's pointer is on our screen, in percent of the viewport.
    PointerOverlayChanged {
        visible: bool,
        x: f64,
        y: f64,
    },
    DraftChanged {
        text: String,
    },
    /// A remote click landed on the message input; the UI should focus it.
    InputFocused,
}

impl SessionEvent {
    pub fn notice(notice: Notice) -> Self {
        let text = notice.to_string();
        SessionEvent::SystemNotice { notice, text }
    }
}

/// User-facing notices. Recoverable conditions only; nothing here ends a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "camelCase")]
pub enum Notice {
    NonTextBlocked,
    MessageTooLong { max: usize },
    MessageInputTooLong { max: usize, current: usize },
    RateLimited,
    ChannelBlocked { label: String },
    CreateOfferFailed,
    CreateAnswerFailed,
    GatheringSlow,
    RemoteEmpty,
    RemoteInvalidJson,
    RemoteMissingData,
    RemoteApplyFailed,
    RemoteApplied { kind: SdpKind },
    NeedOfferForAnswer,
    Disconnected,
    ChatCleared,
    ConnectionProblem,
    ConnectionRecovered,
    ConnectionFailed,
    ControlPayloadTooLarge,
    ControlRateLimited,
    PeerEnabledControl,
    PeerDisabledControl,
    ControlDeliveryFailed,
    TypingDisabled,
    ControlUnavailable,
    RequiresScreenShare,
    PeerCanControl,
    ControlRevokedLocal,
    DisabledOnScreenStop,
    RevokeFailed,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::NonTextBlocked => write!(f, "Security notice: blocked a non-text message."),
            Notice::MessageTooLong { max } => {
                write!(f, "Message blocked: exceeds the {max} character limit.")
            }
            Notice::MessageInputTooLong { max, current } => write!(
                f,
                "Message too long: limit {max} characters (currently {current})."
            ),
            Notice::RateLimited => {
                write!(f, "Rate limit active: peer is sending messages too quickly.")
            }
            Notice::ChannelBlocked { label } => {
                let label = if label.is_empty() { "unnamed" } else { label };
                write!(f, "Security notice: blocked unexpected data channel \"{label}\".")
            }
            Notice::CreateOfferFailed => write!(
                f,
                "Could not create an offer. Check network permissions and WebRTC support."
            ),
            Notice::CreateAnswerFailed => write!(
                f,
                "Could not create an answer. Apply a valid offer first and check WebRTC support."
            ),
            Notice::GatheringSlow => write!(
                f,
                "Still collecting network candidates. Slow STUN/TURN servers can delay the signal."
            ),
            Notice::RemoteEmpty => write!(f, "Remote signal is empty. Paste the JSON you received."),
            Notice::RemoteInvalidJson => write!(
                f,
                "Remote signal is not valid JSON. Copy the complete signal again."
            ),
            Notice::RemoteMissingData => write!(
                f,
                "Remote signal is missing required data. Make sure the offer or answer was pasted unchanged."
            ),
            Notice::RemoteApplyFailed => {
                write!(f, "Remote signal could not be applied to this session.")
            }
            Notice::RemoteApplied { kind } => write!(f, "Remote {kind} applied."),
            Notice::NeedOfferForAnswer => {
                write!(f, "An offer is required before an answer can be created.")
            }
            Notice::Disconnected => write!(
                f,
                "Disconnected. Create a new offer to connect again."
            ),
            Notice::ChatCleared => write!(f, "Chat history cleared."),
            Notice::ConnectionProblem => write!(f, "Connection problems detected, trying to recover..."),
            Notice::ConnectionRecovered => write!(f, "Connection recovered."),
            Notice::ConnectionFailed => write!(f, "Connection could not be recovered."),
            Notice::ControlPayloadTooLarge => {
                write!(f, "Remote control message ignored: payload too large.")
            }
            Notice::ControlRateLimited => {
                write!(f, "Remote control channel throttled: too many inputs.")
            }
            Notice::PeerEnabledControl => write!(
                f,
                "Peer allowed remote control. Use the preview to interact."
            ),
            Notice::PeerDisabledControl => write!(f, "Peer disabled remote control."),
            Notice::ControlDeliveryFailed => write!(
                f,
                "Remote control message could not be delivered. Check the connection."
            ),
            Notice::TypingDisabled => write!(f, "Remote typing disabled: input limit reached."),
            Notice::ControlUnavailable => write!(
                f,
                "Remote control is only possible once the control channel is ready."
            ),
            Notice::RequiresScreenShare => write!(
                f,
                "Start screen sharing first to enable remote control."
            ),
            Notice::PeerCanControl => write!(
                f,
                "Your peer can now control your screen. Keep an eye on the activity."
            ),
            Notice::ControlRevokedLocal => write!(f, "Remote control of your screen has ended."),
            Notice::DisabledOnScreenStop => write!(
                f,
                "Remote control disabled because screen sharing stopped."
            ),
            Notice::RevokeFailed => {
                write!(f, "Could not notify the peer that remote control ended.")
            }
        }
    }
}

/// Receiver side of [`SessionEvent`]s.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

impl EventSink for mpsc::UnboundedSender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        // a dropped receiver just means nobody is watching any more
        let _ = self.send(event);
    }
}

#[cfg(feature = "tauri")]
impl EventSink for tauri::AppHandle {
    fn emit(&self, event: SessionEvent) {
        use tauri::Emitter;
        if let Err(e) = Emitter::emit(self, "peerlink-event", &event) {
            tracing::warn!("failed to emit event to frontend: {e:?}");
        }
    }
}
