//! Connection state machine and protocol dispatch for one peer-to-peer session.
//!
//! `Session` owns every piece of mutable protocol state (rate windows, permissions,
//! input budget, pointer scheduling) and is driven from a single task: commands,
//! transport events and timer ticks all arrive through `&mut self`.
//!
//! ```text
//! Idle -> GatheringLocal -> LocalReady -> RemoteApplied -> Connected -> Closed
//!   \-- apply offer --> RemoteApplied -> GatheringLocal -> LocalReady -> Connected
//! ```

use crate::config::SessionConfig;
use crate::error::{Result, SessionError, SignalError, StateError, TransportError};
use crate::events::{EventSink, MessageOrigin, Notice, RemoteControlState, SessionEvent};
use crate::logger::{analyze_candidates, dump_candidate, log_connectivity};
use crate::peer::chat::{ChatChannel, ChatInbound, ChatOutbound};
use crate::peer::control::{
    ControlChannel, ControlInbound, ControlMessage, KeyboardMode, PointerButton, PointerKind,
    TextAdmission, ACTION_CLEAR_INPUT,
};
use crate::peer::pointer::PointerScheduler;
use crate::peer::surface::{resolve_click, ClickOutcome, ControlSurface};
use crate::peer::transport::{Connectivity, Transport, TransportEvent};
use crate::peer::types::{ChannelId, ChannelKind, Payload, Role};
use crate::signaling::{self, SdpKind, SessionDescription};
use crate::utils::{strip_control_chars, truncate_units};
use serde::Serialize;
use std::collections::HashMap;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    GatheringLocal,
    LocalReady,
    RemoteApplied,
    Connected,
    Closed,
}

/// The peer's pointer as drawn over our screen.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointerOverlay {
    pub visible: bool,
    pub x: f64,
    pub y: f64,
    hide_at: Option<Instant>,
}

pub struct Session<T: Transport> {
    config: SessionConfig,
    transport: T,
    sink: Box<dyn EventSink>,
    surface: Box<dyn ControlSurface>,

    state: SessionState,
    connectivity: Connectivity,
    role: Option<Role>,
    session_id: Option<String>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    busy: bool,
    /// When a still-running gathering gets reported as slow. Cleared once reported.
    gathering_slow_at: Option<Instant>,
    next_gathering_poll: Option<Instant>,
    grace_deadline: Option<Instant>,

    channels: HashMap<ChannelId, ChannelKind>,
    chat: ChatChannel,
    control: ControlChannel,
    pointer: PointerScheduler,
    overlay: PointerOverlay,
    screen_sharing: bool,
    draft: String,
}

impl<T: Transport> Session<T> {
    pub fn new(
        transport: T,
        sink: impl EventSink + 'static,
        surface: impl ControlSurface + 'static,
        config: SessionConfig,
    ) -> Self {
        Self {
            chat: ChatChannel::new(config.chat.clone()),
            control: ControlChannel::new(config.control.clone()),
            pointer: PointerScheduler::new(config.timing.pointer_frame()),
            config,
            transport,
            sink: Box::new(sink),
            surface: Box::new(surface),
            state: SessionState::Idle,
            connectivity: Connectivity::New,
            role: None,
            session_id: None,
            local: None,
            remote: None,
            busy: false,
            gathering_slow_at: None,
            next_gathering_poll: None,
            grace_deadline: None,
            channels: HashMap::new(),
            overlay: PointerOverlay::default(),
            screen_sharing: false,
            draft: String::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote.as_ref()
    }

    pub fn chat_open(&self) -> bool {
        self.chat.is_open()
    }

    pub fn control_open(&self) -> bool {
        self.control.is_open()
    }

    pub fn remote_control(&self) -> RemoteControlState {
        RemoteControlState {
            granted_to_me: self.control.permission_granted(),
            allowed_to_peer: self.control.permission_allowed_to_peer(),
        }
    }

    pub fn input_budget_remaining(&self) -> usize {
        self.control.budget().remaining()
    }

    pub fn overlay(&self) -> PointerOverlay {
        self.overlay
    }

    pub fn pointer_frame_pending(&self) -> bool {
        self.pointer.has_pending_frame()
    }

    pub fn screen_sharing(&self) -> bool {
        self.screen_sharing
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn open_channels(&self) -> usize {
        self.channels.len()
    }

    /// Verification code, available once both descriptions are known.
    pub fn fingerprint(&self) -> Option<String> {
        match (&self.local, &self.remote) {
            (Some(local), Some(remote)) => signaling::fingerprint(local, remote),
            _ => None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn emit(&self, event: SessionEvent) {
        self.sink.emit(event);
    }

    fn notice(&self, notice: Notice) {
        debug!("notice: {notice}");
        self.emit(SessionEvent::notice(notice));
    }

    fn emit_status(&self) {
        self.emit(SessionEvent::ConnectionStatusChanged {
            state: self.state,
            connectivity: self.connectivity,
        });
    }

    fn emit_control_state(&self) {
        self.emit(SessionEvent::RemoteControlStateChanged(self.remote_control()));
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("session state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.emit_status();
        }
    }

    fn channel_id(&self, kind: ChannelKind) -> Option<ChannelId> {
        self.channels
            .iter()
            .find(|(_, k)| **k == kind)
            .map(|(id, _)| *id)
    }

    // ── negotiation ────────────────────────────────────────────────

    /// Starts a new session as initiator. Both channels are created before the offer
    /// so it announces them; the offer itself is published once gathering completes.
    pub async fn create_offer(&mut self) -> Result<()> {
        if self.busy {
            return Err(StateError::Busy.into());
        }
        if !matches!(self.state, SessionState::Idle | SessionState::Closed) {
            return Err(StateError::AlreadyNegotiating.into());
        }
        info!("creating offer");
        self.busy = true;
        // a torn-down session may still hold the old attempt's channels
        self.reset_negotiation();

        match self.begin_offer().await {
            Ok(()) => {
                self.role = Some(Role::Initiator);
                self.begin_gathering();
                Ok(())
            }
            Err(e) => {
                self.abort_negotiation(Role::Initiator, &e).await;
                Err(e.into())
            }
        }
    }

    async fn begin_offer(&mut self) -> Result<(), TransportError> {
        self.transport.start(Role::Initiator).await?;
        // channels first, so the offer declares them
        for kind in ChannelKind::ALL {
            let id = self.transport.create_channel(kind).await?;
            self.channels.insert(id, kind);
        }
        self.transport.create_local_description(Role::Initiator).await
    }

    /// Creates the answer for an applied offer. `remote`, when given, is validated and
    /// applied first, unless an offer is already in place.
    pub async fn create_answer(&mut self, remote: Option<&str>) -> Result<()> {
        if self.busy {
            return Err(StateError::Busy.into());
        }
        // an offer applied earlier wins over text pasted again
        let offer_applied =
            self.role == Some(Role::Responder) && self.state == SessionState::RemoteApplied;

        if let Some(text) = remote.filter(|t| !t.trim().is_empty()) {
            if !offer_applied {
                // pasting an answer here is a user mix-up, not a parse error
                if let Ok(desc) = SessionDescription::parse(text) {
                    if desc.kind == SdpKind::Answer {
                        self.notice(Notice::NeedOfferForAnswer);
                        return Err(StateError::NeedOfferForAnswer.into());
                    }
                }
                self.apply_remote_description(text).await?;
            }
        }

        if self.role != Some(Role::Responder) || self.state != SessionState::RemoteApplied {
            self.notice(Notice::NeedOfferForAnswer);
            return Err(StateError::NeedOfferForAnswer.into());
        }

        info!("creating answer");
        self.busy = true;
        // the responder's channels arrive through on_data_channel
        match self
            .transport
            .create_local_description(Role::Responder)
            .await
        {
            Ok(()) => {
                self.begin_gathering();
                Ok(())
            }
            Err(e) => {
                self.abort_negotiation(Role::Responder, &e).await;
                Err(e.into())
            }
        }
    }

    fn begin_gathering(&mut self) {
        let now = Instant::now();
        // first poll right away, the transport may already be done
        self.gathering_slow_at = now.checked_add(self.config.timing.gathering_slow());
        self.next_gathering_poll = Some(now);
        self.set_state(SessionState::GatheringLocal);
    }

    /// Publishes the local description once gathering has completed.
    ///
    /// Returns `Ok(None)` while still gathering. There is no timeout: a slow run is
    /// reported once and polling continues until it completes or the session is torn down.
    pub async fn poll_gathering(&mut self, now: Instant) -> Result<Option<SessionDescription>> {
        if self.state != SessionState::GatheringLocal {
            self.next_gathering_poll = None;
            return Ok(None);
        }
        let role = self.role.unwrap_or(Role::Initiator);

        if self.transport.gathering_complete() {
            let Some(desc) = self.transport.local_description().await else {
                let err = TransportError::Description("no local description after gathering".into());
                self.abort_negotiation(role, &err).await;
                return Err(err.into());
            };
            let desc = desc.stamped(self.session_id.clone());
            analyze_candidates(&desc.sdp);
            info!("local {} ready ({} bytes)", desc.kind, desc.sdp.len());

            self.session_id = desc.id.clone();
            self.local = Some(desc.clone());
            self.busy = false;
            self.gathering_slow_at = None;
            self.next_gathering_poll = None;
            self.emit(SessionEvent::LocalDescriptionReady {
                kind: desc.kind,
                text: desc.encode(),
            });
            self.set_state(SessionState::LocalReady);
            return Ok(Some(desc));
        }

        // still gathering: say so once, then keep waiting
        if self.gathering_slow_at.is_some_and(|t| t <= now) {
            self.gathering_slow_at = None;
            warn!(
                "ICE gathering still running after {} ms, waiting on",
                self.config.timing.gathering_slow_ms
            );
            self.notice(Notice::GatheringSlow);
        }

        self.next_gathering_poll = now.checked_add(self.config.timing.gathering_poll());
        Ok(None)
    }

    /// Suspends until the local description is final. Other work on this session waits
    /// meanwhile; the actor in `commands` polls instead so the UI stays live.
    pub async fn wait_for_local_description(&mut self) -> Result<SessionDescription> {
        loop {
            if let Some(desc) = self.poll_gathering(Instant::now()).await? {
                return Ok(desc);
            }
            if self.state != SessionState::GatheringLocal {
                return Err(TransportError::NotStarted.into());
            }
            sleep(self.config.timing.gathering_poll()).await;
        }
    }

    /// Validates and applies a pasted offer or answer.
    pub async fn apply_remote_description(&mut self, text: &str) -> Result<SdpKind> {
        if self.busy {
            return Err(StateError::Busy.into());
        }
        let desc = match SessionDescription::parse(text) {
            Ok(desc) => desc,
            Err(e) => {
                warn!("rejected remote signal: {e}");
                self.notice(match e {
                    SignalError::Empty => Notice::RemoteEmpty,
                    SignalError::MalformedJson(_) => Notice::RemoteInvalidJson,
                    SignalError::MissingFields(_) => Notice::RemoteMissingData,
                });
                return Err(e.into());
            }
        };

        // the kind decides the role: offer -> responder, answer -> initiator
        let kind = desc.kind;
        match kind {
            SdpKind::Offer => self.apply_remote_offer(desc).await?,
            SdpKind::Answer => self.apply_remote_answer(desc).await?,
        }
        Ok(kind)
    }

    async fn apply_remote_offer(&mut self, desc: SessionDescription) -> Result<()> {
        if !matches!(self.state, SessionState::Idle | SessionState::Closed) {
            self.notice(Notice::RemoteApplyFailed);
            return Err(StateError::AlreadyNegotiating.into());
        }
        self.busy = true;
        self.reset_negotiation();

        // fresh peer connection for every offer
        let applied = match self.transport.start(Role::Responder).await {
            Ok(()) => self.transport.apply_remote_description(&desc).await,
            Err(e) => Err(e),
        };
        if let Err(e) = applied {
            warn!("failed to apply remote offer: {e}");
            self.transport.close().await;
            self.busy = false;
            self.set_state(SessionState::Idle);
            self.notice(Notice::RemoteApplyFailed);
            return Err(e.into());
        }

        info!("remote offer applied");
        self.role = Some(Role::Responder);
        self.session_id = desc.id.clone();
        self.remote = Some(desc);
        self.busy = false;
        self.notice(Notice::RemoteApplied {
            kind: SdpKind::Offer,
        });
        self.set_state(SessionState::RemoteApplied);
        Ok(())
    }

    async fn apply_remote_answer(&mut self, desc: SessionDescription) -> Result<()> {
        // only an initiator whose offer is out may take an answer
        if self.role != Some(Role::Initiator) || self.state != SessionState::LocalReady {
            self.notice(Notice::RemoteApplyFailed);
            return Err(StateError::UnexpectedAnswer.into());
        }
        self.busy = true;
        let applied = self.transport.apply_remote_description(&desc).await;
        self.busy = false;
        if let Err(e) = applied {
            warn!("failed to apply remote answer: {e}");
            self.notice(Notice::RemoteApplyFailed);
            return Err(e.into());
        }

        info!("remote answer applied");
        self.remote = Some(desc);
        self.notice(Notice::RemoteApplied {
            kind: SdpKind::Answer,
        });
        self.set_state(SessionState::RemoteApplied);
        Ok(())
    }

    /// Clears per-attempt negotiation state before a new offer/answer.
    fn reset_negotiation(&mut self) {
        self.reset_protocol_state();
        self.channels.clear();
        self.role = None;
        self.session_id = None;
        self.local = None;
        self.remote = None;
        self.gathering_slow_at = None;
        self.next_gathering_poll = None;
        self.grace_deadline = None;
        self.connectivity = Connectivity::New;
    }

    /// A failed offer/answer leaves the session idle and retryable.
    async fn abort_negotiation(&mut self, role: Role, err: &TransportError) {
        warn!("negotiation as {role:?} failed: {err}");
        self.transport.close().await;
        self.reset_negotiation();
        self.busy = false;
        self.set_state(SessionState::Idle);
        self.notice(match role {
            Role::Initiator => Notice::CreateOfferFailed,
            Role::Responder => Notice::CreateAnswerFailed,
        });
    }

    // ── teardown ───────────────────────────────────────────────────

    /// Closes both channels, releases the transport and clears all protocol state.
    /// Calling it again once closed does nothing.
    pub async fn disconnect(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        info!("disconnecting");
        self.teardown().await;
        self.notice(Notice::Disconnected);
    }

    async fn teardown(&mut self) {
        let was_open: Vec<ChannelKind> = ChannelKind::ALL
            .into_iter()
            .filter(|k| match k {
                ChannelKind::Chat => self.chat.is_open(),
                ChannelKind::Control => self.control.is_open(),
            })
            .collect();
        let had_control = self.remote_control() != RemoteControlState::default();

        // channels first, then the connection underneath them
        let ids: Vec<ChannelId> = self.channels.drain().map(|(id, _)| id).collect();
        for id in ids {
            self.transport.close_channel(id).await;
        }
        self.transport.close().await;

        self.reset_negotiation();
        self.busy = false;
        self.screen_sharing = false;
        self.connectivity = Connectivity::Closed;

        for channel in was_open {
            self.emit(SessionEvent::ChannelStatusChanged {
                channel,
                open: false,
            });
        }
        if had_control {
            self.emit_control_state();
        }
        self.set_state(SessionState::Closed);
    }

    /// Per-connection protocol state: rate windows, permissions, budget, pointer.
    fn reset_protocol_state(&mut self) {
        self.chat.on_close();
        self.control.on_close();
        self.pointer.cancel();
        self.hide_overlay();
    }

    // ── transport events ───────────────────────────────────────────

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        let now = Instant::now();
        match event {
            TransportEvent::Connectivity(state) => self.on_connectivity(state, now).await,
            TransportEvent::LocalCandidate(candidate) => dump_candidate("LOCAL", &candidate),
            _ if matches!(self.state, SessionState::Idle | SessionState::Closed) => {
                debug!("ignoring transport event without a session: {event:?}");
            }
            TransportEvent::IncomingChannel { id, label } => self.on_incoming_channel(id, label).await,
            TransportEvent::ChannelOpen { id } => self.on_channel_open(id),
            TransportEvent::ChannelClosed { id } => self.on_channel_closed(id),
            TransportEvent::Message { id, payload } => match self.channels.get(&id).copied() {
                Some(ChannelKind::Chat) => self.on_chat_frame(payload, now),
                Some(ChannelKind::Control) => self.on_control_frame(payload, now).await,
                None => debug!(
                    "{}",
                    SessionError::ProtocolViolation(format!("frame on unaccepted channel {id:?}"))
                ),
            },
        }
    }

    async fn on_incoming_channel(&mut self, id: ChannelId, label: String) {
        // exact label match, and at most one channel per kind
        match ChannelKind::from_label(&label) {
            Some(kind) if self.channel_id(kind).is_none() => {
                // the id is remembered; open/close follow as separate events
                debug!("accepted incoming {kind} channel");
                self.channels.insert(id, kind);
            }
            _ => {
                let violation = SessionError::ProtocolViolation(format!("unexpected data channel {label:?}"));
                warn!("{violation}, closing it");
                self.transport.close_channel(id).await;
                self.notice(Notice::ChannelBlocked { label });
            }
        }
    }

    fn on_channel_open(&mut self, id: ChannelId) {
        let Some(kind) = self.channels.get(&id).copied() else {
            return;
        };
        info!("{kind} channel open");
        match kind {
            ChannelKind::Chat => self.chat.on_open(),
            ChannelKind::Control => self.control.on_open(),
        }
        self.emit(SessionEvent::ChannelStatusChanged {
            channel: kind,
            open: true,
        });
        // first open channel means the peers can talk
        if self.state != SessionState::Connected {
            self.busy = false;
            self.set_state(SessionState::Connected);
        }
    }

    fn on_channel_closed(&mut self, id: ChannelId) {
        let Some(kind) = self.channels.remove(&id) else {
            return;
        };
        info!("{kind} channel closed");
        match kind {
            ChannelKind::Chat => self.chat.on_close(),
            ChannelKind::Control => {
                let had_control = self.remote_control() != RemoteControlState::default();
                self.control.on_close();
                self.pointer.cancel();
                self.hide_overlay();
                if had_control {
                    self.emit_control_state();
                }
            }
        }
        self.emit(SessionEvent::ChannelStatusChanged {
            channel: kind,
            open: false,
        });
    }

    async fn on_connectivity(&mut self, state: Connectivity, now: Instant) {
        if state == self.connectivity {
            return;
        }
        log_connectivity(state);
        self.connectivity = state;
        self.emit_status();

        match state {
            Connectivity::Connected => {
                if self.grace_deadline.take().is_some() {
                    self.notice(Notice::ConnectionRecovered);
                }
            }
            Connectivity::Disconnected | Connectivity::Failed => {
                if self.grace_deadline.is_none() {
                    // no deadline if it cannot be represented: the grace never runs out
                    self.grace_deadline = now.checked_add(self.config.timing.grace_period());
                    self.notice(Notice::ConnectionProblem);
                }
            }
            Connectivity::Closed => {
                if !matches!(self.state, SessionState::Idle | SessionState::Closed) {
                    warn!("transport closed underneath the session");
                    self.teardown().await;
                    self.notice(Notice::Disconnected);
                }
            }
            Connectivity::New | Connectivity::Connecting => {}
        }
    }

    // ── timers ─────────────────────────────────────────────────────

    /// Earliest instant at which [`Session::on_timer`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.next_gathering_poll,
            self.pointer.next_deadline(),
            self.overlay.hide_at,
            self.grace_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Runs whatever is due. Returns the outcome of gathering if it finished on this tick.
    pub async fn on_timer(&mut self, now: Instant) -> Option<Result<SessionDescription>> {
        let mut gathered = None;
        if self.next_gathering_poll.is_some_and(|t| t <= now) {
            gathered = self.poll_gathering(now).await.transpose();
        }

        if let Some((x, y)) = self.pointer.fire(now) {
            let msg = ControlMessage::Pointer {
                kind: PointerKind::Move,
                x,
                y,
                button: None,
            };
            let _ = self.send_control(&msg).await;
        }

        if self.overlay.hide_at.is_some_and(|t| t <= now) {
            self.hide_overlay();
        }

        if self.grace_deadline.is_some_and(|t| t <= now) {
            self.grace_deadline = None;
            if self.connectivity != Connectivity::Connected {
                warn!("connection did not recover within the grace period");
                self.notice(Notice::ConnectionFailed);
            }
        }
        gathered
    }

    // ── chat ───────────────────────────────────────────────────────

    fn on_chat_frame(&mut self, payload: Payload, now: Instant) {
        match self.chat.receive(payload, now) {
            ChatInbound::Accepted(text) => {
                debug!("chat message received ({} bytes)", text.len());
                self.emit(SessionEvent::MessageReceived {
                    text,
                    origin: MessageOrigin::Remote,
                });
            }
            ChatInbound::Rejected(Some(Notice::RateLimited)) => {
                debug!("chat frame dropped: {}", SessionError::RateLimited);
                self.notice(Notice::RateLimited);
            }
            ChatInbound::Rejected(Some(notice)) => self.notice(notice),
            ChatInbound::Rejected(None) => {}
        }
    }

    /// Sends one chat message. `Ok(false)` means there was nothing to send.
    pub async fn send_chat_message(&mut self, text: &str) -> Result<bool> {
        let message = match self.chat.prepare_send(text) {
            ChatOutbound::Send(message) => message,
            ChatOutbound::Ignored => return Ok(false),
            ChatOutbound::Rejected(notice) => {
                let reason = notice.to_string();
                self.notice(notice);
                return Err(SessionError::Validation(reason));
            }
        };
        let id = self
            .channel_id(ChannelKind::Chat)
            .ok_or(TransportError::ChannelNotOpen)?;
        self.transport
            .send(id, Payload::Text(message.clone()))
            .await?;
        self.emit(SessionEvent::MessageReceived {
            text: message,
            origin: MessageOrigin::Local,
        });
        Ok(true)
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Sends the draft and clears it on success.
    pub async fn send_draft(&mut self) -> Result<bool> {
        let draft = self.draft.clone();
        let sent = self.send_chat_message(&draft).await?;
        if sent {
            self.draft.clear();
            self.emit_draft();
        }
        Ok(sent)
    }

    pub fn clear_chat(&self) {
        self.notice(Notice::ChatCleared);
    }

    fn emit_draft(&self) {
        self.emit(SessionEvent::DraftChanged {
            text: self.draft.clone(),
        });
    }

    // ── control: inbound ───────────────────────────────────────────

    async fn on_control_frame(&mut self, payload: Payload, now: Instant) {
        match self.control.receive(payload, now) {
            ControlInbound::Message(msg) => self.dispatch_control(msg, now).await,
            ControlInbound::Dropped(Some(notice)) => self.notice(notice),
            ControlInbound::Dropped(None) => {}
        }
    }

    async fn dispatch_control(&mut self, msg: ControlMessage, now: Instant) {
        match msg {
            ControlMessage::Permission { allowed } => {
                if self.control.set_permission_granted(allowed) {
                    info!("peer {} remote control", if allowed { "granted" } else { "revoked" });
                    self.notice(if allowed {
                        Notice::PeerEnabledControl
                    } else {
                        Notice::PeerDisabledControl
                    });
                    self.emit_control_state();
                }
                // our grant is gone: drop the pending frame and tell the peer to hide
                // our pointer (once). Their pointer on our screen is unaffected.
                if !allowed {
                    self.pointer_leave().await;
                }
            }
            ControlMessage::Pointer { kind, x, y, button } => {
                if !self.control.permission_allowed_to_peer() {
                    debug!("ignoring pointer input without permission");
                    return;
                }
                self.show_overlay(x, y, now);
                // clicks never act on anything but the message input
                if kind == PointerKind::Click {
                    if resolve_click(&*self.surface, x, y, button) == ClickOutcome::FocusInput {
                        self.emit(SessionEvent::InputFocused);
                    }
                }
            }
            ControlMessage::PointerVisibility { visible } => {
                if !visible {
                    self.hide_overlay();
                }
            }
            ControlMessage::Keyboard { mode, value } => {
                if !self.control.permission_allowed_to_peer() {
                    debug!("ignoring keyboard input without permission");
                    return;
                }
                match mode {
                    KeyboardMode::Text => {
                        // sanitised, capped and charged against the budget in one go
                        let value = value.unwrap_or_default();
                        match self.control.admit_text(&value) {
                            TextAdmission::Insert(text) => {
                                self.draft.push_str(&text);
                                self.emit_draft();
                            }
                            TextAdmission::Empty => {}
                            TextAdmission::Exhausted => self.revoke_for_exhausted_budget().await,
                        }
                    }
                    KeyboardMode::Backspace => {
                        if self.draft.pop().is_some() {
                            self.emit_draft();
                        }
                    }
                    KeyboardMode::Enter => {
                        if let Err(e) = self.send_draft().await {
                            debug!("remote enter could not send draft: {e}");
                        }
                    }
                }
            }
            ControlMessage::Action { action } => {
                if !self.control.permission_allowed_to_peer() {
                    return;
                }
                if action == ACTION_CLEAR_INPUT {
                    self.draft.clear();
                    self.emit_draft();
                } else {
                    debug!("ignoring unknown control action {action:?}");
                }
            }
            ControlMessage::Unknown => debug!("ignoring control message of unknown type"),
        }
    }

    async fn revoke_for_exhausted_budget(&mut self) {
        warn!("remote input budget exhausted, revoking control");
        self.control.revoke_for_exhausted_budget();
        self.hide_overlay();
        let _ = self
            .send_control(&ControlMessage::Permission { allowed: false })
            .await;
        self.notice(Notice::TypingDisabled);
        self.emit_control_state();
    }

    fn show_overlay(&mut self, x: f64, y: f64, now: Instant) {
        self.overlay = PointerOverlay {
            visible: true,
            x,
            y,
            hide_at: now.checked_add(self.config.control.overlay_hide()),
        };
        self.emit(SessionEvent::PointerOverlayChanged {
            visible: true,
            x,
            y,
        });
    }

    fn hide_overlay(&mut self) {
        self.overlay.hide_at = None;
        if self.overlay.visible {
            self.overlay.visible = false;
            self.emit(SessionEvent::PointerOverlayChanged {
                visible: false,
                x: self.overlay.x,
                y: self.overlay.y,
            });
        }
    }

    // ── control: outbound ──────────────────────────────────────────

    /// Serialises and sends one control message; failures become a delivery notice.
    async fn send_control(&mut self, msg: &ControlMessage) -> Result<(), TransportError> {
        let result = match (self.channel_id(ChannelKind::Control), msg.to_json()) {
            (Some(id), Ok(json)) if self.control.is_open() => {
                self.transport.send(id, Payload::Text(json)).await
            }
            (_, Err(e)) => Err(TransportError::Send(e.to_string())),
            _ => Err(TransportError::ChannelNotOpen),
        };
        if let Err(e) = &result {
            warn!("control delivery failed: {e}");
            self.notice(Notice::ControlDeliveryFailed);
        }
        result
    }

    /// Grants or withdraws the peer's control of our screen.
    ///
    /// A grant only takes effect once the peer was told about it; a withdrawal takes
    /// effect locally even if the peer could not be reached.
    pub async fn set_control_allowed(&mut self, next: bool) -> Result<()> {
        if !self.control.is_open() {
            self.notice(Notice::ControlUnavailable);
            return Err(StateError::ControlUnavailable.into());
        }
        if next && !self.screen_sharing {
            self.notice(Notice::RequiresScreenShare);
            return Err(StateError::ScreenShareInactive.into());
        }
        if next == self.control.permission_allowed_to_peer() {
            return Ok(());
        }

        let delivered = self
            .send_control(&ControlMessage::Permission { allowed: next })
            .await;

        // granting needs the peer to know; withdrawing happens regardless
        if next {
            delivered?;
            self.control.set_permission_allowed_to_peer(true);
            info!("remote control granted to peer");
            self.notice(Notice::PeerCanControl);
        } else {
            self.control.set_permission_allowed_to_peer(false);
            self.hide_overlay();
            info!("remote control withdrawn from peer");
            self.notice(Notice::ControlRevokedLocal);
        }
        self.emit_control_state();
        Ok(())
    }

    /// Local screen share started or stopped. Stopping withdraws any control we granted.
    pub async fn set_screen_sharing(&mut self, active: bool) {
        if self.screen_sharing == active {
            return;
        }
        self.screen_sharing = active;
        if active || !self.control.permission_allowed_to_peer() {
            return;
        }

        let delivered = self
            .send_control(&ControlMessage::Permission { allowed: false })
            .await;
        self.control.set_permission_allowed_to_peer(false);
        self.hide_overlay();
        self.notice(Notice::DisabledOnScreenStop);
        if delivered.is_err() {
            self.notice(Notice::RevokeFailed);
        }
        self.emit_control_state();
    }

    fn ensure_controlling(&self) -> Result<()> {
        if !self.control.is_open() {
            return Err(StateError::ControlUnavailable.into());
        }
        if !self.control.permission_granted() {
            return Err(StateError::NotPermitted.into());
        }
        Ok(())
    }

    /// Local pointer moved over the peer's shared screen (percent coordinates).
    pub async fn pointer_sample(&mut self, x: f64, y: f64) {
        if self.ensure_controlling().is_err() || !x.is_finite() || !y.is_finite() {
            self.pointer_leave().await;
            return;
        }
        self.pointer
            .sample(x.clamp(0.0, 100.0), y.clamp(0.0, 100.0), Instant::now());
    }

    /// Local pointer left the peer's shared screen.
    pub async fn pointer_leave(&mut self) {
        if self.pointer.leave() && self.control.is_open() {
            let _ = self
                .send_control(&ControlMessage::PointerVisibility { visible: false })
                .await;
        }
    }

    pub async fn send_pointer_click(
        &mut self,
        x: f64,
        y: f64,
        button: PointerButton,
    ) -> Result<()> {
        self.ensure_controlling()?;
        if !x.is_finite() || !y.is_finite() {
            return Err(SessionError::Validation("pointer coordinates must be finite".into()));
        }
        let msg = ControlMessage::Pointer {
            kind: PointerKind::Click,
            x: x.clamp(0.0, 100.0),
            y: y.clamp(0.0, 100.0),
            button: Some(button),
        };
        self.send_control(&msg).await?;
        Ok(())
    }

    pub async fn send_remote_key(&mut self, mode: KeyboardMode, value: Option<&str>) -> Result<()> {
        self.ensure_controlling()?;
        let value = match mode {
            KeyboardMode::Text => {
                // same rules the receiving side enforces, so nothing gets cut twice
                let cleaned = strip_control_chars(value.unwrap_or_default());
                let capped = truncate_units(&cleaned, self.config.control.keyboard_text_max);
                if capped.is_empty() {
                    return Ok(());
                }
                Some(capped.to_owned())
            }
            KeyboardMode::Backspace | KeyboardMode::Enter => None,
        };
        self.send_control(&ControlMessage::Keyboard { mode, value })
            .await?;
        Ok(())
    }

    pub async fn send_remote_action(&mut self, action: &str) -> Result<()> {
        self.ensure_controlling()?;
        self.send_control(&ControlMessage::Action {
            action: action.to_owned(),
        })
        .await?;
        Ok(())
    }
}
