//! In-process transport with a scriptable far end.
//!
//! Nothing leaves the process: the [`MemoryHandle`] plays the peer and the network,
//! opening channels, delivering frames, finishing gathering, and recording every
//! frame the session sends. Used by the test-suite and for dry runs of a UI.

use crate::error::TransportError;
use crate::peer::transport::{Connectivity, Transport, TransportEvent};
use crate::peer::types::{ChannelId, ChannelKind, Payload, Role};
use crate::signaling::{SdpKind, SessionDescription};
use crate::utils::random_id;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct MemoryState {
    role: Option<Role>,
    started: bool,
    next_id: u32,
    /// label and open flag of every live channel
    channels: HashMap<ChannelId, (String, bool)>,
    sent: Vec<(String, Payload)>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    gathering_complete: bool,
    manual_gathering: bool,
    fail_descriptions: bool,
    fail_sends: bool,
    closed: Vec<String>,
    close_calls: usize,
    fingerprint: String,
}

impl MemoryState {
    fn id_for(&self, label: &str) -> Option<ChannelId> {
        self.channels
            .iter()
            .find(|(_, (l, _))| l == label)
            .map(|(id, _)| *id)
    }

    fn allocate(&mut self, label: &str) -> ChannelId {
        self.next_id += 1;
        let id = ChannelId(self.next_id);
        self.channels.insert(id, (label.to_owned(), false));
        id
    }
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

/// The far end of a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryHandle {
    state: Arc<Mutex<MemoryState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryTransport {
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> (Self, MemoryHandle) {
        let state = Arc::new(Mutex::new(MemoryState {
            fingerprint: random_id(),
            ..MemoryState::default()
        }));
        let handle = MemoryHandle {
            state: state.clone(),
            events: events.clone(),
        };
        (Self { state, events }, handle)
    }

    fn describe(state: &MemoryState, kind: SdpKind) -> SessionDescription {
        let mut sdp = format!(
            "v=0\r\no=- 0 2 IN IP4 127.0.0.1\r\ns=-\r\na=fingerprint:sha-256 {}\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n",
            state.fingerprint
        );
        if state.gathering_complete {
            sdp.push_str("a=candidate:1 1 udp 2130706431 127.0.0.1 50000 typ host\r\n");
            sdp.push_str("a=end-of-candidates\r\n");
        }
        SessionDescription::new(kind, sdp)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn start(&mut self, role: Role) -> Result<(), TransportError> {
        let mut st = lock(&self.state);
        st.role = Some(role);
        st.started = true;
        st.channels.clear();
        st.local = None;
        st.remote = None;
        st.gathering_complete = false;
        drop(st);
        let _ = self
            .events
            .send(TransportEvent::Connectivity(Connectivity::New));
        Ok(())
    }

    async fn create_channel(&mut self, kind: ChannelKind) -> Result<ChannelId, TransportError> {
        let mut st = lock(&self.state);
        if !st.started {
            return Err(TransportError::NotStarted);
        }
        Ok(st.allocate(kind.label()))
    }

    async fn create_local_description(&mut self, role: Role) -> Result<(), TransportError> {
        let mut st = lock(&self.state);
        if !st.started {
            return Err(TransportError::NotStarted);
        }
        if st.fail_descriptions {
            return Err(TransportError::Description("scripted failure".into()));
        }
        let kind = match role {
            Role::Initiator => SdpKind::Offer,
            Role::Responder => SdpKind::Answer,
        };
        let complete = !st.manual_gathering;
        st.gathering_complete = complete;
        let local = Self::describe(&st, kind);
        st.local = Some(local);
        Ok(())
    }

    fn gathering_complete(&self) -> bool {
        lock(&self.state).gathering_complete
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let st = lock(&self.state);
        let local = st.local.as_ref().map(|d| Self::describe(&st, d.kind));
        local
    }

    async fn apply_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), TransportError> {
        let mut st = lock(&self.state);
        if !st.started {
            return Err(TransportError::NotStarted);
        }
        if st.fail_descriptions {
            return Err(TransportError::RemoteDescription("scripted failure".into()));
        }
        st.remote = Some(description.clone());
        Ok(())
    }

    async fn close_channel(&mut self, id: ChannelId) {
        let mut st = lock(&self.state);
        if let Some((label, _)) = st.channels.remove(&id) {
            st.closed.push(label);
        }
    }

    async fn send(&self, id: ChannelId, payload: Payload) -> Result<(), TransportError> {
        let mut st = lock(&self.state);
        let label = match st.channels.get(&id) {
            Some((label, true)) => label.clone(),
            _ => return Err(TransportError::ChannelNotOpen),
        };
        if st.fail_sends {
            return Err(TransportError::Send("scripted failure".into()));
        }
        st.sent.push((label, payload));
        Ok(())
    }

    async fn close(&mut self) {
        let mut st = lock(&self.state);
        st.close_calls += 1;
        st.started = false;
        let labels: Vec<String> = st.channels.drain().map(|(_, (l, _))| l).collect();
        st.closed.extend(labels);
    }
}

impl MemoryHandle {
    /// Keep gathering pending until [`MemoryHandle::complete_gathering`].
    pub fn set_manual_gathering(&self, manual: bool) {
        lock(&self.state).manual_gathering = manual;
    }

    pub fn complete_gathering(&self) {
        lock(&self.state).gathering_complete = true;
    }

    pub fn set_fail_descriptions(&self, fail: bool) {
        lock(&self.state).fail_descriptions = fail;
    }

    pub fn set_fail_sends(&self, fail: bool) {
        lock(&self.state).fail_sends = fail;
    }

    /// Marks the channel with `label` open and reports it. Returns its id.
    pub fn open_channel(&self, label: &str) -> Option<ChannelId> {
        let id = {
            let mut st = lock(&self.state);
            let id = st.id_for(label)?;
            if let Some(entry) = st.channels.get_mut(&id) {
                entry.1 = true;
            }
            id
        };
        let _ = self.events.send(TransportEvent::ChannelOpen { id });
        Some(id)
    }

    /// The peer opens a channel of its own; it starts out open.
    pub fn announce_channel(&self, label: &str) -> ChannelId {
        let id = {
            let mut st = lock(&self.state);
            let id = st.allocate(label);
            if let Some(entry) = st.channels.get_mut(&id) {
                entry.1 = true;
            }
            id
        };
        let _ = self.events.send(TransportEvent::IncomingChannel {
            id,
            label: label.to_owned(),
        });
        let _ = self.events.send(TransportEvent::ChannelOpen { id });
        id
    }

    pub fn close_remote_channel(&self, label: &str) {
        let id = {
            let mut st = lock(&self.state);
            let Some(id) = st.id_for(label) else { return };
            st.channels.remove(&id);
            id
        };
        let _ = self.events.send(TransportEvent::ChannelClosed { id });
    }

    pub fn deliver(&self, label: &str, payload: Payload) {
        let id = lock(&self.state).id_for(label);
        if let Some(id) = id {
            let _ = self.events.send(TransportEvent::Message { id, payload });
        }
    }

    pub fn deliver_text(&self, label: &str, text: &str) {
        self.deliver(label, Payload::Text(text.to_owned()));
    }

    /// Raw event injection, e.g. for frames on a channel that was never accepted.
    pub fn inject(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn set_connectivity(&self, state: Connectivity) {
        let _ = self.events.send(TransportEvent::Connectivity(state));
    }

    /// Everything sent on `label`, in order.
    pub fn sent_on(&self, label: &str) -> Vec<Payload> {
        lock(&self.state)
            .sent
            .iter()
            .filter(|(l, _)| l == label)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn clear_sent(&self) {
        lock(&self.state).sent.clear();
    }

    pub fn closed_channels(&self) -> Vec<String> {
        lock(&self.state).closed.clone()
    }

    pub fn channel_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = lock(&self.state)
            .channels
            .values()
            .map(|(l, _)| l.clone())
            .collect();
        labels.sort();
        labels
    }

    pub fn close_calls(&self) -> usize {
        lock(&self.state).close_calls
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        lock(&self.state).remote.clone()
    }

    pub fn role(&self) -> Option<Role> {
        lock(&self.state).role
    }
}
