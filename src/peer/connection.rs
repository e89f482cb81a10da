//! [`Transport`] on top of webrtc-rs: one peer connection, ordered reliable data
//! channels, full (non-trickle) ICE gathering.

use crate::error::TransportError;
use crate::peer::transport::{Connectivity, Transport, TransportEvent};
use crate::peer::types::{ChannelId, ChannelKind, Payload, Role, ServerConfig};
use crate::signaling::{SdpKind, SessionDescription};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::{
    api::APIBuilder,
    data_channel::{data_channel_init::RTCDataChannelInit, RTCDataChannel},
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

type ChannelMap = Arc<Mutex<HashMap<ChannelId, Arc<RTCDataChannel>>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Event sender tied to one peer connection; goes quiet once that connection is replaced.
#[derive(Clone)]
struct EventPipe {
    tx: mpsc::UnboundedSender<TransportEvent>,
    current: Arc<AtomicU64>,
    generation: u64,
}

impl EventPipe {
    fn send(&self, event: TransportEvent) {
        if self.current.load(Ordering::SeqCst) == self.generation {
            let _ = self.tx.send(event);
        }
    }
}

pub struct WebRtcTransport {
    ice_servers: Vec<ServerConfig>,
    events: mpsc::UnboundedSender<TransportEvent>,
    pc: Option<Arc<RTCPeerConnection>>,
    channels: ChannelMap,
    next_id: Arc<AtomicU32>,
    gathering_done: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
}

impl WebRtcTransport {
    pub fn new(ice_servers: Vec<ServerConfig>, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            ice_servers,
            events,
            pc: None,
            channels: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU32::new(0)),
            gathering_done: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn pc(&self) -> Result<&Arc<RTCPeerConnection>, TransportError> {
        self.pc.as_ref().ok_or(TransportError::NotStarted)
    }

    fn pipe(&self) -> EventPipe {
        EventPipe {
            tx: self.events.clone(),
            current: self.generation.clone(),
            generation: self.generation.load(Ordering::SeqCst),
        }
    }

    fn allocate_id(&self) -> ChannelId {
        // ids start at 1, shared with the on_data_channel handler
        ChannelId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn install_handlers(&self, pc: &Arc<RTCPeerConnection>) {
        // local candidates are logged; None marks the end of gathering
        let pipe = self.pipe();
        let done = self.gathering_done.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            match cand {
                Some(c) => {
                    if let Ok(init) = c.to_json() {
                        pipe.send(TransportEvent::LocalCandidate(init.candidate));
                    }
                }
                None => {
                    // end of candidates
                    debug!("ICE candidate gathering completed");
                    done.store(true, Ordering::SeqCst);
                }
            }
            Box::pin(async {})
        }));

        // debugging only, completion comes from on_ice_candidate(None)
        pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!("ICE gathering state changed to: {state:?}");
            Box::pin(async {})
        }));

        // the session owns the grace period, here we only translate the state
        let pipe = self.pipe();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            debug!("peer connection state changed to: {st:?}");
            let state = match st {
                RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => {
                    Connectivity::New
                }
                RTCPeerConnectionState::Connecting => Connectivity::Connecting,
                RTCPeerConnectionState::Connected => Connectivity::Connected,
                RTCPeerConnectionState::Disconnected => Connectivity::Disconnected,
                RTCPeerConnectionState::Failed => Connectivity::Failed,
                RTCPeerConnectionState::Closed => Connectivity::Closed,
            };
            pipe.send(TransportEvent::Connectivity(state));
            Box::pin(async {})
        }));

        // Registered for both roles so a channel the initiator never asked for is still
        // reported, and then refused by the session.
        let pipe = self.pipe();
        let channels = self.channels.clone();
        let next_id = self.next_id.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let id = ChannelId(next_id.fetch_add(1, Ordering::SeqCst) + 1);
            let label = dc.label().to_owned();
            info!("incoming data channel {label:?}");
            lock(&channels).insert(id, dc.clone());
            // announce before attaching so open/message never precede the channel itself
            pipe.send(TransportEvent::IncomingChannel { id, label });
            attach_channel(&dc, id, &pipe);
            Box::pin(async {})
        }));
    }
}

/// Forwards a data channel's lifecycle and frames as [`TransportEvent`]s.
fn attach_channel(dc: &Arc<RTCDataChannel>, id: ChannelId, pipe: &EventPipe) {
    let open = pipe.clone();
    dc.on_open(Box::new(move || {
        open.send(TransportEvent::ChannelOpen { id });
        Box::pin(async {})
    }));

    let frames = pipe.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        // a "string" frame that is not UTF-8 is handed on as binary and refused upstream
        let payload = if msg.is_string {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => Payload::Text(text),
                Err(e) => Payload::Binary(e.into_bytes()),
            }
        } else {
            Payload::Binary(msg.data.to_vec())
        };
        frames.send(TransportEvent::Message { id, payload });
        Box::pin(async {})
    }));

    let closed = pipe.clone();
    dc.on_close(Box::new(move || {
        closed.send(TransportEvent::ChannelClosed { id });
        Box::pin(async {})
    }));
}

fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    // one transport for all data channels
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            // "stun.example.org:3478" -> "stun:stun.example.org:3478"
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn start(&mut self, role: Role) -> Result<(), TransportError> {
        // drop whatever the previous attempt left behind
        self.close().await;
        // new generation: only this connection's callbacks get through
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.gathering_done.store(false, Ordering::SeqCst);

        let api = APIBuilder::new().build();
        let pc = api
            .new_peer_connection(rtc_config(&self.ice_servers))
            .await
            .map(Arc::new)
            .map_err(|e| TransportError::Description(e.to_string()))?;
        self.install_handlers(&pc);
        info!(
            "peer connection created as {role:?} with {} ICE servers",
            self.ice_servers.len()
        );
        self.pc = Some(pc);
        Ok(())
    }

    async fn create_channel(&mut self, kind: ChannelKind) -> Result<ChannelId, TransportError> {
        let pc = self.pc()?.clone();
        // ordered + reliable (no max retransmits)
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = pc
            .create_data_channel(kind.label(), Some(init))
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))?;
        let id = self.allocate_id();
        lock(&self.channels).insert(id, dc.clone());
        attach_channel(&dc, id, &self.pipe());
        debug!("created {kind} data channel");
        Ok(id)
    }

    async fn create_local_description(&mut self, role: Role) -> Result<(), TransportError> {
        let pc = self.pc()?.clone();
        // set_local_description kicks off gathering again
        self.gathering_done.store(false, Ordering::SeqCst);
        let desc = match role {
            Role::Initiator => pc.create_offer(None).await,
            Role::Responder => pc.create_answer(None).await,
        }
        .map_err(|e| TransportError::Description(e.to_string()))?;
        pc.set_local_description(desc)
            .await
            .map_err(|e| TransportError::Description(e.to_string()))
    }

    fn gathering_complete(&self) -> bool {
        self.gathering_done.load(Ordering::SeqCst)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        // after gathering this SDP already carries every candidate
        let desc = self.pc.as_ref()?.local_description().await?;
        let kind = match desc.sdp_type {
            RTCSdpType::Offer => SdpKind::Offer,
            RTCSdpType::Answer => SdpKind::Answer,
            other => {
                warn!("unexpected local description type {other:?}");
                return None;
            }
        };
        Some(SessionDescription::new(kind, desc.sdp))
    }

    async fn apply_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), TransportError> {
        let pc = self.pc()?.clone();
        let sdp = description.sdp.clone();
        let desc = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(sdp),
            SdpKind::Answer => RTCSessionDescription::answer(sdp),
        }
        .map_err(|e| TransportError::RemoteDescription(e.to_string()))?;
        pc.set_remote_description(desc)
            .await
            .map_err(|e| TransportError::RemoteDescription(e.to_string()))
    }

    async fn close_channel(&mut self, id: ChannelId) {
        let dc = lock(&self.channels).remove(&id);
        if let Some(dc) = dc {
            if let Err(e) = dc.close().await {
                debug!("closing data channel {:?}: {e}", dc.label());
            }
        }
    }

    async fn send(&self, id: ChannelId, payload: Payload) -> Result<(), TransportError> {
        // clone out so the lock is not held across the await
        let dc = lock(&self.channels)
            .get(&id)
            .cloned()
            .ok_or(TransportError::ChannelNotOpen)?;
        if dc.ready_state() != RTCDataChannelState::Open {
            return Err(TransportError::ChannelNotOpen);
        }
        let sent = match payload {
            Payload::Text(text) => dc.send_text(text).await,
            Payload::Binary(bytes) => dc.send(&Bytes::from(bytes)).await,
        };
        sent.map(|_| ())
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        // stale callbacks from the old connection must not reach the session
        self.generation.fetch_add(1, Ordering::SeqCst);
        let channels: Vec<Arc<RTCDataChannel>> =
            lock(&self.channels).drain().map(|(_, dc)| dc).collect();
        for dc in channels {
            let _ = dc.close().await;
        }
        // closing the pc also stops any gathering still in flight
        if let Some(pc) = self.pc.take() {
            if let Err(e) = pc.close().await {
                warn!("closing peer connection: {e}");
            }
        }
        self.gathering_done.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_servers_carry_scheme_and_credentials() {
        let servers = vec![
            ServerConfig {
                id: "a".into(),
                r#type: "stun".into(),
                url: "stun.example.org:3478".into(),
                username: None,
                credential: None,
            },
            ServerConfig {
                id: "b".into(),
                r#type: "turn".into(),
                url: "turn:relay.example.org:3478".into(),
                username: Some("u".into()),
                credential: Some("p".into()),
            },
        ];
        let ice = ice_servers(&servers);
        assert_eq!(ice[0].urls, vec!["stun:stun.example.org:3478".to_string()]);
        assert_eq!(ice[0].username, "");
        assert_eq!(ice[1].urls, vec!["turn:relay.example.org:3478".to_string()]);
        assert_eq!(ice[1].credential, "p");
    }

    #[tokio::test]
    async fn unstarted_transport_refuses_work() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut t = WebRtcTransport::new(Vec::new(), tx);
        assert_eq!(
            t.create_channel(ChannelKind::Chat).await,
            Err(TransportError::NotStarted)
        );
        assert!(!t.gathering_complete());
        assert!(t.local_description().await.is_none());
        assert_eq!(
            t.send(ChannelId(1), Payload::Text("x".into())).await,
            Err(TransportError::ChannelNotOpen)
        );
        t.close().await;
    }
}
