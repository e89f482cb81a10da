//! Command surface of a running session.
//!
//! [`spawn_session`] moves a [`Session`] into its own task. Every caller goes through a
//! cloneable [`SessionHandle`]; commands, transport events and timer ticks are handled one
//! at a time, so no protocol state is ever shared.

use crate::config::SessionConfig;
use crate::error::{Result, SessionError, TransportError};
use crate::events::{EventSink, RemoteControlState};
use crate::peer::control::{KeyboardMode, PointerButton};
use crate::peer::surface::ControlSurface;
use crate::peer::transport::{Connectivity, Transport, TransportEvent};
use crate::session::{Session, SessionState};
use crate::signaling::{SdpKind, SessionDescription};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::info;

type Reply<T> = oneshot::Sender<Result<T>>;

pub enum Command {
    /// Replies once the offer is final (gathering finished) or failed.
    CreateOffer(Reply<SessionDescription>),
    /// Replies once the answer is final or failed.
    CreateAnswer {
        remote: Option<String>,
        reply: Reply<SessionDescription>,
    },
    ApplyRemote {
        text: String,
        reply: Reply<SdpKind>,
    },
    SendChat {
        text: String,
        reply: Reply<bool>,
    },
    SetDraft(String),
    SendDraft(Reply<bool>),
    ClearChat,
    SetControlAllowed {
        allowed: bool,
        reply: Reply<()>,
    },
    SetScreenSharing(bool),
    PointerSample {
        x: f64,
        y: f64,
    },
    PointerLeave,
    PointerClick {
        x: f64,
        y: f64,
        button: PointerButton,
        reply: Reply<()>,
    },
    RemoteKey {
        mode: KeyboardMode,
        value: Option<String>,
        reply: Reply<()>,
    },
    RemoteAction {
        action: String,
        reply: Reply<()>,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Disconnect(oneshot::Sender<()>),
}

/// Point-in-time view of a session, for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub connectivity: Connectivity,
    pub busy: bool,
    pub chat_open: bool,
    pub control_open: bool,
    pub remote_control: RemoteControlState,
    pub input_budget_remaining: usize,
    pub screen_sharing: bool,
    pub draft: String,
    pub fingerprint: Option<String>,
}

#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

/// Starts the session task. It runs until every handle is dropped, disconnecting on the way out.
pub fn spawn_session<T: Transport + 'static>(
    transport: T,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    sink: impl EventSink + 'static,
    surface: impl ControlSurface + 'static,
    config: SessionConfig,
) -> (SessionHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(64);
    let session = Session::new(transport, sink, surface, config);
    let task = tokio::spawn(run(session, rx, transport_events));
    (SessionHandle { tx }, task)
}

async fn run<T: Transport>(
    mut session: Session<T>,
    mut commands: mpsc::Receiver<Command>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    let mut pending: Option<Reply<SessionDescription>> = None;
    info!("session task started");

    loop {
        let deadline = session.next_deadline();
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(cmd) => handle(&mut session, cmd, &mut pending).await,
                None => break,
            },
            Some(event) = events.recv() => session.handle_transport_event(event).await,
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(outcome) = session.on_timer(Instant::now()).await {
                    if let Some(reply) = pending.take() {
                        let _ = reply.send(outcome);
                    }
                }
            }
        }

        // gathering was abandoned (disconnect, transport closed)
        if pending.is_some() && session.state() != SessionState::GatheringLocal {
            if let Some(reply) = pending.take() {
                let _ = reply.send(Err(TransportError::NotStarted.into()));
            }
        }
    }

    session.disconnect().await;
    info!("session task stopped");
}

async fn handle<T: Transport>(
    session: &mut Session<T>,
    cmd: Command,
    pending: &mut Option<Reply<SessionDescription>>,
) {
    match cmd {
        Command::CreateOffer(reply) => match session.create_offer().await {
            Ok(()) => *pending = Some(reply),
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        },
        Command::CreateAnswer { remote, reply } => {
            match session.create_answer(remote.as_deref()).await {
                Ok(()) => *pending = Some(reply),
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            }
        }
        Command::ApplyRemote { text, reply } => {
            let _ = reply.send(session.apply_remote_description(&text).await);
        }
        Command::SendChat { text, reply } => {
            let _ = reply.send(session.send_chat_message(&text).await);
        }
        Command::SetDraft(text) => session.set_draft(text),
        Command::SendDraft(reply) => {
            let _ = reply.send(session.send_draft().await);
        }
        Command::ClearChat => session.clear_chat(),
        Command::SetControlAllowed { allowed, reply } => {
            let _ = reply.send(session.set_control_allowed(allowed).await);
        }
        Command::SetScreenSharing(active) => session.set_screen_sharing(active).await,
        Command::PointerSample { x, y } => session.pointer_sample(x, y).await,
        Command::PointerLeave => session.pointer_leave().await,
        Command::PointerClick {
            x,
            y,
            button,
            reply,
        } => {
            let _ = reply.send(session.send_pointer_click(x, y, button).await);
        }
        Command::RemoteKey { mode, value, reply } => {
            let _ = reply.send(session.send_remote_key(mode, value.as_deref()).await);
        }
        Command::RemoteAction { action, reply } => {
            let _ = reply.send(session.send_remote_action(&action).await);
        }
        Command::Snapshot(reply) => {
            let _ = reply.send(SessionSnapshot {
                state: session.state(),
                connectivity: session.connectivity(),
                busy: session.is_busy(),
                chat_open: session.chat_open(),
                control_open: session.control_open(),
                remote_control: session.remote_control(),
                input_budget_remaining: session.input_budget_remaining(),
                screen_sharing: session.screen_sharing(),
                draft: session.draft().to_owned(),
                fingerprint: session.fingerprint(),
            });
        }
        Command::Disconnect(reply) => {
            session.disconnect().await;
            let _ = reply.send(());
        }
    }
}

impl SessionHandle {
    async fn call<R>(&self, make: impl FnOnce(Reply<R>) -> Command) -> Result<R> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SessionError::Stopped)?;
        rx.await.map_err(|_| SessionError::Stopped)?
    }

    async fn tell(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).await.map_err(|_| SessionError::Stopped)
    }

    pub async fn create_offer(&self) -> Result<SessionDescription> {
        self.call(Command::CreateOffer).await
    }

    pub async fn create_answer(&self, remote: Option<String>) -> Result<SessionDescription> {
        self.call(|reply| Command::CreateAnswer { remote, reply })
            .await
    }

    pub async fn apply_remote_description(&self, text: impl Into<String>) -> Result<SdpKind> {
        let text = text.into();
        self.call(|reply| Command::ApplyRemote { text, reply }).await
    }

    pub async fn send_chat_message(&self, text: impl Into<String>) -> Result<bool> {
        let text = text.into();
        self.call(|reply| Command::SendChat { text, reply }).await
    }

    pub async fn set_draft(&self, text: impl Into<String>) -> Result<()> {
        self.tell(Command::SetDraft(text.into())).await
    }

    pub async fn send_draft(&self) -> Result<bool> {
        self.call(Command::SendDraft).await
    }

    pub async fn clear_chat(&self) -> Result<()> {
        self.tell(Command::ClearChat).await
    }

    pub async fn set_control_allowed(&self, allowed: bool) -> Result<()> {
        self.call(|reply| Command::SetControlAllowed { allowed, reply })
            .await
    }

    pub async fn set_screen_sharing(&self, active: bool) -> Result<()> {
        self.tell(Command::SetScreenSharing(active)).await
    }

    pub async fn pointer_sample(&self, x: f64, y: f64) -> Result<()> {
        self.tell(Command::PointerSample { x, y }).await
    }

    pub async fn pointer_leave(&self) -> Result<()> {
        self.tell(Command::PointerLeave).await
    }

    pub async fn send_pointer_click(&self, x: f64, y: f64, button: PointerButton) -> Result<()> {
        self.call(|reply| Command::PointerClick {
            x,
            y,
            button,
            reply,
        })
        .await
    }

    pub async fn send_remote_key(&self, mode: KeyboardMode, value: Option<String>) -> Result<()> {
        self.call(|reply| Command::RemoteKey { mode, value, reply })
            .await
    }

    pub async fn send_remote_action(&self, action: impl Into<String>) -> Result<()> {
        let action = action.into();
        self.call(|reply| Command::RemoteAction { action, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tell(Command::Snapshot(reply)).await?;
        rx.await.map_err(|_| SessionError::Stopped)
    }

    pub async fn disconnect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tell(Command::Disconnect(reply)).await?;
        rx.await.map_err(|_| SessionError::Stopped)
    }
}
