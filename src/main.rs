//! peerlink: terminal front end for a copy/paste WebRTC session.
//!
//! ```text
//! peerlink offer                 print an offer, then read the answer from stdin
//! peerlink answer                read an offer from stdin, then print the answer
//! peerlink offer --compact       print the signal gzip+base64 encoded
//! peerlink answer --config cfg.json
//! ```
//!
//! Once connected every stdin line is sent as chat. `/fp` prints the verification
//! code, `/quit` disconnects.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::{info, warn};

use peerlink_lib::logger::init_logging;
use peerlink_lib::peer::surface::StaticSurface;
use peerlink_lib::peer::WebRtcTransport;
use peerlink_lib::{
    spawn_session, MessageOrigin, SessionConfig, SessionDescription, SessionEvent, SessionHandle,
};

#[derive(Parser, Debug)]
#[command(name = "peerlink", about = "Serverless peer-to-peer chat over WebRTC")]
struct Cli {
    #[command(subcommand)]
    role: RoleCmd,

    /// Print the local signal gzip+base64 encoded instead of JSON.
    #[arg(long, global = true)]
    compact: bool,

    /// JSON file with limits, timings and ICE servers.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `peerlink_lib=debug`. `RUST_LOG` wins.
    #[arg(long, global = true)]
    log: Option<String>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum RoleCmd {
    /// Start a session and print the offer.
    Offer,
    /// Answer an offer pasted on stdin.
    Answer,
}

type StdinLines = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

    let config = match &cli.config {
        Some(path) => SessionConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => SessionConfig::default(),
    };

    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let transport = WebRtcTransport::new(config.ice_servers.clone(), transport_tx);
    let (handle, task) = spawn_session(
        transport,
        transport_rx,
        event_tx,
        StaticSurface::new(100.0, 100.0),
        config,
    );

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    match cli.role {
        RoleCmd::Offer => {
            let offer = handle.create_offer().await?;
            print_signal(&offer, cli.compact)?;
            eprintln!("Paste the answer and press Enter:");
            let answer = read_signal(&mut stdin).await?;
            handle.apply_remote_description(answer).await?;
        }
        RoleCmd::Answer => {
            eprintln!("Paste the offer and press Enter:");
            let offer = read_signal(&mut stdin).await?;
            let answer = handle.create_answer(Some(offer)).await?;
            print_signal(&answer, cli.compact)?;
        }
    }

    eprintln!("Waiting for the peer. Type messages, /fp for the verification code, /quit to leave.");
    chat_loop(&handle, &mut stdin, &mut event_rx).await?;

    handle.disconnect().await?;
    drop(handle);
    task.await?;
    Ok(())
}

fn print_signal(desc: &SessionDescription, compact: bool) -> std::io::Result<()> {
    let text = if compact {
        desc.encode_compact()?
    } else {
        desc.encode()
    };
    eprintln!("Send this {} to your peer:", desc.kind);
    println!("{text}");
    Ok(())
}

async fn read_signal(stdin: &mut StdinLines) -> std::io::Result<String> {
    while let Some(line) = stdin.next_line().await? {
        if !line.trim().is_empty() {
            return Ok(line);
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "stdin closed before a signal was pasted",
    ))
}

async fn chat_loop(
    handle: &SessionHandle,
    stdin: &mut StdinLines,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else { return Ok(()) };
                match line.trim() {
                    "/quit" => return Ok(()),
                    "/fp" => {
                        let snapshot = handle.snapshot().await?;
                        match snapshot.fingerprint {
                            Some(fp) => eprintln!("verification code: {fp}"),
                            None => eprintln!("verification code not available yet"),
                        }
                    }
                    _ => {
                        if let Err(e) = handle.send_chat_message(line).await {
                            warn!("message not sent: {e}");
                        }
                    }
                }
            }
            event = events.recv() => {
                let Some(event) = event else { return Ok(()) };
                match event {
                    SessionEvent::MessageReceived { text, origin: MessageOrigin::Remote } => {
                        println!("peer> {text}");
                    }
                    SessionEvent::SystemNotice { text, .. } => eprintln!("* {text}"),
                    SessionEvent::ConnectionStatusChanged { state, connectivity } => {
                        info!("session {state:?}, connectivity {connectivity:?}");
                    }
                    SessionEvent::ChannelStatusChanged { channel, open } => {
                        eprintln!("* {channel} channel {}", if open { "open" } else { "closed" });
                    }
                    _ => {}
                }
            }
        }
    }
}
