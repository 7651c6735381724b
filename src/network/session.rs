// src/network/session.rs

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::audit::AuditRecorder;
use crate::config::Config;
use crate::events::model::LogLevel;
use crate::network::events::emit_network_event;
use crate::network::message::{ControlReply, Envelope, EnvelopeError};
use crate::network::registry::{ConnHandle, PairingRegistry};
use crate::network::router::RelayRouter;

/// Per-connection handshake progress. The receiver/sender distinction lives in
/// the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Established,
}

/// Shared collaborators handed to every connection session.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: PairingRegistry,
    pub router: RelayRouter,
    pub outbound_queue: usize,
    pub max_frame_bytes: usize,
    pub allow_console: bool,
}

impl SessionContext {
    pub fn new(config: &Config, audit: AuditRecorder) -> Self {
        let relay = config.relay();
        let registry = PairingRegistry::new(audit.clone(), relay.evict_superseded());
        let router = RelayRouter::new(registry.clone(), audit);
        Self {
            registry,
            router,
            outbound_queue: relay.outbound_queue(),
            max_frame_bytes: relay.max_frame_bytes(),
            allow_console: true,
        }
    }
}

fn log_session_event(
    ctx: &SessionContext,
    level: LogLevel,
    action: &str,
    addr: SocketAddr,
    detail: Option<String>,
) {
    emit_network_event(
        "session",
        level,
        action,
        Some(addr.to_string()),
        detail,
        ctx.allow_console,
    );
}

pub async fn run_session(stream: TcpStream, peer_addr: SocketAddr, ctx: Arc<SessionContext>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // Outbound frames are queued and written by a dedicated task; forwarders
    // only wait when the queue is full.
    let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(ctx.outbound_queue);
    let handle = ConnHandle::new(peer_addr, tx);
    let writer_ctx = ctx.clone();
    tokio::spawn(async move {
        while let Some(mut msg) = rx.recv().await {
            msg.push('\n');
            if let Err(e) = write_half.write_all(msg.as_bytes()).await {
                log_session_event(
                    &writer_ctx,
                    LogLevel::Warn,
                    "stream_write_failed",
                    peer_addr,
                    Some(e.to_string()),
                );
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    log_session_event(
        &ctx,
        LogLevel::Info,
        "session_start",
        peer_addr,
        Some(format!("conn={}", handle.id)),
    );

    let mut state = SessionState::Unregistered;
    let mut buf: Vec<u8> = Vec::new();
    // Set while skipping the rest of an over-long line.
    let mut discarding = false;
    let max_frame = ctx.max_frame_bytes as u64;
    loop {
        buf.clear();
        let mut limited = (&mut reader).take(max_frame);
        tokio::select! {
            _ = handle.closed() => {
                log_session_event(&ctx, LogLevel::Info, "session_evicted", peer_addr, None);
                break;
            }
            res = limited.read_until(b'\n', &mut buf) => match res {
                Ok(0) => {
                    log_session_event(&ctx, LogLevel::Info, "peer_closed_connection", peer_addr, None);
                    break;
                }
                Ok(_) => {
                    let complete = buf.ends_with(b"\n");
                    if discarding {
                        discarding = !complete;
                        continue;
                    }
                    if !complete && buf.len() as u64 >= max_frame {
                        log_session_event(
                            &ctx,
                            LogLevel::Warn,
                            "malformed_frame",
                            peer_addr,
                            Some(format!("frame exceeds {} bytes", max_frame)),
                        );
                        discarding = true;
                        continue;
                    }
                    let line = match std::str::from_utf8(&buf) {
                        Ok(l) => l,
                        Err(e) => {
                            log_session_event(
                                &ctx,
                                LogLevel::Warn,
                                "malformed_frame",
                                peer_addr,
                                Some(e.to_string()),
                            );
                            continue;
                        }
                    };
                    state = handle_frame(&ctx, &handle, state, line).await;
                }
                Err(e) => {
                    log_session_event(&ctx, LogLevel::Warn, "peer_read_error", peer_addr, Some(e.to_string()));
                    break;
                }
            }
        }
    }

    log_session_event(
        &ctx,
        LogLevel::Info,
        "session_end",
        peer_addr,
        Some(format!("conn={} state={:?}", handle.id, state)),
    );
    ctx.registry.unregister(&handle).await;
    // Last strong sender: links still pointing here now fail with `Gone`.
    drop(handle);
}

/// Process one inbound line and return the session's next state.
pub async fn handle_frame(
    ctx: &SessionContext,
    handle: &ConnHandle,
    state: SessionState,
    line: &str,
) -> SessionState {
    let envelope = match Envelope::parse(line) {
        Ok(env) => env,
        Err(EnvelopeError::Empty) => return state,
        Err(e) => {
            log_session_event(
                ctx,
                LogLevel::Warn,
                "malformed_frame",
                handle.addr,
                Some(e.to_string()),
            );
            return state;
        }
    };

    match envelope {
        Envelope::Register { code } => {
            ctx.registry.register_receiver(&code, handle).await;
            SessionState::Established
        }
        Envelope::Link { code } => match ctx.registry.link_sender(&code, handle).await {
            Ok(_) => {
                reply(ctx, handle, ControlReply::Linked { code }).await;
                SessionState::Established
            }
            Err(e) => {
                log_session_event(
                    ctx,
                    LogLevel::Info,
                    "link_rejected",
                    handle.addr,
                    Some(e.to_string()),
                );
                reply(ctx, handle, ControlReply::InvalidCode).await;
                state
            }
        },
        Envelope::Relay(message) => {
            ctx.router.route(handle, line.trim(), message).await;
            state
        }
    }
}

async fn reply(ctx: &SessionContext, handle: &ConnHandle, reply: ControlReply) {
    if let Err(e) = handle.send_line(reply.to_line()).await {
        log_session_event(
            ctx,
            LogLevel::Warn,
            "control_reply_failed",
            handle.addr,
            Some(e.to_string()),
        );
    }
}
