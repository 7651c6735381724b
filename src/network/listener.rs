// src/network/listener.rs

use crate::config::Config;
use crate::events::model::LogLevel;
use crate::network::events::emit_network_event;
use crate::network::session::{run_session, SessionContext};
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;

fn log_network_event(
    level: LogLevel,
    action: &str,
    addr: Option<String>,
    detail: Option<String>,
    allow_console: bool,
) {
    emit_network_event("listener", level, action, addr, detail, allow_console);
}

/// Bind the relay listener on the configured address.
pub async fn start_listener(
    config: &Config,
    ctx: Arc<SessionContext>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(config.listen_addr()).await?;
    serve(listener, ctx).await
}

/// Accept connections forever, one session task per connection.
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<SessionContext>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let local = listener.local_addr()?;
    log_network_event(
        LogLevel::Info,
        "listener_bind",
        Some(local.to_string()),
        None,
        ctx.allow_console,
    );

    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                log_network_event(
                    LogLevel::Info,
                    "incoming_connection",
                    Some(peer_addr.to_string()),
                    None,
                    ctx.allow_console,
                );
                if let Err(e) = stream.set_nodelay(true) {
                    log_network_event(
                        LogLevel::Debug,
                        "set_nodelay_failed",
                        Some(peer_addr.to_string()),
                        Some(e.to_string()),
                        ctx.allow_console,
                    );
                }
                tokio::spawn(run_session(stream, peer_addr, ctx.clone()));
            }
            Err(e) => {
                log_network_event(
                    LogLevel::Error,
                    "accept_failed",
                    None,
                    Some(e.to_string()),
                    ctx.allow_console,
                );
            }
        }
    }
}
