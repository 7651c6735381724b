#![allow(dead_code)]

use linkium::audit::AuditRecorder;
use linkium::config::Config;
use linkium::network::{serve, PairingCode, SessionContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub const WAIT: Duration = Duration::from_secs(2);

/// Relay on an ephemeral localhost port.
pub async fn start_relay(audit: AuditRecorder) -> (String, Arc<SessionContext>) {
    start_relay_with(&Config::default(), audit).await
}

pub async fn start_relay_with(
    config: &Config,
    audit: AuditRecorder,
) -> (String, Arc<SessionContext>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let mut ctx = SessionContext::new(config, audit);
    ctx.allow_console = false;
    let ctx = Arc::new(ctx);
    tokio::spawn(serve(listener, ctx.clone()));
    (addr, ctx)
}

/// Registration travels on its own connection; wait until the relay has applied it.
pub async fn wait_registered(ctx: &SessionContext, code: &PairingCode) {
    tokio::time::timeout(WAIT, async {
        while ctx.registry.receiver_for(code).await.is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("code {} never registered", code));
}

pub async fn wait_released(ctx: &SessionContext, code: &PairingCode) {
    tokio::time::timeout(WAIT, async {
        while ctx.registry.receiver_for(code).await.is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("code {} never released", code));
}

/// Counters move after the frame is queued, so a peer can see it first.
pub async fn wait_relay_stats(ctx: &SessionContext, forwarded: u64, dropped: u64) {
    let reached = tokio::time::timeout(WAIT, async {
        while ctx.router.relay_stats() != (forwarded, dropped) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(
        reached.is_ok(),
        "relay stats {:?}, expected ({}, {})",
        ctx.router.relay_stats(),
        forwarded,
        dropped
    );
}
