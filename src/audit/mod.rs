//! Best-effort audit trail of registrations, links and relayed traffic.
//!
//! Callers hand events to an [`AuditRecorder`], which queues them for a
//! background task that drives the configured [`AuditSink`]. Recording never
//! waits on the sink and never reports failure back to the relay path: a full
//! queue drops the event, a failing sink is logged and the event discarded.

pub mod file;

pub use file::{FileAuditSink, PairingRecord, SenderRecord};

use crate::events::model::LogLevel;
use crate::network::message::PairingCode;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    #[serde(rename = "sender->receiver")]
    SenderToReceiver,
    #[serde(rename = "receiver->sender")]
    ReceiverToSender,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::SenderToReceiver => f.write_str("sender->receiver"),
            Direction::ReceiverToSender => f.write_str("receiver->sender"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Upsert by code.
    Registration {
        code: PairingCode,
        receiver_addr: String,
        active: bool,
        last_updated: f64,
    },
    /// A sender linked to the receiver under `code`.
    Link {
        code: PairingCode,
        sender_addr: String,
        time: f64,
    },
    /// Append-only record of one relayed payload.
    Relay {
        direction: Direction,
        message: Value,
        timestamp: f64,
        from_addr: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit io: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit serialization: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Sink used when auditing is disabled.
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct AuditRecorder {
    tx: Option<mpsc::Sender<AuditEvent>>,
}

impl AuditRecorder {
    /// Start the background writer for `sink`. Must be called inside a Tokio runtime.
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.record(&event).await {
                    crate::emit_system_event!(
                        "audit",
                        LogLevel::Warn,
                        "audit_write_failed",
                        Some(e.to_string())
                    );
                }
            }
        });
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn record(&self, event: AuditEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            crate::emit_system_event!(
                "audit",
                LogLevel::Warn,
                "audit_event_dropped",
                Some(e.to_string())
            );
        }
    }
}

pub(crate) fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
