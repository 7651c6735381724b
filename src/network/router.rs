// src/network/router.rs

use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audit::{unix_time, AuditEvent, AuditRecorder, Direction};
use crate::events::{
    dispatcher,
    model::{LogEvent, LogLevel, RelayEvent},
};
use crate::network::registry::{ConnHandle, PairingRegistry, Resolution};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// `None` when the sending connection holds no role.
    pub direction: Option<Direction>,
    pub delivered: usize,
    pub failed: usize,
}

/// Forwards opaque payloads between linked connections.
#[derive(Clone)]
pub struct RelayRouter {
    registry: PairingRegistry,
    audit: AuditRecorder,
    forwarded: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl RelayRouter {
    pub fn new(registry: PairingRegistry, audit: AuditRecorder) -> Self {
        Self {
            registry,
            audit,
            forwarded: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Forward `frame` (the payload exactly as received) to the peer(s) of `from`.
    /// A full peer queue delays the forward; a departed peer fails it. Failures
    /// are logged and counted, never returned.
    pub async fn route(
        &self,
        from: &ConnHandle,
        frame: &str,
        message: Map<String, Value>,
    ) -> RouteOutcome {
        let (direction, targets) = match self.registry.resolve_peer(from.id).await {
            Resolution::Sender { target } => (Direction::SenderToReceiver, vec![target]),
            Resolution::Receiver { targets } => (Direction::ReceiverToSender, targets),
            Resolution::Unknown => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.emit(
                    LogLevel::Debug,
                    "unknown",
                    from,
                    0,
                    0,
                    Some("sender holds no role; payload dropped".into()),
                );
                return RouteOutcome::default();
            }
        };

        let mut outcome = RouteOutcome {
            direction: Some(direction),
            ..Default::default()
        };
        let mut failures: Vec<String> = Vec::new();
        for target in &targets {
            match target.send_line(frame.to_string()).await {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    outcome.failed += 1;
                    failures.push(format!("{}: {}", target.addr, e));
                }
            }
        }
        self.forwarded
            .fetch_add(outcome.delivered as u64, Ordering::Relaxed);
        self.dropped
            .fetch_add(outcome.failed as u64, Ordering::Relaxed);

        if targets.is_empty() {
            self.emit(
                LogLevel::Debug,
                &direction.to_string(),
                from,
                0,
                0,
                Some("no linked peers".into()),
            );
            return outcome;
        }
        let level = if outcome.failed > 0 {
            LogLevel::Warn
        } else {
            LogLevel::Debug
        };
        let detail = (!failures.is_empty()).then(|| failures.join("; "));
        self.emit(
            level,
            &direction.to_string(),
            from,
            outcome.delivered,
            outcome.failed,
            detail,
        );
        self.audit.record(AuditEvent::Relay {
            direction,
            message: Value::Object(message),
            timestamp: unix_time(),
            from_addr: from.addr.to_string(),
        });
        outcome
    }

    /// (forwarded, dropped) counters since startup.
    pub fn relay_stats(&self) -> (u64, u64) {
        (
            self.forwarded.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
        )
    }

    fn emit(
        &self,
        level: LogLevel,
        direction: &str,
        from: &ConnHandle,
        delivered: usize,
        failed: usize,
        detail: Option<String>,
    ) {
        let meta = dispatcher::meta("router", level);
        dispatcher::emit(LogEvent::Relay(RelayEvent {
            meta,
            direction: direction.to_string(),
            from_addr: from.addr.to_string(),
            delivered,
            failed,
            detail,
        }));
    }
}
