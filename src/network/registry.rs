// src/network/registry.rs

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::sync::{Mutex, Notify};

use crate::audit::{unix_time, AuditEvent, AuditRecorder};
use crate::events::model::LogLevel;
use crate::network::events::emit_pairing_event;
use crate::network::message::PairingCode;

pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("peer connection is gone")]
    Gone,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("no receiver registered under code {0}")]
    InvalidCode(PairingCode),
    #[error("connection cannot link to its own receiver code {0}")]
    SelfLink(PairingCode),
}

/// Owning handle to one connection's outbound queue plus its close signal.
#[derive(Clone, Debug)]
pub struct ConnHandle {
    pub id: ConnId,
    pub addr: SocketAddr,
    tx: mpsc::Sender<String>,
    close: Arc<Notify>,
}

impl ConnHandle {
    pub fn new(addr: SocketAddr, tx: mpsc::Sender<String>) -> Self {
        Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            addr,
            tx,
            close: Arc::new(Notify::new()),
        }
    }

    /// Enqueue one line (without trailing newline). Waits while the outbound
    /// queue is full; fails only once the connection's writer is gone.
    pub async fn send_line(&self, line: String) -> Result<(), DeliveryError> {
        self.tx.send(line).await.map_err(|_| DeliveryError::Gone)
    }

    /// Ask the owning session to terminate.
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Resolves once `close` has been called (a close issued earlier is not lost).
    pub async fn closed(&self) {
        self.close.notified().await
    }

    pub fn downgrade(&self) -> PeerRef {
        PeerRef {
            id: self.id,
            addr: self.addr,
            tx: self.tx.downgrade(),
        }
    }
}

/// Non-owning reference to a peer connection; never keeps the peer alive.
#[derive(Clone, Debug)]
pub struct PeerRef {
    pub id: ConnId,
    pub addr: SocketAddr,
    tx: mpsc::WeakSender<String>,
}

impl PeerRef {
    pub async fn send_line(&self, line: String) -> Result<(), DeliveryError> {
        let tx = self.tx.upgrade().ok_or(DeliveryError::Gone)?;
        tx.send(line).await.map_err(|_| DeliveryError::Gone)
    }
}

#[derive(Debug, Clone)]
pub struct ReceiverSession {
    pub code: PairingCode,
    pub handle: ConnHandle,
    pub registered_at: SystemTime,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct SenderLink {
    pub sender: ConnHandle,
    pub code: PairingCode,
    pub receiver: PeerRef,
}

#[derive(Debug, Clone)]
enum Role {
    Receiver(PairingCode),
    Sender(SenderLink),
}

/// Role a connection currently holds, as seen from outside the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleTag {
    Receiver(PairingCode),
    Sender { code: PairingCode, receiver: ConnId },
}

/// Who a relay payload arriving on a connection should go to.
#[derive(Debug, Clone)]
pub enum Resolution {
    Sender { target: PeerRef },
    Receiver { targets: Vec<PeerRef> },
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unregistered {
    Receiver { code: PairingCode, released: bool },
    Sender { code: PairingCode },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub codes: Vec<PairingCode>,
    pub receivers: usize,
    pub senders: usize,
}

#[derive(Default)]
struct RegistryState {
    receivers: HashMap<PairingCode, ReceiverSession>,
    roles: HashMap<ConnId, Role>,
}

impl RegistryState {
    /// Drop whatever role `conn` holds. Returns the code released if the
    /// connection was the live receiver for it.
    fn release_role(&mut self, conn: ConnId) -> Option<(PairingCode, SocketAddr)> {
        match self.roles.remove(&conn)? {
            Role::Receiver(code) => {
                let bound_here = self
                    .receivers
                    .get(&code)
                    .map(|r| r.handle.id == conn)
                    .unwrap_or(false);
                if bound_here {
                    self.receivers
                        .remove(&code)
                        .map(|r| (code, r.handle.addr))
                } else {
                    None
                }
            }
            Role::Sender(_) => None,
        }
    }
}

/// Single owner of the code→receiver and sender→receiver mappings. Every
/// read and write goes through one lock.
#[derive(Clone)]
pub struct PairingRegistry {
    state: Arc<Mutex<RegistryState>>,
    audit: AuditRecorder,
    evict_superseded: bool,
}

impl Default for PairingRegistry {
    fn default() -> Self {
        Self::new(AuditRecorder::disabled(), true)
    }
}

impl PairingRegistry {
    pub fn new(audit: AuditRecorder, evict_superseded: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            audit,
            evict_superseded,
        }
    }

    /// Bind `code` to `conn`, replacing any prior binding (last writer wins).
    /// Returns the connection that was displaced, if any.
    pub async fn register_receiver(
        &self,
        code: &PairingCode,
        conn: &ConnHandle,
    ) -> Option<ConnHandle> {
        let (released, superseded) = {
            let mut state = self.state.lock().await;
            let released = state
                .release_role(conn.id)
                .filter(|(old, _)| old != code);
            let previous = state.receivers.insert(
                code.clone(),
                ReceiverSession {
                    code: code.clone(),
                    handle: conn.clone(),
                    registered_at: SystemTime::now(),
                    active: true,
                },
            );
            let superseded = previous
                .map(|p| p.handle)
                .filter(|h| h.id != conn.id);
            if let Some(old) = &superseded {
                state.roles.remove(&old.id);
            }
            state.roles.insert(conn.id, Role::Receiver(code.clone()));
            (released, superseded)
        };

        if let Some((old_code, addr)) = released {
            self.record_inactive(&old_code, addr);
        }
        emit_pairing_event(
            LogLevel::Info,
            "receiver_registered",
            Some(code),
            conn.id,
            Some(conn.addr.to_string()),
        );
        self.audit.record(AuditEvent::Registration {
            code: code.clone(),
            receiver_addr: conn.addr.to_string(),
            active: true,
            last_updated: unix_time(),
        });
        if let Some(old) = &superseded {
            emit_pairing_event(
                LogLevel::Warn,
                "receiver_superseded",
                Some(code),
                old.id,
                Some(old.addr.to_string()),
            );
            if self.evict_superseded {
                old.close();
            }
        }
        superseded
    }

    /// Link `conn` as a sender to the receiver registered under `code`.
    /// A miss leaves the registry untouched.
    pub async fn link_sender(
        &self,
        code: &PairingCode,
        conn: &ConnHandle,
    ) -> Result<PeerRef, LinkError> {
        let (target, released) = {
            let mut state = self.state.lock().await;
            let found = state.receivers.get(code).map(|r| r.handle.downgrade());
            let target = match found {
                Some(r) if r.id == conn.id => {
                    return Err(LinkError::SelfLink(code.clone()));
                }
                Some(r) => r,
                None => {
                    drop(state);
                    emit_pairing_event(
                        LogLevel::Info,
                        "sender_link_rejected",
                        Some(code),
                        conn.id,
                        Some(conn.addr.to_string()),
                    );
                    return Err(LinkError::InvalidCode(code.clone()));
                }
            };
            let released = state.release_role(conn.id);
            state.roles.insert(
                conn.id,
                Role::Sender(SenderLink {
                    sender: conn.clone(),
                    code: code.clone(),
                    receiver: target.clone(),
                }),
            );
            (target, released)
        };

        if let Some((old_code, addr)) = released {
            self.record_inactive(&old_code, addr);
        }
        emit_pairing_event(
            LogLevel::Info,
            "sender_linked",
            Some(code),
            conn.id,
            Some(conn.addr.to_string()),
        );
        self.audit.record(AuditEvent::Link {
            code: code.clone(),
            sender_addr: conn.addr.to_string(),
            time: unix_time(),
        });
        Ok(target)
    }

    pub async fn resolve_peer(&self, conn: ConnId) -> Resolution {
        let state = self.state.lock().await;
        match state.roles.get(&conn) {
            Some(Role::Sender(link)) => Resolution::Sender {
                target: link.receiver.clone(),
            },
            Some(Role::Receiver(_)) => {
                let targets = state
                    .roles
                    .values()
                    .filter_map(|role| match role {
                        Role::Sender(link) if link.receiver.id == conn => {
                            Some(link.sender.downgrade())
                        }
                        _ => None,
                    })
                    .collect();
                Resolution::Receiver { targets }
            }
            None => Resolution::Unknown,
        }
    }

    /// Remove `conn` from whichever role it held. Links pointing at a departed
    /// receiver are left in place; forwards through them fail with `Gone`.
    pub async fn unregister(&self, conn: &ConnHandle) -> Option<Unregistered> {
        let (outcome, released) = {
            let mut state = self.state.lock().await;
            let outcome = match state.roles.get(&conn.id)? {
                Role::Receiver(code) => Unregistered::Receiver {
                    code: code.clone(),
                    released: false,
                },
                Role::Sender(link) => Unregistered::Sender {
                    code: link.code.clone(),
                },
            };
            let released = state.release_role(conn.id);
            (outcome, released)
        };

        let outcome = match outcome {
            Unregistered::Receiver { code, .. } => Unregistered::Receiver {
                released: released.is_some(),
                code,
            },
            other => other,
        };
        match &outcome {
            Unregistered::Receiver { code, released } => {
                emit_pairing_event(
                    LogLevel::Info,
                    if *released {
                        "receiver_unregistered"
                    } else {
                        "receiver_unregistered_stale"
                    },
                    Some(code),
                    conn.id,
                    Some(conn.addr.to_string()),
                );
            }
            Unregistered::Sender { code } => {
                emit_pairing_event(
                    LogLevel::Info,
                    "sender_unlinked",
                    Some(code),
                    conn.id,
                    Some(conn.addr.to_string()),
                );
            }
        }
        if let Some((code, addr)) = released {
            self.record_inactive(&code, addr);
        }
        Some(outcome)
    }

    pub async fn role_of(&self, conn: ConnId) -> Option<RoleTag> {
        let state = self.state.lock().await;
        state.roles.get(&conn).map(|role| match role {
            Role::Receiver(code) => RoleTag::Receiver(code.clone()),
            Role::Sender(link) => RoleTag::Sender {
                code: link.code.clone(),
                receiver: link.receiver.id,
            },
        })
    }

    /// Connection currently bound to `code`, if any.
    pub async fn receiver_for(&self, code: &PairingCode) -> Option<ConnId> {
        self.state
            .lock()
            .await
            .receivers
            .get(code)
            .map(|r| r.handle.id)
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.lock().await;
        let mut codes: Vec<PairingCode> = state
            .receivers
            .values()
            .filter(|r| r.active)
            .map(|r| r.code.clone())
            .collect();
        codes.sort();
        let senders = state
            .roles
            .values()
            .filter(|r| matches!(r, Role::Sender(_)))
            .count();
        RegistrySnapshot {
            receivers: codes.len(),
            codes,
            senders,
        }
    }

    fn record_inactive(&self, code: &PairingCode, addr: SocketAddr) {
        self.audit.record(AuditEvent::Registration {
            code: code.clone(),
            receiver_addr: addr.to_string(),
            active: false,
            last_updated: unix_time(),
        });
    }
}
