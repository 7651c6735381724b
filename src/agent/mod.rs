// src/agent/mod.rs
//! Receiver-side agent: keeps one session to the relay registered under the
//! current pairing code, answers commands and rotates the code on request.
//!
//! The agent runs as a single task. Everything outside it (a UI, a signal
//! handler, a test) talks to it through an [`AgentHandle`].

pub mod collaborators;

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

pub use collaborators::{
    AgentObserver, CodeGenerator, CodeStore, CodeStoreError, ConsoleObserver, FileCodeStore,
    JsonProgramCatalog, LaunchError, ProcessExecutor, ProgramCatalog, RandomCodeGenerator,
    ShellExecutor,
};

use crate::events::{
    dispatcher,
    model::{AgentEvent, LogEvent, LogLevel},
};
use crate::network::client::{ClientError, RelayConnection};
use crate::network::message::{Command, CommandReply, PairingCode, ProgramEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// External collaborators of the agent.
#[derive(Clone)]
pub struct AgentDeps {
    pub codes: Arc<dyn CodeStore>,
    pub generator: Arc<dyn CodeGenerator>,
    pub catalog: Arc<dyn ProgramCatalog>,
    pub executor: Arc<dyn ProcessExecutor>,
    pub observer: Arc<dyn AgentObserver>,
}

struct Shared {
    deps: AgentDeps,
    code: Mutex<PairingCode>,
    status: watch::Sender<AgentStatus>,
    reconnect: Notify,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn current_code(&self) -> PairingCode {
        self.code.lock().clone()
    }

    fn set_status(&self, status: AgentStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            self.deps.observer.status_changed(status);
        }
    }

    /// Replace the held code, persist it and tell the observer.
    fn adopt_code(&self, code: PairingCode) -> Result<(), CodeStoreError> {
        self.deps.codes.save(&code)?;
        *self.code.lock() = code.clone();
        self.deps.observer.code_changed(&code);
        emit_agent_event(LogLevel::Info, "code_changed", Some(&code), None);
        Ok(())
    }

    fn regenerate(&self) -> Result<PairingCode, CodeStoreError> {
        let current = self.current_code();
        let fresh = self.deps.generator.generate_fresh(&current);
        self.adopt_code(fresh.clone())?;
        Ok(fresh)
    }

    fn stopped(&self) -> bool {
        *self.shutdown.borrow()
    }
}

fn emit_agent_event(
    level: LogLevel,
    action: &str,
    code: Option<&PairingCode>,
    detail: Option<String>,
) {
    dispatcher::emit(LogEvent::Agent(AgentEvent {
        meta: dispatcher::meta("agent", level),
        action: action.to_string(),
        code: code.map(|c| c.to_string()),
        detail,
    }));
}

async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    let orphaned = rx.wait_for(|stop| *stop).await.is_err();
    if orphaned {
        // Sender gone: nobody can stop us any more.
        std::future::pending::<()>().await;
    }
}

/// Control surface for a running agent. Cheap to clone.
#[derive(Clone)]
pub struct AgentHandle {
    shared: Arc<Shared>,
}

impl AgentHandle {
    pub fn code(&self) -> PairingCode {
        self.shared.current_code()
    }

    pub fn status(&self) -> AgentStatus {
        *self.shared.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<AgentStatus> {
        self.shared.status.subscribe()
    }

    /// Drop the current session and reconnect at once, optionally under a
    /// new code.
    pub fn trigger_reconnect(&self, new_code: Option<PairingCode>) -> Result<(), CodeStoreError> {
        if let Some(code) = new_code {
            self.shared.adopt_code(code)?;
        }
        self.shared.reconnect.notify_one();
        Ok(())
    }

    /// Local "regenerate code" action: same effect as the remote command.
    pub fn regenerate(&self) -> Result<PairingCode, CodeStoreError> {
        let code = self.shared.regenerate()?;
        self.shared.reconnect.notify_one();
        Ok(code)
    }

    pub fn stop(&self) {
        self.shared.shutdown.send_replace(true);
    }
}

enum SessionEnd {
    Shutdown,
    Reconnect,
    Lost(String),
}

enum Flow {
    Continue,
    Reconnect,
}

pub struct ReceiverAgent {
    server: String,
    retry_delay: Duration,
    shared: Arc<Shared>,
}

impl ReceiverAgent {
    /// Load the persisted code, or generate and save one when there is none
    /// (or the stored one is unreadable).
    pub fn new(
        server: impl Into<String>,
        retry_delay: Duration,
        deps: AgentDeps,
    ) -> Result<Self, CodeStoreError> {
        let code = match deps.codes.load() {
            Ok(Some(code)) => code,
            Ok(None) => {
                let code = deps.generator.generate();
                deps.codes.save(&code)?;
                code
            }
            Err(e) => {
                emit_agent_event(LogLevel::Warn, "code_load_failed", None, Some(e.to_string()));
                let code = deps.generator.generate();
                deps.codes.save(&code)?;
                code
            }
        };
        let (status, _) = watch::channel(AgentStatus::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            server: server.into(),
            retry_delay,
            shared: Arc::new(Shared {
                deps,
                code: Mutex::new(code),
                status,
                reconnect: Notify::new(),
                shutdown,
            }),
        })
    }

    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            shared: self.shared.clone(),
        }
    }

    /// Run until [`AgentHandle::stop`] is called. Transport failures are
    /// retried forever after the retry delay.
    pub async fn run(self) {
        let shared = self.shared.clone();
        let mut shutdown = shared.shutdown.subscribe();
        shared.deps.observer.code_changed(&shared.current_code());

        while !shared.stopped() {
            shared.set_status(AgentStatus::Connecting);
            let end = self.connect_once(&mut shutdown).await;
            shared.set_status(AgentStatus::Disconnected);
            match end {
                SessionEnd::Shutdown => break,
                SessionEnd::Reconnect => {
                    emit_agent_event(
                        LogLevel::Info,
                        "reconnect_requested",
                        Some(&shared.current_code()),
                        None,
                    );
                }
                SessionEnd::Lost(reason) => {
                    emit_agent_event(LogLevel::Warn, "connection_lost", None, Some(reason));
                    tokio::select! {
                        _ = wait_shutdown(&mut shutdown) => break,
                        _ = shared.reconnect.notified() => {}
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }
        emit_agent_event(LogLevel::Info, "agent_stopped", None, None);
    }

    async fn connect_once(&self, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        let shared = &self.shared;
        let connecting = RelayConnection::connect(&self.server);
        let mut conn = tokio::select! {
            _ = wait_shutdown(shutdown) => return SessionEnd::Shutdown,
            _ = shared.reconnect.notified() => return SessionEnd::Reconnect,
            res = connecting => match res {
                Ok(conn) => conn,
                Err(e) => return SessionEnd::Lost(e.to_string()),
            },
        };

        let code = shared.current_code();
        if let Err(e) = conn.register(&code).await {
            return SessionEnd::Lost(e.to_string());
        }
        shared.set_status(AgentStatus::Connected);
        emit_agent_event(
            LogLevel::Info,
            "registered",
            Some(&code),
            Some(self.server.clone()),
        );

        loop {
            tokio::select! {
                biased;
                _ = wait_shutdown(shutdown) => {
                    conn.shutdown().await;
                    return SessionEnd::Shutdown;
                }
                _ = shared.reconnect.notified() => {
                    conn.shutdown().await;
                    return SessionEnd::Reconnect;
                }
                line = conn.next_line() => match line {
                    Ok(Some(line)) => match self.handle_line(&mut conn, &line).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Reconnect) => {
                            conn.shutdown().await;
                            return SessionEnd::Reconnect;
                        }
                        Err(e) => return SessionEnd::Lost(e.to_string()),
                    },
                    Ok(None) => return SessionEnd::Lost("relay closed the connection".into()),
                    Err(e) => return SessionEnd::Lost(e.to_string()),
                },
            }
        }
    }

    async fn handle_line(
        &self,
        conn: &mut RelayConnection,
        line: &str,
    ) -> Result<Flow, ClientError> {
        let payload = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => map,
            _ => {
                emit_agent_event(LogLevel::Debug, "ignored_line", None, Some(line.to_string()));
                return Ok(Flow::Continue);
            }
        };
        let command = match Command::from_payload(&payload) {
            None => {
                // Control replies and anything else without a command field.
                emit_agent_event(LogLevel::Debug, "ignored_payload", None, Some(line.to_string()));
                return Ok(Flow::Continue);
            }
            Some(Err(e)) => {
                emit_agent_event(LogLevel::Warn, "bad_command", None, Some(e.to_string()));
                return Ok(Flow::Continue);
            }
            Some(Ok(command)) => command,
        };
        self.execute(conn, command).await
    }

    async fn execute(
        &self,
        conn: &mut RelayConnection,
        command: Command,
    ) -> Result<Flow, ClientError> {
        let deps = &self.shared.deps;
        match command {
            Command::GetPrograms => {
                let programs = deps
                    .catalog
                    .programs()
                    .into_iter()
                    .map(|(name, path)| ProgramEntry { name, path })
                    .collect::<Vec<_>>();
                emit_agent_event(
                    LogLevel::Info,
                    "get_programs",
                    None,
                    Some(format!("count={}", programs.len())),
                );
                conn.send_raw(&CommandReply::Programs { programs }.to_line())
                    .await?;
                Ok(Flow::Continue)
            }
            Command::Open { program } => {
                let outcome = match deps.catalog.programs().get(&program) {
                    Some(target) => deps
                        .executor
                        .launch(&program, target)
                        .map_err(|e| e.to_string()),
                    None => Err(format!("unknown program '{}'", program)),
                };
                match outcome {
                    Ok(()) => {
                        deps.observer.log(&format!("Opened {}", program));
                        emit_agent_event(LogLevel::Info, "program_launched", None, Some(program));
                    }
                    Err(reason) => {
                        deps.observer.log(&reason);
                        emit_agent_event(LogLevel::Warn, "open_failed", None, Some(reason));
                    }
                }
                Ok(Flow::Continue)
            }
            Command::RegenerateCode => match self.shared.regenerate() {
                Ok(new_code) => {
                    conn.send_raw(&CommandReply::NewCode { new_code }.to_line())
                        .await?;
                    Ok(Flow::Reconnect)
                }
                Err(e) => {
                    emit_agent_event(
                        LogLevel::Error,
                        "regenerate_failed",
                        None,
                        Some(e.to_string()),
                    );
                    Ok(Flow::Continue)
                }
            },
        }
    }
}
