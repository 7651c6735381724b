use serde::Serialize;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    pub(crate) fn rank(self) -> u8 {
        match self {
            LogLevel::Trace => 0,
            LogLevel::Debug => 1,
            LogLevel::Info => 2,
            LogLevel::Warn => 3,
            LogLevel::Error => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventMeta {
    pub ts: SystemTime,
    pub level: LogLevel,
    pub corr_id: Option<String>,
    pub session_id: String,
    pub component: &'static str,
    pub suppress_console: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkEvent {
    pub meta: EventMeta,
    pub action: String,
    pub addr: Option<String>,
    pub detail: Option<String>,
}

/// Registry mutations: register, supersede, link, unlink, unregister.
#[derive(Debug, Clone, Serialize)]
pub struct PairingEvent {
    pub meta: EventMeta,
    pub action: String,
    pub code: Option<String>,
    pub conn_id: u64,
    pub addr: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayEvent {
    pub meta: EventMeta,
    pub direction: String,
    pub from_addr: String,
    pub delivered: usize,
    pub failed: usize,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentEvent {
    pub meta: EventMeta,
    pub action: String,
    pub code: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemEvent {
    pub meta: EventMeta,
    pub action: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    Network(NetworkEvent),
    Pairing(PairingEvent),
    Relay(RelayEvent),
    Agent(AgentEvent),
    System(SystemEvent),
}

impl LogEvent {
    pub fn meta(&self) -> &EventMeta {
        match self {
            LogEvent::Network(e) => &e.meta,
            LogEvent::Pairing(e) => &e.meta,
            LogEvent::Relay(e) => &e.meta,
            LogEvent::Agent(e) => &e.meta,
            LogEvent::System(e) => &e.meta,
        }
    }
}
