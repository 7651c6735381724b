use crate::events::{
    dispatcher,
    model::{LogEvent, LogLevel, NetworkEvent, PairingEvent},
};
use crate::network::message::PairingCode;

/// Emit a structured network event with optional console output suppression.
pub(crate) fn emit_network_event(
    component: &'static str,
    level: LogLevel,
    action: &str,
    addr: Option<String>,
    detail: Option<String>,
    allow_console: bool,
) {
    let mut meta = dispatcher::meta(component, level);
    meta.corr_id = Some(dispatcher::correlation_id());
    if !allow_console {
        meta.suppress_console = true;
    }
    dispatcher::emit(LogEvent::Network(NetworkEvent {
        meta,
        action: action.to_string(),
        addr,
        detail,
    }));
}

pub(crate) fn emit_pairing_event(
    level: LogLevel,
    action: &str,
    code: Option<&PairingCode>,
    conn_id: u64,
    addr: Option<String>,
) {
    let meta = dispatcher::meta("registry", level);
    dispatcher::emit(LogEvent::Pairing(PairingEvent {
        meta,
        action: action.to_string(),
        code: code.map(|c| c.to_string()),
        conn_id,
        addr,
    }));
}
