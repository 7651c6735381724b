//! Central place for application-wide constants and default values.

/// Default application name (can be overridden in config)
pub const DEFAULT_APP_NAME: &str = "Linkium";

/// Left padding used to align log lines with those that include emoji prefixes.
/// Keep this to a fixed width matching the emoji prefix you use elsewhere.
pub const ICON_PLACEHOLDER: &str = "   "; // Three spaces for alignment

/// Protocol version for compatibility checks (bump when wire format changes)
pub const PROTOCOL_VERSION: &str = "1";

/// Application / crate version (populated from Cargo.toml via env! macro)
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default relay listen port.
pub const DEFAULT_PORT: u16 = 10000;

/// Default relay bind address.
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Seconds the receiver agent waits after losing its session before dialing again.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 3;

/// Number of decimal digits in a generated pairing code.
pub const PAIRING_CODE_DIGITS: u32 = 10;

/// Per-connection outbound frame queue depth.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 32;

/// Longest accepted inbound line; longer ones are dropped up to the next newline.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Wire strings for the control vocabulary.
pub const ROLE_RECEIVER: &str = "receiver";
pub const ROLE_SENDER: &str = "sender";
pub const STATUS_LINKED: &str = "linked";
pub const ERROR_INVALID_CODE: &str = "Invalid code";

/// Human friendly composite version string used in logs.
pub fn full_version() -> String {
    format!("v{} (protocol={})", APP_VERSION, PROTOCOL_VERSION)
}
