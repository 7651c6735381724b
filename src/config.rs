use crate::constants::*;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Address the relay listener binds to (default 0.0.0.0)
    pub bind: Option<String>,
    pub app_name: Option<String>,
    /// Logging / events configuration
    pub logging: Option<LoggingConfig>,
    /// Relay server behaviour
    pub relay: Option<RelayConfig>,
    /// Best-effort audit persistence
    pub audit: Option<AuditConfig>,
    /// Receiver agent settings (used by the receiver binary)
    pub receiver: Option<ReceiverConfig>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: Some(DEFAULT_BIND.to_string()),
            app_name: None,
            logging: None,
            relay: Some(RelayConfig::default()),
            audit: Some(AuditConfig::default()),
            receiver: Some(ReceiverConfig::default()),
        }
    }
}

impl Config {
    /// Load a TOML config file. A missing file yields the defaults; a file that
    /// exists but fails to parse is an error.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<(Self, bool)> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg = toml::from_str::<Config>(&content).map_err(|err| {
                    anyhow::anyhow!("failed to parse config file '{}': {}", path.display(), err)
                })?;
                Ok((cfg, true))
            }
            Err(_) => Ok((Config::default(), false)),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!(
            "{}:{}",
            self.bind.as_deref().unwrap_or(DEFAULT_BIND),
            self.port
        )
    }

    pub fn app_name(&self) -> &str {
        self.app_name.as_deref().unwrap_or(DEFAULT_APP_NAME)
    }

    pub fn relay(&self) -> RelayConfig {
        self.relay.clone().unwrap_or_default()
    }

    pub fn audit(&self) -> AuditConfig {
        self.audit.clone().unwrap_or_default()
    }

    pub fn receiver(&self) -> ReceiverConfig {
        self.receiver.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Path to JSON line event log (rotated). If unset, defaults to logs/linkium.jsonl
    pub json_path: Option<String>,
    /// Max size in bytes before rotation (default 5MB)
    pub json_max_bytes: Option<usize>,
    /// Number of rotated files to retain (default 3)
    pub json_rotate: Option<u32>,
    /// Disable console sink (default false)
    pub disable_console: Option<bool>,
    /// Minimum level printed to the console: trace | debug | info | warn | error
    pub console_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Depth of each connection's outbound frame queue
    pub outbound_queue: Option<usize>,
    /// Close a still-connected receiver when another connection registers its code
    pub evict_superseded: Option<bool>,
    /// Longest inbound line accepted, in bytes
    pub max_frame_bytes: Option<usize>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            outbound_queue: Some(DEFAULT_OUTBOUND_QUEUE),
            evict_superseded: Some(true),
            max_frame_bytes: Some(DEFAULT_MAX_FRAME_BYTES),
        }
    }
}

impl RelayConfig {
    pub fn outbound_queue(&self) -> usize {
        self.outbound_queue.unwrap_or(DEFAULT_OUTBOUND_QUEUE).max(1)
    }

    pub fn evict_superseded(&self) -> bool {
        self.evict_superseded.unwrap_or(true)
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes.unwrap_or(DEFAULT_MAX_FRAME_BYTES).max(64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    pub enabled: Option<bool>,
    /// Directory holding pairings.json and messages.jsonl
    pub dir: Option<String>,
    /// Pending audit records kept before new ones are dropped
    pub queue_capacity: Option<usize>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: Some(true),
            dir: Some("data/audit".to_string()),
            queue_capacity: Some(1024),
        }
    }
}

impl AuditConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn dir(&self) -> PathBuf {
        PathBuf::from(self.dir.clone().unwrap_or_else(|| "data/audit".into()))
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(1024).max(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverConfig {
    /// Relay address (host:port) the agent dials
    pub server: Option<String>,
    /// Directory for the persisted code and program list
    pub state_dir: Option<String>,
    pub code_file: Option<String>,
    pub apps_file: Option<String>,
    /// Delay before redialing after the session is lost
    pub retry_delay_secs: Option<u64>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            server: Some(format!("127.0.0.1:{}", DEFAULT_PORT)),
            state_dir: Some("data/receiver".to_string()),
            code_file: Some("receiver_code.json".to_string()),
            apps_file: Some("apps_data.json".to_string()),
            retry_delay_secs: Some(DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

impl ReceiverConfig {
    pub fn server(&self) -> String {
        self.server
            .clone()
            .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_PORT))
    }

    fn state_dir(&self) -> PathBuf {
        PathBuf::from(
            self.state_dir
                .clone()
                .unwrap_or_else(|| "data/receiver".into()),
        )
    }

    pub fn code_path(&self) -> PathBuf {
        self.state_dir().join(
            self.code_file
                .clone()
                .unwrap_or_else(|| "receiver_code.json".into()),
        )
    }

    pub fn apps_path(&self) -> PathBuf {
        self.state_dir().join(
            self.apps_file
                .clone()
                .unwrap_or_else(|| "apps_data.json".into()),
        )
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs.unwrap_or(DEFAULT_RETRY_DELAY_SECS))
    }
}
