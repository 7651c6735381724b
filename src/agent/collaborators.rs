// src/agent/collaborators.rs
// Things the receiver agent depends on but does not own: code persistence,
// code generation, the program list, process launching and the UI hook.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::agent::AgentStatus;
use crate::constants::{ICON_PLACEHOLDER, PAIRING_CODE_DIGITS};
use crate::network::message::PairingCode;

#[derive(Debug, thiserror::Error)]
pub enum CodeStoreError {
    #[error("code store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("code store format: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to launch '{target}': {source}")]
    Spawn {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

pub trait CodeStore: Send + Sync {
    /// `Ok(None)` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<PairingCode>, CodeStoreError>;
    fn save(&self, code: &PairingCode) -> Result<(), CodeStoreError>;
}

pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> PairingCode;

    /// Draw until the result differs from `current` (bounded attempts).
    fn generate_fresh(&self, current: &PairingCode) -> PairingCode {
        let mut code = self.generate();
        for _ in 0..32 {
            if &code != current {
                break;
            }
            code = self.generate();
        }
        code
    }
}

pub trait ProgramCatalog: Send + Sync {
    /// Program name → launch target, read fresh on every call.
    fn programs(&self) -> BTreeMap<String, String>;
}

pub trait ProcessExecutor: Send + Sync {
    fn launch(&self, name: &str, target: &str) -> Result<(), LaunchError>;
}

/// Presentation-layer hook. All methods default to no-ops.
pub trait AgentObserver: Send + Sync {
    fn status_changed(&self, _status: AgentStatus) {}
    fn code_changed(&self, _code: &PairingCode) {}
    fn log(&self, _message: &str) {}
}

#[derive(Serialize, Deserialize)]
struct CodeFile {
    code: PairingCode,
}

/// `{"code": "..."}` stored in a single JSON file.
pub struct FileCodeStore {
    path: PathBuf,
}

impl FileCodeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CodeStore for FileCodeStore {
    fn load(&self) -> Result<Option<PairingCode>, CodeStoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => {
                let file: CodeFile = serde_json::from_slice(&bytes)?;
                Ok(Some(file.code))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, code: &PairingCode) -> Result<(), CodeStoreError> {
        let data = serde_json::to_vec(&CodeFile { code: code.clone() })?;
        write_atomic(&self.path, &data)?;
        Ok(())
    }
}

/// Uniform 10-digit decimal codes.
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> PairingCode {
        let low = 10u64.pow(PAIRING_CODE_DIGITS - 1);
        let high = 10u64.pow(PAIRING_CODE_DIGITS);
        PairingCode::new(rand::thread_rng().gen_range(low..high).to_string())
    }
}

/// `{"apps": {name: path}}`; the older `{"apps": [{name, path}]}` layout is
/// accepted and rewritten in place.
pub struct JsonProgramCatalog {
    path: PathBuf,
}

impl JsonProgramCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create an empty catalog file if none exists.
    pub fn ensure_exists(&self) -> std::io::Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        write_atomic(&self.path, br#"{"apps": {}}"#)
    }

    pub fn save(&self, apps: &BTreeMap<String, String>) -> std::io::Result<()> {
        let data = serde_json::to_vec_pretty(&serde_json::json!({ "apps": apps }))
            .map_err(std::io::Error::other)?;
        write_atomic(&self.path, &data)
    }

    fn read(&self) -> Option<BTreeMap<String, String>> {
        let bytes = std::fs::read(&self.path).ok()?;
        let doc: Value = serde_json::from_slice(&bytes).ok()?;
        match doc.get("apps")? {
            Value::Object(map) => Some(
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|p| (k.clone(), p.to_string())))
                    .collect(),
            ),
            Value::Array(list) => {
                let fixed: BTreeMap<String, String> = list
                    .iter()
                    .filter_map(|a| {
                        let name = a.get("name")?.as_str()?;
                        let path = a.get("path")?.as_str()?;
                        Some((name.to_string(), path.to_string()))
                    })
                    .collect();
                if let Err(e) = self.save(&fixed) {
                    eprintln!("⚠️ Could not rewrite legacy app list: {}", e);
                }
                Some(fixed)
            }
            _ => None,
        }
    }
}

impl ProgramCatalog for JsonProgramCatalog {
    fn programs(&self) -> BTreeMap<String, String> {
        self.read().unwrap_or_default()
    }
}

/// Launches targets through the platform shell, detached.
pub struct ShellExecutor;

impl ProcessExecutor for ShellExecutor {
    fn launch(&self, _name: &str, target: &str) -> Result<(), LaunchError> {
        #[cfg(windows)]
        let mut cmd = {
            let mut c = tokio::process::Command::new("cmd");
            c.arg("/C").arg(target);
            c
        };
        #[cfg(not(windows))]
        let mut cmd = {
            let mut c = tokio::process::Command::new("sh");
            c.arg("-c").arg(target);
            c
        };
        cmd.stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map(|_child| ())
            .map_err(|source| LaunchError::Spawn {
                target: target.to_string(),
                source,
            })
    }
}

/// Prints status and code changes to stdout.
pub struct ConsoleObserver;

impl AgentObserver for ConsoleObserver {
    fn status_changed(&self, status: AgentStatus) {
        let icon = match status {
            AgentStatus::Connected => "🟢",
            AgentStatus::Connecting => "🟡",
            AgentStatus::Disconnected => "🔴",
        };
        println!("{} {:?}", icon, status);
    }

    fn code_changed(&self, code: &PairingCode) {
        println!("🔑 Pairing code: {}", code);
        println!("{}Share this code with the sending device.", ICON_PLACEHOLDER);
    }

    fn log(&self, message: &str) {
        println!("{}{}", ICON_PLACEHOLDER, message);
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}
