// src/audit/file.rs
// Pairing records kept as one JSON document keyed by code; relay traffic appended as JSON lines.

use super::{AuditError, AuditEvent, AuditSink};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt as _;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairingRecord {
    pub code: String,
    pub receiver_addr: Option<String>,
    pub active: bool,
    pub last_updated: f64,
    #[serde(default)]
    pub senders: Vec<SenderRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderRecord {
    pub addr: String,
    pub time: f64,
}

pub struct FileAuditSink {
    pairings_path: PathBuf,
    messages_path: PathBuf,
    pairings: Mutex<BTreeMap<String, PairingRecord>>,
    messages: Mutex<fs::File>,
}

impl FileAuditSink {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, AuditError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let pairings_path = dir.join("pairings.json");
        let messages_path = dir.join("messages.jsonl");
        // A corrupt pairings file is replaced on the next write rather than blocking startup.
        let pairings = match fs::read(&pairings_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => BTreeMap::new(),
        };
        let messages = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&messages_path)
            .await?;
        Ok(Self {
            pairings_path,
            messages_path,
            pairings: Mutex::new(pairings),
            messages: Mutex::new(messages),
        })
    }

    pub fn pairings_path(&self) -> &Path {
        &self.pairings_path
    }

    pub fn messages_path(&self) -> &Path {
        &self.messages_path
    }

    pub async fn pairing(&self, code: &str) -> Option<PairingRecord> {
        self.pairings.lock().await.get(code).cloned()
    }

    async fn persist(&self, map: &BTreeMap<String, PairingRecord>) -> Result<(), AuditError> {
        let data = serde_json::to_vec_pretty(map)?;
        let tmp = self.pairings_path.with_extension("json.tmp");
        let mut f = fs::File::create(&tmp).await?;
        f.write_all(&data).await?;
        f.flush().await?;
        fs::rename(&tmp, &self.pairings_path).await?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        match event {
            AuditEvent::Registration {
                code,
                receiver_addr,
                active,
                last_updated,
            } => {
                let mut map = self.pairings.lock().await;
                let rec = map
                    .entry(code.to_string())
                    .or_insert_with(|| PairingRecord {
                        code: code.to_string(),
                        ..Default::default()
                    });
                rec.receiver_addr = Some(receiver_addr.clone());
                rec.active = *active;
                rec.last_updated = *last_updated;
                self.persist(&map).await
            }
            AuditEvent::Link {
                code,
                sender_addr,
                time,
            } => {
                let mut map = self.pairings.lock().await;
                let rec = map
                    .entry(code.to_string())
                    .or_insert_with(|| PairingRecord {
                        code: code.to_string(),
                        ..Default::default()
                    });
                rec.senders.push(SenderRecord {
                    addr: sender_addr.clone(),
                    time: *time,
                });
                self.persist(&map).await
            }
            AuditEvent::Relay { .. } => {
                let mut line = serde_json::to_string(event)?;
                line.push('\n');
                let mut file = self.messages.lock().await;
                file.write_all(line.as_bytes()).await?;
                file.flush().await?;
                Ok(())
            }
        }
    }
}
