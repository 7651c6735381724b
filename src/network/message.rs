// src/network/message.rs

use crate::constants::{ERROR_INVALID_CODE, ROLE_RECEIVER, ROLE_SENDER, STATUS_LINKED};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Opaque string of decimal digits identifying one receiver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairingCode(String);

impl PairingCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PairingCode {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PairingCode {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("empty frame")]
    Empty,
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("frame is not a JSON object")]
    NotObject,
    #[error("'{role}' envelope without a string 'code'")]
    MissingCode { role: &'static str },
}

/// One inbound unit, classified by its `role` field.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// `{role: "receiver", code}`
    Register { code: PairingCode },
    /// `{role: "sender", code}`
    Link { code: PairingCode },
    /// Anything else, forwarded verbatim.
    Relay(Map<String, Value>),
}

impl Envelope {
    pub fn parse(line: &str) -> Result<Self, EnvelopeError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(EnvelopeError::Empty);
        }
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;
        match value {
            Value::Object(obj) => Self::classify(obj),
            _ => Err(EnvelopeError::NotObject),
        }
    }

    fn classify(obj: Map<String, Value>) -> Result<Self, EnvelopeError> {
        let role = match obj.get("role").and_then(Value::as_str) {
            Some(ROLE_RECEIVER) => ROLE_RECEIVER,
            Some(ROLE_SENDER) => ROLE_SENDER,
            // Unrecognized or absent role: opaque payload.
            _ => return Ok(Envelope::Relay(obj)),
        };
        let code = obj
            .get("code")
            .and_then(Value::as_str)
            .map(PairingCode::from)
            .ok_or(EnvelopeError::MissingCode { role })?;
        Ok(if role == ROLE_RECEIVER {
            Envelope::Register { code }
        } else {
            Envelope::Link { code }
        })
    }

    /// Receiver registration frame.
    pub fn register(code: &PairingCode) -> Value {
        json!({ "role": ROLE_RECEIVER, "code": code })
    }

    /// Sender link request frame.
    pub fn link(code: &PairingCode) -> Value {
        json!({ "role": ROLE_SENDER, "code": code })
    }
}

/// Relay-generated responses to a link request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    Linked { code: PairingCode },
    InvalidCode,
}

impl ControlReply {
    pub fn to_value(&self) -> Value {
        match self {
            ControlReply::Linked { code } => json!({ "status": STATUS_LINKED, "code": code }),
            ControlReply::InvalidCode => json!({ "error": ERROR_INVALID_CODE }),
        }
    }

    pub fn to_line(&self) -> String {
        self.to_value().to_string()
    }

    /// Recognize a control reply on the client side.
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.get("status").and_then(Value::as_str) == Some(STATUS_LINKED) {
            let code = value.get("code").and_then(Value::as_str)?;
            return Some(ControlReply::Linked { code: code.into() });
        }
        if value.get("error").and_then(Value::as_str) == Some(ERROR_INVALID_CODE) {
            return Some(ControlReply::InvalidCode);
        }
        None
    }
}

/// Commands understood by the receiver agent; the relay never looks at them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetPrograms,
    Open { program: String },
    RegenerateCode,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("'open' without a string 'program'")]
    MissingProgram,
}

impl Command {
    /// `None` when the payload carries no `command` field at all.
    pub fn from_payload(payload: &Map<String, Value>) -> Option<Result<Self, CommandError>> {
        let name = payload.get("command")?;
        let name = match name.as_str() {
            Some(n) => n,
            None => return Some(Err(CommandError::Unknown(name.to_string()))),
        };
        Some(match name {
            "get_programs" => Ok(Command::GetPrograms),
            "regenerate_code" => Ok(Command::RegenerateCode),
            "open" => payload
                .get("program")
                .and_then(Value::as_str)
                .map(|p| Command::Open {
                    program: p.to_string(),
                })
                .ok_or(CommandError::MissingProgram),
            other => Err(CommandError::Unknown(other.to_string())),
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            Command::GetPrograms => json!({ "command": "get_programs" }),
            Command::Open { program } => json!({ "command": "open", "program": program }),
            Command::RegenerateCode => json!({ "command": "regenerate_code" }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramEntry {
    pub name: String,
    pub path: String,
}

/// Replies the receiver agent sends back through the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandReply {
    Programs { programs: Vec<ProgramEntry> },
    NewCode { new_code: PairingCode },
}

impl CommandReply {
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".into())
    }
}
