// src/network/client.rs
// Client side of the newline-delimited JSON wire: used by the receiver agent,
// the sender CLI and the integration tests.

use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::events::model::LogLevel;
use crate::network::events::emit_network_event;
use crate::network::message::{ControlReply, Envelope, PairingCode};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("relay closed the connection")]
    Closed,
    #[error("timed out waiting for the relay")]
    Timeout,
    #[error("link rejected: invalid code")]
    InvalidCode,
    #[error("unexpected reply: {0}")]
    Unexpected(String),
}

pub struct RelayConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    buf: Vec<u8>,
}

impl RelayConnection {
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;
        let _ = stream.set_nodelay(true);
        emit_network_event(
            "client",
            LogLevel::Debug,
            "tcp_connected",
            Some(peer.to_string()),
            None,
            true,
        );
        let (r, w) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(r),
            writer: w,
            buf: Vec::new(),
        })
    }

    pub async fn send(&mut self, value: &Value) -> Result<(), ClientError> {
        self.send_raw(&value.to_string()).await
    }

    /// Write one line as-is (a newline is appended).
    pub async fn send_raw(&mut self, line: &str) -> Result<(), ClientError> {
        let mut frame = String::with_capacity(line.len() + 1);
        frame.push_str(line);
        frame.push('\n');
        self.writer.write_all(frame.as_bytes()).await?;
        Ok(())
    }

    /// Next raw line without its terminator; `None` once the relay closes.
    /// Partially read bytes survive cancellation, so this is safe in `select!`.
    pub async fn next_line(&mut self) -> Result<Option<String>, ClientError> {
        loop {
            let n = self.reader.read_until(b'\n', &mut self.buf).await?;
            if n == 0 && !self.buf.ends_with(b"\n") {
                return Ok(None);
            }
            let line = String::from_utf8_lossy(&self.buf).trim().to_string();
            self.buf.clear();
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
    }

    /// Next line that parses as JSON; other lines are skipped.
    pub async fn recv_json(&mut self) -> Result<Value, ClientError> {
        loop {
            let line = self.next_line().await?.ok_or(ClientError::Closed)?;
            if let Ok(value) = serde_json::from_str::<Value>(&line) {
                return Ok(value);
            }
        }
    }

    pub async fn recv_json_timeout(&mut self, wait: Duration) -> Result<Value, ClientError> {
        tokio::time::timeout(wait, self.recv_json())
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    pub async fn register(&mut self, code: &PairingCode) -> Result<(), ClientError> {
        self.send(&Envelope::register(code)).await
    }

    /// Send a link request and wait for the relay's verdict.
    pub async fn link(&mut self, code: &PairingCode, wait: Duration) -> Result<(), ClientError> {
        self.send(&Envelope::link(code)).await?;
        let reply = self.recv_json_timeout(wait).await?;
        match ControlReply::from_value(&reply) {
            Some(ControlReply::Linked { .. }) => Ok(()),
            Some(ControlReply::InvalidCode) => Err(ClientError::InvalidCode),
            None => Err(ClientError::Unexpected(reply.to_string())),
        }
    }

    pub async fn shutdown(mut self) {
        let _ = self.writer.shutdown().await;
    }
}
