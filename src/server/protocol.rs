// src/server/protocol.rs

//! Newline-delimited JSON frames exchanged with clients.
//!
//! Client → server:
//! - `{"type":"submit","code":"...","language":"c"}` (`language` optional)
//! - `{"type":"input","data":"..."}`
//!
//! Server → client:
//! - `{"type":"system","message":"..."}`
//! - `{"type":"output","run_id":1,"seq":0,"channel":"stdout","data":"..."}`
//! - `{"type":"finished","run_id":1,"exit_code":0,"signal":null}`
//! - `{"type":"error","kind":"session_busy","message":"..."}`

use serde::{Deserialize, Serialize};

use crate::errors::{LiverunError, Result};
use crate::session::{ClientEvent, OutputEvent, ServerEvent};
use crate::types::Channel;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Submit {
        code: String,
        #[serde(default)]
        language: Option<String>,
    },
    Input {
        data: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    System {
        message: String,
    },
    Output {
        run_id: u64,
        seq: u64,
        channel: Channel,
        /// Output bytes, decoded lossily as UTF-8.
        data: String,
    },
    Finished {
        run_id: u64,
        exit_code: Option<i32>,
        signal: Option<i32>,
    },
    Error {
        kind: String,
        message: String,
    },
}

impl From<ClientFrame> for ClientEvent {
    fn from(frame: ClientFrame) -> Self {
        match frame {
            ClientFrame::Submit { code, language } => ClientEvent::Submit { code, language },
            ClientFrame::Input { data } => ClientEvent::Input(data.into_bytes()),
        }
    }
}

impl From<ServerEvent> for ServerFrame {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::System(message) => ServerFrame::System { message },
            ServerEvent::Output(OutputEvent {
                run_id,
                seq,
                channel,
                data,
            }) => ServerFrame::Output {
                run_id,
                seq,
                channel,
                data: String::from_utf8_lossy(&data).into_owned(),
            },
            ServerEvent::Finished { run_id, exit } => ServerFrame::Finished {
                run_id,
                exit_code: exit.code(),
                signal: exit.signal(),
            },
            ServerEvent::Error { kind, message } => ServerFrame::Error { kind, message },
        }
    }
}

impl ServerFrame {
    /// Error frame for a request that could not be handled.
    pub fn from_error(err: &LiverunError) -> Self {
        ServerFrame::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Parse one line received from a client.
pub fn decode_line(line: &str) -> Result<ClientFrame> {
    let line = line.trim();
    if line.is_empty() {
        return Err(LiverunError::ProtocolError("empty frame".to_string()));
    }
    serde_json::from_str(line)
        .map_err(|e| LiverunError::ProtocolError(format!("malformed frame: {e}")))
}

/// Serialize a frame as one line, including the trailing newline.
pub fn encode(frame: &ServerFrame) -> Result<String> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}
