//! JSON wire protocol between clients and the server.
//!
//! Binary WebSocket frames carry raw PCM and are not represented here; every
//! textual message is a tagged JSON object. Unknown tags fail to parse and
//! are logged and dropped by the hub without touching the session.

use crate::dispatch::VolumeCommand;
use crate::resilience::Warning;
use crate::stt::Transcript;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages clients send to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Liveness signal; echoed back by the server.
    Heartbeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<serde_json::Value>,
    },
    /// Client-side settings blob; forwarded as an event, ignored by the core.
    Config {
        payload: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<serde_json::Value>,
    },
}

impl ClientMessage {
    /// Deserialize a client message from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Ack payload confirming a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    pub client_id: Uuid,
    pub status: String,
}

/// Messages the server sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ack {
        payload: AckPayload,
        timestamp: DateTime<Utc>,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    Transcript {
        payload: Transcript,
        timestamp: DateTime<Utc>,
    },
    VolumeAction {
        payload: VolumeCommand,
        timestamp: DateTime<Utc>,
        #[serde(rename = "clientId")]
        client_id: Uuid,
    },
    Warning {
        payload: Warning,
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    /// Connection ack for a fresh session.
    pub fn ack(client_id: Uuid) -> Self {
        Self::Ack {
            payload: AckPayload {
                client_id,
                status: "connected".to_string(),
            },
            timestamp: Utc::now(),
        }
    }

    /// Heartbeat echo.
    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now(),
        }
    }

    /// Transcript notification (partial or final).
    pub fn transcript(transcript: Transcript) -> Self {
        Self::Transcript {
            payload: transcript,
            timestamp: Utc::now(),
        }
    }

    /// Volume command addressed to one client.
    pub fn volume_action(command: VolumeCommand, client_id: Uuid) -> Self {
        Self::VolumeAction {
            payload: command,
            timestamp: Utc::now(),
            client_id,
        }
    }

    /// Degraded-operation warning.
    pub fn warning(warning: Warning) -> Self {
        Self::Warning {
            payload: warning,
            timestamp: Utc::now(),
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
