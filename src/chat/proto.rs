//! Wire protocol for the chat application, carried as JSON payloads over
//! the reliable transport's `send`/`recv`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    Login { username: String },
    Join { room: String },
    Leave { room: String },
    Room { room: String, body: String },
    Direct { to: String, body: String },
    Quit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    Welcome { username: String },
    Error { reason: String },
    Joined { room: String },
    Left { room: String },
    History { room: String, lines: Vec<String> },
    RoomMessage { room: String, from: String, body: String },
    Direct { from: String, body: String },
}

impl ClientMessage {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("ClientMessage always serializes")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("ServerMessage always serializes")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
