//! Wire protocol shared between the world server and its clients.
//!
//! Every application message travels inside one WebSocket frame and starts
//! with a two byte big-endian event code; the rest of the frame is the
//! payload, interpreted according to the code.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 600.0;
pub const PLAYER_SIZE: f32 = 32.0;
pub const PLAYER_SPEED: f32 = 300.0;

/// Length of the event code header that prefixes every message.
pub const HEADER_LEN: usize = 2;

/// Well-known event codes.
pub mod codes {
    /// Client -> server: desired movement direction, payload is a [`super::MoveInput`].
    pub const MOVE: u16 = 0x0010;
    /// Server -> client: per-tick snapshot, payload is a [`super::PlayerFrame`].
    pub const PLAYER_FRAME: u16 = 0x8001;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message of {len} bytes is shorter than the 2 byte header")]
    TooShort { len: usize },
    #[error("expected event code {expected:#06x}, got {actual:#06x}")]
    UnexpectedCode { expected: u16, actual: u16 },
    #[error("malformed payload: {0}")]
    Payload(String),
}

impl From<bincode::Error> for DecodeError {
    fn from(err: bincode::Error) -> Self {
        DecodeError::Payload(err.to_string())
    }
}

/// A decoded inbound message: event code plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedEvent {
    pub code: u16,
    pub payload: Vec<u8>,
}

impl SerializedEvent {
    pub fn new(code: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    /// Splits a raw frame into its header and payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::TooShort { len: bytes.len() });
        }

        let code = u16::from_be_bytes([bytes[0], bytes[1]]);
        Ok(Self {
            code,
            payload: bytes[HEADER_LEN..].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_message(self.code, &self.payload)
    }
}

/// Prefixes `payload` with the big-endian `code` header.
pub fn encode_message(code: u16, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&code.to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Movement intent sent by a client. The server normalizes the direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveInput {
    pub x: f32,
    pub y: f32,
}

impl MoveInput {
    pub fn to_payload(&self) -> Result<Vec<u8>, DecodeError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(bincode::deserialize(payload)?)
    }

    /// Full message, header included, ready to be sent by a client.
    pub fn to_message(&self) -> Result<Vec<u8>, DecodeError> {
        Ok(encode_message(codes::MOVE, &self.to_payload()?))
    }
}

/// Snapshot of one player, broadcast to its owner every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerFrame {
    pub tick: u32,
    /// Packed generational entity id: `generation << 32 | index`.
    pub entity: u64,
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
}

impl PlayerFrame {
    pub fn to_message(&self) -> Result<Vec<u8>, DecodeError> {
        let payload = bincode::serialize(self)?;
        Ok(encode_message(codes::PLAYER_FRAME, &payload))
    }

    /// Parses a full frame message as received by a client.
    pub fn from_message(bytes: &[u8]) -> Result<Self, DecodeError> {
        let event = SerializedEvent::decode(bytes)?;
        if event.code != codes::PLAYER_FRAME {
            return Err(DecodeError::UnexpectedCode {
                expected: codes::PLAYER_FRAME,
                actual: event.code,
            });
        }
        Ok(bincode::deserialize(&event.payload)?)
    }
}
