//! COVIDSafe characteristic payload decoding.
//!
//! A peripheral answers a characteristic read with a small JSON document:
//!
//! ```json
//! {"modelP": "SM-G973F", "v": 2, "msg": "<base64>"}
//! ```
//!
//! Version 1 messages are opaque strings. Version 2 messages are base64 of a
//! fixed binary layout, split here into five hex fields:
//!
//! | bytes            | field      |
//! |------------------|------------|
//! | `[0, 1)`         | pubkey y   |
//! | `[1, 33)`        | pubkey x   |
//! | `[33, 35)`       | counter    |
//! | `[35, len - 16)` | ciphertext |
//! | `[len - 16, len)`| MAC        |

use crate::reader::{RawPayload, ReadError, ReadFailure};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

const PUBKEY_Y_LEN: usize = 1;
const PUBKEY_X_LEN: usize = 32;
const COUNTER_LEN: usize = 2;
const MAC_LEN: usize = 16;
const MIN_CIPHERTEXT_LEN: usize = 32;

/// Smallest accepted v2 message, in bytes (166 hex characters).
pub const MIN_V2_LEN: usize =
    PUBKEY_Y_LEN + PUBKEY_X_LEN + COUNTER_LEN + MIN_CIPHERTEXT_LEN + MAC_LEN;

/// Errors returned when decoding a device message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A v2 message shorter than [`MIN_V2_LEN`] bytes
    #[error("v2 message too short: {len} hex characters (need at least {})", MIN_V2_LEN * 2)]
    TooShort { len: usize },
    /// Message version other than 1 or 2
    #[error("unknown message version {0}")]
    UnknownVersion(i64),
    /// A v2 message that is not valid base64
    #[error("invalid base64 message: {0}")]
    InvalidBase64(String),
}

/// The JSON document a COVIDSafe peripheral exposes through its characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DevicePayload {
    /// Phone model reported by the app
    #[serde(rename = "modelP")]
    pub model: String,
    /// Message format version
    #[serde(rename = "v")]
    pub version: i64,
    /// Encoded message
    #[serde(rename = "msg")]
    pub message: String,
}

impl DevicePayload {
    /// Validate a characteristic read against the expected JSON schema.
    pub fn from_raw(raw: &RawPayload) -> Result<Self, ReadError> {
        serde_json::from_slice(&raw.bytes).map_err(|e| ReadError::DeviceUnreachable {
            address: raw.source_address.clone(),
            cause: ReadFailure::MalformedDeviceJson(e.to_string()),
        })
    }
}

/// Structured fields of a version 2 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2Message {
    pub pubkey_y: u8,
    pub pubkey_x: [u8; PUBKEY_X_LEN],
    pub counter: [u8; COUNTER_LEN],
    pub ciphertext: Vec<u8>,
    pub mac: [u8; MAC_LEN],
}

impl V2Message {
    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < MIN_V2_LEN {
            return Err(DecodeError::TooShort {
                len: bytes.len() * 2,
            });
        }

        let (head, mac) = bytes.split_at(bytes.len() - MAC_LEN);
        let (pubkey_y, rest) = head.split_at(PUBKEY_Y_LEN);
        let (pubkey_x, rest) = rest.split_at(PUBKEY_X_LEN);
        let (counter, ciphertext) = rest.split_at(COUNTER_LEN);

        Ok(V2Message {
            pubkey_y: pubkey_y[0],
            pubkey_x: to_array(pubkey_x),
            counter: to_array(counter),
            ciphertext: ciphertext.to_vec(),
            mac: to_array(mac),
        })
    }
}

impl fmt::Display for V2Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x},{},{},{},{}",
            self.pubkey_y,
            to_hex(&self.pubkey_x),
            to_hex(&self.counter),
            to_hex(&self.ciphertext),
            to_hex(&self.mac)
        )
    }
}

/// A decoded device message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedMessage {
    /// Opaque version 1 message
    V1(String),
    /// Structured version 2 message
    V2(V2Message),
}

impl fmt::Display for DecodedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedMessage::V1(message) => f.write_str(message),
            DecodedMessage::V2(message) => message.fmt(f),
        }
    }
}

/// Decode a device message according to its declared version.
///
/// Version 2 base64 may arrive wrapped: line breaks, `\n` escapes and other
/// whitespace are removed before decoding.
pub fn decode_message(message: &str, version: i64) -> Result<DecodedMessage, DecodeError> {
    match version {
        1 => Ok(DecodedMessage::V1(message.to_string())),
        2 => {
            let base64: String = normalize_raw(message)
                .chars()
                .filter(|c| !c.is_ascii_whitespace())
                .collect();
            let bytes = STANDARD
                .decode(base64)
                .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;
            V2Message::from_bytes(&bytes).map(DecodedMessage::V2)
        }
        other => Err(DecodeError::UnknownVersion(other)),
    }
}

/// Decode a device message into its comma-delimited record representation.
///
/// Version 1 messages pass through verbatim; version 2 messages become
/// `pubkey_y,pubkey_x,counter,ciphertext,mac` in lowercase hex.
pub fn decode(message: &str, version: i64) -> Result<String, DecodeError> {
    decode_message(message, version).map(|decoded| decoded.to_string())
}

/// Normalize a message for raw (undecoded) output.
///
/// Removes JSON-style escapes left in the message text (`\/` becomes `/`,
/// `\n`, `\r` and `\t` are dropped) along with any real line breaks, so the
/// message always stays on a single row.
pub fn normalize_raw(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut chars = message.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some('/') => {
                    out.push('/');
                    chars.next();
                }
                Some('n' | 'r' | 't') => {
                    chars.next();
                }
                _ => out.push('\\'),
            },
            '\n' | '\r' => {}
            c => out.push(c),
        }
    }

    out
}

/// Lowercase hex encoding.
pub fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

fn to_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
