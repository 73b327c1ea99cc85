//! Control envelopes
//!
//! A control message travels as a frame whose payload is a newline (the
//! empty channel) followed by a JSON object carrying a `command` key.
//! Channel data frames use the same layout with a non-empty channel name
//! before the newline.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Per-method results reported alongside an authentication failure
pub type AuthMethodResults = BTreeMap<String, String>;

/// Current control protocol version
pub const PROTOCOL_VERSION: u64 = 1;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Payload is not a control message")]
    NotControl,

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Control message is not a JSON object")]
    NotAnObject,

    #[error("Control message has no command")]
    MissingCommand,

    #[error("Invalid \"{command}\" message: {reason}")]
    InvalidField { command: String, reason: String },
}

/// `init` - first message on a channel transport, and the verdict carrier
/// at the end of a negotiation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(
        rename = "auth-method-results",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub auth_method_results: Option<AuthMethodResults>,

    #[serde(rename = "login-data", default, skip_serializing_if = "Option::is_none")]
    pub login_data: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InitMessage {
    pub fn success(user: impl Into<String>) -> Self {
        Self {
            version: Some(PROTOCOL_VERSION),
            user: Some(user.into()),
            ..Default::default()
        }
    }

    pub fn problem(problem: impl Into<String>) -> Self {
        Self {
            version: Some(PROTOCOL_VERSION),
            problem: Some(problem.into()),
            ..Default::default()
        }
    }
}

/// `authorize` - one half of a challenge/response round
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,

    #[serde(rename = "login-data", default, skip_serializing_if = "Option::is_none")]
    pub login_data: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuthorizeMessage {
    pub fn challenge(cookie: impl Into<String>, challenge: impl Into<String>) -> Self {
        Self {
            cookie: Some(cookie.into()),
            challenge: Some(challenge.into()),
            ..Default::default()
        }
    }

    pub fn response(cookie: Option<String>, response: impl Into<String>) -> Self {
        Self {
            cookie,
            response: Some(response.into()),
            ..Default::default()
        }
    }
}

/// `open` - request a new channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    pub payload: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `close` - a channel has finished, possibly with a problem
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloseMessage {
    pub channel: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Control message kinds
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Init(InitMessage),
    Authorize(AuthorizeMessage),
    Open(OpenCommand),
    Close(CloseMessage),
    /// Any other command; carried along so callers can ignore it explicitly
    Unknown {
        command: String,
        fields: Map<String, Value>,
    },
}

impl ControlMessage {
    pub fn command(&self) -> &str {
        match self {
            ControlMessage::Init(_) => "init",
            ControlMessage::Authorize(_) => "authorize",
            ControlMessage::Open(_) => "open",
            ControlMessage::Close(_) => "close",
            ControlMessage::Unknown { command, .. } => command,
        }
    }

    /// Channel the message is about, if it names a non-empty one
    pub fn channel(&self) -> Option<&str> {
        let channel = match self {
            ControlMessage::Open(m) => m.channel.as_deref(),
            ControlMessage::Close(m) => Some(m.channel.as_str()),
            ControlMessage::Init(m) => m.extra.get("channel").and_then(Value::as_str),
            ControlMessage::Authorize(m) => m.extra.get("channel").and_then(Value::as_str),
            ControlMessage::Unknown { fields, .. } => fields.get("channel").and_then(Value::as_str),
        };
        channel.filter(|channel| !channel.is_empty())
    }

    /// Decode a control frame payload (leading newline, then JSON)
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        match payload.split_first() {
            Some((b'\n', json)) => Self::decode_json(json),
            _ => Err(DecodeError::NotControl),
        }
    }

    /// Decode a bare JSON control object
    pub fn decode_json(json: &[u8]) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_slice(json).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

        let Value::Object(mut fields) = value else {
            return Err(DecodeError::NotAnObject);
        };

        let command = match fields.remove("command") {
            Some(Value::String(command)) => command,
            _ => return Err(DecodeError::MissingCommand),
        };

        let message = match command.as_str() {
            "init" => ControlMessage::Init(from_fields(&command, fields)?),
            "authorize" => ControlMessage::Authorize(from_fields(&command, fields)?),
            "open" => ControlMessage::Open(from_fields(&command, fields)?),
            "close" => ControlMessage::Close(from_fields(&command, fields)?),
            _ => ControlMessage::Unknown { command, fields },
        };

        Ok(message)
    }

    /// Encode as a JSON object with `command` as its first key
    pub fn to_json(&self) -> Value {
        let fields = match self {
            ControlMessage::Init(m) => to_fields(m),
            ControlMessage::Authorize(m) => to_fields(m),
            ControlMessage::Open(m) => to_fields(m),
            ControlMessage::Close(m) => to_fields(m),
            ControlMessage::Unknown { fields, .. } => fields.clone(),
        };

        let mut object = Map::with_capacity(fields.len() + 1);
        object.insert("command".to_string(), Value::String(self.command().to_string()));
        for (key, value) in fields {
            if key != "command" {
                object.insert(key, value);
            }
        }
        Value::Object(object)
    }

    /// Encode as a control frame payload (leading newline, then JSON)
    pub fn encode(&self) -> Bytes {
        let json = self.to_json().to_string();
        let mut buf = BytesMut::with_capacity(json.len() + 1);
        buf.put_u8(b'\n');
        buf.put_slice(json.as_bytes());
        buf.freeze()
    }
}

impl From<InitMessage> for ControlMessage {
    fn from(m: InitMessage) -> Self {
        ControlMessage::Init(m)
    }
}

impl From<AuthorizeMessage> for ControlMessage {
    fn from(m: AuthorizeMessage) -> Self {
        ControlMessage::Authorize(m)
    }
}

impl From<OpenCommand> for ControlMessage {
    fn from(m: OpenCommand) -> Self {
        ControlMessage::Open(m)
    }
}

impl From<CloseMessage> for ControlMessage {
    fn from(m: CloseMessage) -> Self {
        ControlMessage::Close(m)
    }
}

/// Split a frame payload into its channel name and data.
///
/// Control frames yield an empty channel. Returns `None` when the payload
/// carries no channel separator at all.
pub fn split_channel(payload: &[u8]) -> Option<(&str, &[u8])> {
    let pos = payload.iter().position(|&b| b == b'\n')?;
    let channel = std::str::from_utf8(&payload[..pos]).ok()?;
    Some((channel, &payload[pos + 1..]))
}

/// Build a channel data payload: `<channel>\n<data>`
pub fn channel_payload(channel: &str, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(channel.len() + 1 + data.len());
    buf.put_slice(channel.as_bytes());
    buf.put_u8(b'\n');
    buf.put_slice(data);
    buf.freeze()
}

fn from_fields<T: DeserializeOwned>(command: &str, fields: Map<String, Value>) -> Result<T, DecodeError> {
    serde_json::from_value(Value::Object(fields)).map_err(|e| DecodeError::InvalidField {
        command: command.to_string(),
        reason: e.to_string(),
    })
}

fn to_fields<T: Serialize>(message: &T) -> Map<String, Value> {
    match serde_json::to_value(message) {
        Ok(Value::Object(fields)) => fields,
        _ => Map::new(),
    }
}
