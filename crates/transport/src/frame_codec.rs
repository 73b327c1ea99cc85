//! WebSocket message <-> frame payload conversion
//!
//! Browsers exchange one frame payload per WebSocket message. Text is used
//! whenever the payload is valid UTF-8, binary otherwise.

use bytes::Bytes;
use tokio_tungstenite::tungstenite::Message;

/// Wrap a frame payload in a WebSocket message
pub fn payload_to_message(payload: Bytes) -> Message {
    match std::str::from_utf8(&payload) {
        Ok(text) => Message::Text(text.to_owned().into()),
        Err(_) => Message::Binary(payload),
    }
}

/// Extract the frame payload carried by a WebSocket message.
///
/// Control-level messages (ping, pong, close) carry none.
pub fn message_to_payload(message: Message) -> Option<Bytes> {
    match message {
        Message::Text(text) => Some(Bytes::copy_from_slice(text.as_str().as_bytes())),
        Message::Binary(data) => Some(data),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}
