//! Channels between clients and a session's bridge
//!
//! An interactive socket relays whole frame payloads for the channels it
//! opened, and a frame that breaks the protocol ends it. External channels
//! get a channel id of their own and carry bare data; one-shot channels
//! collect a channel's data into a single response body.

use crate::bridge::{Bridge, Subscription};
use crate::error::GateError;
use crate::metrics::METRICS;
use anyhow::anyhow;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, warn};
use wsgate_protocol::{
    CloseMessage, ControlMessage, Frame, OpenCommand, PROTOCOL_VERSION, Problem, channel_payload,
    decode_control_frame, split_channel,
};
use wsgate_transport::{message_to_payload, payload_to_message};

/// Command a one-shot channel sends after its `open`
pub const DONE_COMMAND: &str = "done";

/// Payload type of resource and shell fetches
pub const HTTP_STREAM_PAYLOAD: &str = "http-stream1";

/// `done` for `channel`
pub fn done_message(channel: &str) -> ControlMessage {
    let mut fields = Map::new();
    fields.insert("channel".to_string(), Value::String(channel.to_string()));
    ControlMessage::Unknown {
        command: DONE_COMMAND.to_string(),
        fields,
    }
}

/// Open command fetching a package resource over HTTP from `host`
pub fn http_open(path: &str, host: &str) -> OpenCommand {
    let mut extra = Map::new();
    extra.insert("internal".to_string(), Value::String("packages".to_string()));
    extra.insert("method".to_string(), Value::String("GET".to_string()));
    extra.insert("path".to_string(), Value::String(path.to_string()));

    OpenCommand {
        channel: None,
        payload: HTTP_STREAM_PAYLOAD.to_string(),
        host: Some(host.to_string()),
        group: None,
        extra,
    }
}

/// What a bridge frame means to the channel `id`
enum ChannelEvent<'a> {
    Data(&'a [u8]),
    Done,
    Closed(Option<String>),
    Other,
}

fn channel_event<'a>(id: &str, payload: &'a [u8]) -> ChannelEvent<'a> {
    let Some((channel, data)) = split_channel(payload) else {
        return ChannelEvent::Other;
    };
    if channel == id {
        return ChannelEvent::Data(data);
    }
    if !channel.is_empty() {
        return ChannelEvent::Other;
    }

    match ControlMessage::decode(payload) {
        Ok(ControlMessage::Close(close)) if close.channel == id => ChannelEvent::Closed(close.problem),
        Ok(ControlMessage::Unknown { command, fields })
            if command == DONE_COMMAND
                && fields.get("channel").and_then(Value::as_str) == Some(id) =>
        {
            ChannelEvent::Done
        }
        _ => ChannelEvent::Other,
    }
}

/// What to do with a frame a client sent on its socket
#[derive(Debug)]
enum Inbound {
    Forward(Frame),
    /// Refuse the frame, answering the client with this payload
    Refuse(Bytes),
    /// The client broke the protocol; the socket is done
    Invalid(String),
}

/// Check a client frame against the channels its socket owns, claiming
/// the channel of an `open`
fn inbound(subscription: &Subscription, payload: Bytes) -> Inbound {
    let frame = Frame::new(payload);
    let channel = match split_channel(frame.payload()) {
        Some((channel, _)) => channel.to_string(),
        None => return Inbound::Invalid("frame without a channel".to_string()),
    };

    if !channel.is_empty() {
        if subscription.owns(&channel) {
            return Inbound::Forward(frame);
        }
        return Inbound::Invalid(format!("data for unopened channel {:?}", channel));
    }

    let message = match decode_control_frame(&frame) {
        Ok(message) => message,
        Err(e) => return Inbound::Invalid(e.to_string()),
    };

    if let ControlMessage::Open(open) = &message {
        return match open.channel.as_deref().filter(|channel| !channel.is_empty()) {
            None => Inbound::Invalid("open without a channel".to_string()),
            Some(channel) if subscription.owns(channel) => {
                Inbound::Invalid(format!("channel {:?} opened twice", channel))
            }
            Some(channel) if subscription.claim(channel) => Inbound::Forward(frame),
            Some(channel) => {
                warn!("Refusing channel {:?}, it is taken", channel);
                let close = CloseMessage {
                    channel: channel.to_string(),
                    problem: Some(Problem::ProtocolError.as_str().to_string()),
                    ..Default::default()
                };
                Inbound::Refuse(ControlMessage::from(close).encode())
            }
        };
    }

    match message.channel() {
        Some(channel) if !subscription.owns(channel) => Inbound::Invalid(format!(
            "\"{}\" for unopened channel {:?}",
            message.command(),
            channel
        )),
        _ => Inbound::Forward(frame),
    }
}

/// Relay a session's socket: client frames go to the bridge once checked,
/// and the bridge's frames for this socket's channels come back
pub async fn serve_socket<S>(ws: WebSocketStream<S>, bridge: &Bridge)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    METRICS.active_channels.inc();
    let mut subscription = bridge.subscribe_socket();
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut protocol_error = false;

    loop {
        tokio::select! {
            biased;

            frame = subscription.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = ws_tx.send(payload_to_message(frame.into_payload())).await {
                    debug!("Socket send failed: {}", e);
                    break;
                }
            }
            message = ws_rx.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(message)) => {
                    let Some(payload) = message_to_payload(message) else {
                        continue;
                    };
                    match inbound(&subscription, payload) {
                        Inbound::Forward(frame) => {
                            if !bridge.send(frame).await {
                                break;
                            }
                        }
                        Inbound::Refuse(reply) => {
                            if let Err(e) = ws_tx.send(payload_to_message(reply)).await {
                                debug!("Socket send failed: {}", e);
                                break;
                            }
                        }
                        Inbound::Invalid(reason) => {
                            warn!("Closing socket: {}", reason);
                            protocol_error = true;
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    debug!("Socket receive failed: {}", e);
                    break;
                }
            },
            _ = bridge.closed() => {
                debug!("Bridge closed under socket");
                break;
            }
        }
    }

    // Channels the bridge still has open for us end with the socket
    for channel in subscription.claimed() {
        let close = CloseMessage {
            channel,
            ..Default::default()
        };
        if !bridge.send_control(&close.into()).await {
            break;
        }
    }
    drop(subscription);

    if protocol_error {
        let problem = json!({
            "command": "close",
            "problem": Problem::ProtocolError.as_str(),
        });
        let _ = ws_tx.send(Message::Text(format!("\n{}", problem).into())).await;
        let close = CloseFrame {
            code: CloseCode::Protocol,
            reason: "protocol-error".into(),
        };
        let _ = ws_tx.send(Message::Close(Some(close))).await;
    }
    let _ = ws_tx.close().await;
    METRICS.active_channels.dec();
}

/// Tell a client without a session why its socket goes away
pub async fn serve_no_session<S>(mut ws: WebSocketStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let init = json!({
        "command": "init",
        "problem": Problem::NoSession.as_str(),
        "version": PROTOCOL_VERSION,
    });

    if let Err(e) = ws.send(Message::Text(format!("\n{}", init).into())).await {
        debug!("Failed to report missing session: {}", e);
        return;
    }

    let close = CloseFrame {
        code: CloseCode::Away,
        reason: "no-session".into(),
    };
    let _ = ws.close(Some(close)).await;
}

/// Relay one external channel: messages are bare channel data
pub async fn serve_external<S>(ws: WebSocketStream<S>, bridge: &Bridge, mut open: OpenCommand)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut subscription = bridge.subscribe();
    let id = bridge.allocate_channel(&subscription);
    open.channel = Some(id.clone());
    if !bridge.send_control(&open.into()).await {
        return;
    }

    METRICS.active_channels.inc();
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut bridge_closed_channel = false;

    loop {
        tokio::select! {
            biased;

            frame = subscription.recv() => {
                let Some(frame) = frame else { break };
                match channel_event(&id, frame.payload()) {
                    ChannelEvent::Data(data) => {
                        let message = payload_to_message(Bytes::copy_from_slice(data));
                        if let Err(e) = ws_tx.send(message).await {
                            debug!("External channel send failed: {}", e);
                            break;
                        }
                    }
                    ChannelEvent::Closed(problem) => {
                        if let Some(problem) = problem {
                            debug!("Channel {} closed: {}", id, problem);
                        }
                        bridge_closed_channel = true;
                        break;
                    }
                    ChannelEvent::Done | ChannelEvent::Other => {}
                }
            }
            message = ws_rx.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(message)) => {
                    if let Some(data) = message_to_payload(message) {
                        if !bridge.send(Frame::new(channel_payload(&id, &data))).await {
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    debug!("External channel receive failed: {}", e);
                    break;
                }
            },
            _ = bridge.closed() => break,
        }
    }

    if !bridge_closed_channel {
        let close = CloseMessage {
            channel: id,
            ..Default::default()
        };
        bridge.send_control(&close.into()).await;
    }
    let _ = ws_tx.close().await;
    METRICS.active_channels.dec();
}

/// Open a channel, announce that no input follows, and collect everything
/// the bridge sends on it
pub async fn one_shot(
    bridge: &Bridge,
    mut open: OpenCommand,
    timeout: Duration,
) -> Result<Bytes, GateError> {
    let mut subscription = bridge.subscribe();
    let id = bridge.allocate_channel(&subscription);

    open.channel = Some(id.clone());
    if !bridge.send_control(&open.into()).await || !bridge.send_control(&done_message(&id)).await {
        return Err(GateError::Internal(anyhow!("Bridge is gone")));
    }

    let collect = async {
        let mut body = BytesMut::new();
        loop {
            let frame = tokio::select! {
                biased;
                frame = subscription.recv() => frame,
                _ = bridge.closed() => return Err(GateError::Internal(anyhow!("Bridge closed during channel {}", id))),
            };

            let Some(frame) = frame else {
                return Err(GateError::Internal(anyhow!("Bridge is gone")));
            };

            match channel_event(&id, frame.payload()) {
                ChannelEvent::Data(data) => body.extend_from_slice(data),
                ChannelEvent::Done | ChannelEvent::Closed(None) => return Ok(body.freeze()),
                ChannelEvent::Closed(Some(problem)) => return Err(close_problem(&problem)),
                ChannelEvent::Other => {}
            }
        }
    };

    match tokio::time::timeout(timeout, collect).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Channel {} timed out", id);
            Err(GateError::problem(Problem::Timeout))
        }
    }
}

/// Failure of a channel the bridge closed with `problem`
fn close_problem(problem: &str) -> GateError {
    match Problem::parse(problem) {
        Problem::NotFound => GateError::NotFound,
        Problem::AccessDenied => GateError::problem(Problem::AccessDenied),
        other => GateError::Internal(anyhow!("Channel closed with {}", other)),
    }
}
