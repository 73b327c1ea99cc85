//! Per-session bridge process
//!
//! Once a login succeeds, the verifier's streams belong to the session. A
//! writer task drains an mpsc queue into the process. A reader task routes
//! every frame the process emits to the subscription owning its channel;
//! control messages that name no channel go to every interactive socket.

use crate::metrics::METRICS;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use wsgate_protocol::{ControlMessage, Frame, split_channel};
use wsgate_transport::{FrameReader, FrameWriter};

/// Frames queued towards the bridge
const BRIDGE_QUEUE: usize = 256;

type Outbox = mpsc::UnboundedSender<Frame>;

struct Owner {
    subscription: u64,
    outbox: Outbox,
}

/// Who receives what the bridge emits
#[derive(Default)]
struct Routes {
    /// Channel id -> owning subscription
    channels: DashMap<String, Owner>,
    /// Interactive sockets, which also see channel-less control messages
    sockets: DashMap<u64, Outbox>,
}

impl Routes {
    fn route(&self, frame: Frame) {
        let channel = match split_channel(frame.payload()) {
            Some((channel, _)) => channel.to_string(),
            None => {
                warn!("Dropping bridge frame without a channel");
                return;
            }
        };

        if !channel.is_empty() {
            self.deliver(&channel, frame);
            return;
        }

        let message = match ControlMessage::decode(frame.payload()) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping invalid control message from bridge: {}", e);
                return;
            }
        };

        match message.channel() {
            Some(channel) => {
                self.deliver(channel, frame);
                // The bridge closing a channel frees its id
                if matches!(message, ControlMessage::Close(_)) {
                    self.channels.remove(channel);
                }
            }
            None => {
                for socket in self.sockets.iter() {
                    let _ = socket.value().send(frame.clone());
                }
            }
        }
    }

    fn deliver(&self, channel: &str, frame: Frame) {
        match self.channels.get(channel) {
            Some(owner) => {
                let _ = owner.outbox.send(frame);
            }
            None => debug!("Dropping frame for unowned channel {:?}", channel),
        }
    }
}

/// A receiver of bridge frames, and the owner of the channels it claims.
/// Dropping it releases every channel it still holds.
pub struct Subscription {
    id: u64,
    frames: mpsc::UnboundedReceiver<Frame>,
    outbox: Outbox,
    routes: Arc<Routes>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    /// Take `channel`; false while another subscription holds it
    pub fn claim(&self, channel: &str) -> bool {
        match self.routes.channels.entry(channel.to_string()) {
            Entry::Occupied(entry) => entry.get().subscription == self.id,
            Entry::Vacant(entry) => {
                entry.insert(Owner {
                    subscription: self.id,
                    outbox: self.outbox.clone(),
                });
                true
            }
        }
    }

    pub fn owns(&self, channel: &str) -> bool {
        self.routes
            .channels
            .get(channel)
            .is_some_and(|owner| owner.subscription == self.id)
    }

    /// Channels still held, in no particular order
    pub fn claimed(&self) -> Vec<String> {
        self.routes
            .channels
            .iter()
            .filter(|entry| entry.value().subscription == self.id)
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let id = self.id;
        self.routes.channels.retain(|_, owner| owner.subscription != id);
        self.routes.sockets.remove(&id);
    }
}

pub struct Bridge {
    outgoing: mpsc::Sender<Frame>,
    routes: Arc<Routes>,
    closed: watch::Receiver<bool>,
    child: Mutex<Option<Child>>,
    next_channel: AtomicU64,
    next_subscription: AtomicU64,
    tasks: [JoinHandle<()>; 2],
}

impl Bridge {
    /// Take over a process's framed streams
    pub fn start<R, W>(mut reader: FrameReader<R>, mut writer: FrameWriter<W>, child: Option<Child>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, mut queue) = mpsc::channel::<Frame>(BRIDGE_QUEUE);
        let routes = Arc::new(Routes::default());
        let (closed_tx, closed) = watch::channel(false);

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = queue.recv().await {
                if let Err(e) = writer.write_frame(&frame).await {
                    debug!("Bridge write failed: {}", e);
                    break;
                }
                METRICS.frames_to_bridge.inc();
            }
            let _ = writer.shutdown().await;
        });

        let reader_routes = routes.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => {
                        METRICS.frames_from_bridge.inc();
                        reader_routes.route(frame);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Bridge stream broken: {}", e);
                        break;
                    }
                }
            }
            closed_tx.send_replace(true);
        });

        Self {
            outgoing,
            routes,
            closed,
            child: Mutex::new(child),
            next_channel: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
            tasks: [writer_task, reader_task],
        }
    }

    /// Queue a frame for the bridge; false once the bridge is gone
    pub async fn send(&self, frame: Frame) -> bool {
        self.outgoing.send(frame).await.is_ok()
    }

    pub async fn send_control(&self, message: &ControlMessage) -> bool {
        self.send(Frame::new(message.encode())).await
    }

    /// Receive the frames of the channels claimed through the subscription
    pub fn subscribe(&self) -> Subscription {
        let (outbox, frames) = mpsc::unbounded_channel();
        Subscription {
            id: self.next_subscription.fetch_add(1, Ordering::Relaxed),
            frames,
            outbox,
            routes: self.routes.clone(),
        }
    }

    /// Like `subscribe`, plus every control message that names no channel
    pub fn subscribe_socket(&self) -> Subscription {
        let subscription = self.subscribe();
        self.routes
            .sockets
            .insert(subscription.id, subscription.outbox.clone());
        subscription
    }

    /// Claim a fresh gateway channel id for `subscription`
    pub fn allocate_channel(&self, subscription: &Subscription) -> String {
        loop {
            let id = format!("g{}", self.next_channel.fetch_add(1, Ordering::Relaxed));
            if subscription.claim(&id) {
                return id;
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the bridge's output has ended
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Kill the bridge process, if we still own it
    pub fn terminate(&self) {
        let child = match self.child.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                debug!("Bridge already gone: {}", e);
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.terminate();
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wsgate_protocol::{CloseMessage, InitMessage, channel_payload};

    /// A bridge whose "process" is the far side of two duplex pipes
    fn duplex_bridge() -> (Bridge, FrameReader<tokio::io::DuplexStream>, FrameWriter<tokio::io::DuplexStream>) {
        let (to_bridge, bridge_in) = tokio::io::duplex(4096);
        let (bridge_out, from_bridge) = tokio::io::duplex(4096);
        let bridge = Bridge::start(FrameReader::new(from_bridge), FrameWriter::new(to_bridge), None);
        (bridge, FrameReader::new(bridge_in), FrameWriter::new(bridge_out))
    }

    async fn next(subscription: &mut Subscription) -> Frame {
        tokio::time::timeout(Duration::from_secs(5), subscription.recv())
            .await
            .unwrap()
            .unwrap()
    }

    async fn nothing_for(subscription: &mut Subscription) {
        let result = tokio::time::timeout(Duration::from_millis(100), subscription.recv()).await;
        assert!(result.is_err(), "unexpected frame {:?}", result);
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (bridge, mut process_in, mut process_out) = duplex_bridge();
        let mut socket = bridge.subscribe_socket();
        let mut collector = bridge.subscribe();

        assert!(bridge.send(Frame::new(&b"g1\nhello"[..])).await);
        let frame = process_in.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.payload(), b"g1\nhello");

        process_out
            .write_control(&InitMessage::success("me").into())
            .await
            .unwrap();
        let frame = next(&mut socket).await;
        assert!(frame.payload().starts_with(b"\n{\"command\":\"init\""));
        nothing_for(&mut collector).await;
    }

    #[tokio::test]
    async fn test_frames_reach_only_their_owner() {
        let (bridge, _process_in, mut process_out) = duplex_bridge();
        let mut a = bridge.subscribe_socket();
        let mut b = bridge.subscribe_socket();
        assert!(a.claim("1"));
        assert!(b.claim("2"));

        process_out
            .write_frame(&Frame::new(channel_payload("1", b"for a")))
            .await
            .unwrap();
        process_out
            .write_frame(&Frame::new(channel_payload("3", b"for nobody")))
            .await
            .unwrap();
        process_out
            .write_frame(&Frame::new(channel_payload("2", b"for b")))
            .await
            .unwrap();

        assert_eq!(next(&mut a).await.payload(), b"1\nfor a");
        assert_eq!(next(&mut b).await.payload(), b"2\nfor b");
        nothing_for(&mut a).await;
    }

    #[tokio::test]
    async fn test_close_releases_channel() {
        let (bridge, _process_in, mut process_out) = duplex_bridge();
        let mut a = bridge.subscribe_socket();
        let b = bridge.subscribe_socket();
        assert!(a.claim("1"));
        assert!(!b.claim("1"));
        assert!(a.owns("1"));

        let close = CloseMessage {
            channel: "1".to_string(),
            ..Default::default()
        };
        process_out.write_control(&close.into()).await.unwrap();

        let frame = next(&mut a).await;
        assert!(frame.payload().starts_with(b"\n{\"command\":\"close\""));
        assert!(!a.owns("1"));
        assert!(b.claim("1"));
    }

    #[tokio::test]
    async fn test_dropped_subscription_releases_channels() {
        let (bridge, _in, _out) = duplex_bridge();
        let a = bridge.subscribe();
        let id = bridge.allocate_channel(&a);
        assert_eq!(a.claimed(), vec![id.clone()]);

        let b = bridge.subscribe();
        assert!(!b.claim(&id));
        drop(a);
        assert!(b.claim(&id));
    }

    #[tokio::test]
    async fn test_channel_ids_unique() {
        let (bridge, _in, _out) = duplex_bridge();
        let subscription = bridge.subscribe();
        // a client already took the next gateway id
        let squatter = bridge.subscribe_socket();
        assert!(squatter.claim("g1"));

        let a = bridge.allocate_channel(&subscription);
        let b = bridge.allocate_channel(&subscription);
        assert_ne!(a, b);
        assert_ne!(a, "g1");
        assert!(subscription.owns(&a) && subscription.owns(&b));
    }

    #[tokio::test]
    async fn test_closed_when_output_ends() {
        let (bridge, _process_in, process_out) = duplex_bridge();
        assert!(!bridge.is_closed());

        drop(process_out);
        tokio::time::timeout(Duration::from_secs(5), bridge.closed())
            .await
            .unwrap();
        assert!(bridge.is_closed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_kills_process() {
        use wsgate_transport::{BackendCommand, BackendProcess};

        let process = BackendProcess::spawn(&BackendCommand::new("cat")).unwrap();
        let (child, reader, writer) = process.into_parts();
        let bridge = Bridge::start(reader, writer, Some(child));

        bridge.terminate();
        tokio::time::timeout(Duration::from_secs(5), bridge.closed())
            .await
            .unwrap();
    }
}
