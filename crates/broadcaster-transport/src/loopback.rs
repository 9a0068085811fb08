//! In-process media server and negotiation device.
//!
//! [`LoopbackServer`] answers signaling requests with canned replies that can
//! be overridden per method. [`LoopbackDeviceFactory`] builds devices whose
//! send transports drive their listener the way a real WebRTC stack does:
//! connect once before the first produce, then one produce per track.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use broadcaster_capture::LocalTrack;
use broadcaster_ipc::MediaKind;

use crate::device::{
    Completion, ConnectEvent, Device, DeviceFactory, ProduceEvent, Producer, SendTransport,
    TransportListener,
};
use crate::error::TransportError;
use crate::protocol::{
    Envelope, RtpCapabilities, TransportOptions, CONNECT_TRANSPORT, CREATE_WEBRTC_TRANSPORT,
    GET_ROUTER_RTP_CAPABILITIES, PRODUCE,
};
use crate::socket::{Connector, SocketHalves};
use crate::TransportResult;

/// How the server answers one method.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Acknowledge immediately with this payload.
    Ack(Value),
    /// Never acknowledge.
    Silent,
    /// Acknowledge with this payload after a delay.
    Delayed(Duration, Value),
}

#[derive(Default)]
struct ServerInner {
    replies: Mutex<HashMap<String, Reply>>,
    log: Mutex<Vec<(String, Option<Value>)>>,
    refuse: AtomicBool,
    stall: AtomicBool,
    connections: AtomicUsize,
    open: AtomicUsize,
    next_producer: AtomicUsize,
}

impl ServerInner {
    fn reply_for(&self, method: &str) -> Reply {
        if let Some(reply) = self.replies.lock().get(method) {
            return reply.clone();
        }

        match method {
            GET_ROUTER_RTP_CAPABILITIES => Reply::Ack(default_capabilities()),
            CREATE_WEBRTC_TRANSPORT => Reply::Ack(json!({
                "id": "t1",
                "iceParameters": {"usernameFragment": "loopback", "password": "loopback", "iceLite": true},
                "iceCandidates": [
                    {"foundation": "udpcandidate", "ip": "127.0.0.1", "port": 40000, "protocol": "udp", "priority": 1076302079, "type": "host"}
                ],
                "dtlsParameters": {
                    "role": "auto",
                    "fingerprints": [{"algorithm": "sha-256", "value": "AA:BB:CC"}]
                }
            })),
            CONNECT_TRANSPORT => Reply::Ack(json!({})),
            PRODUCE => {
                let n = self.next_producer.fetch_add(1, Ordering::SeqCst) + 1;
                Reply::Ack(json!({ "id": format!("p{}", n) }))
            }
            _ => Reply::Silent,
        }
    }
}

/// Router capabilities offering Opus audio and VP8 video.
pub fn default_capabilities() -> Value {
    json!({
        "codecs": [
            {"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2},
            {"kind": "video", "mimeType": "video/VP8", "clockRate": 90000}
        ],
        "headerExtensions": []
    })
}

/// Signaling server living in the same process.
#[derive(Clone, Default)]
pub struct LoopbackServer {
    inner: Arc<ServerInner>,
}

impl LoopbackServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the reply for `method`.
    pub fn set_reply(&self, method: &str, reply: Reply) {
        self.inner.replies.lock().insert(method.to_string(), reply);
    }

    /// Fail every following connection attempt.
    pub fn refuse_connections(&self) {
        self.inner.refuse.store(true, Ordering::SeqCst);
    }

    /// Leave every following connection attempt pending forever.
    pub fn stall_connections(&self) {
        self.inner.stall.store(true, Ordering::SeqCst);
    }

    /// Methods received so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.inner
            .log
            .lock()
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }

    /// Payloads received for `method`, in order.
    pub fn payloads(&self, method: &str) -> Vec<Option<Value>> {
        self.inner
            .log
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::SeqCst)
    }

    /// Connections whose client side is still open.
    pub fn open_connections(&self) -> usize {
        self.inner.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for LoopbackServer {
    async fn connect(&self, url: &Url) -> TransportResult<SocketHalves> {
        if self.inner.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::SignalingConnect(format!(
                "connection to {} refused",
                url
            )));
        }
        if self.inner.stall.load(Ordering::SeqCst) {
            debug!(%url, "Stalling connection attempt");
            std::future::pending::<()>().await;
        }

        self.inner.connections.fetch_add(1, Ordering::SeqCst);
        self.inner.open.fetch_add(1, Ordering::SeqCst);

        let (outbound, mut from_client) = mpsc::unbounded_channel::<Envelope>();
        let (to_client, inbound) = mpsc::unbounded_channel::<Envelope>();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            while let Some(envelope) = from_client.recv().await {
                let Envelope::Emit { event, data } = envelope else {
                    continue;
                };
                debug!(event = %event, "Loopback server received");
                inner.log.lock().push((event.clone(), data));

                match inner.reply_for(&event) {
                    Reply::Ack(data) => {
                        let _ = to_client.send(Envelope::Ack { event, data });
                    }
                    Reply::Silent => {}
                    Reply::Delayed(delay, data) => {
                        let to_client = to_client.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = to_client.send(Envelope::Ack { event, data });
                        });
                    }
                }
            }
            inner.open.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(SocketHalves { outbound, inbound })
    }
}

#[derive(Default)]
struct FactoryLog {
    loads: AtomicUsize,
    transports: Mutex<Vec<Arc<AtomicBool>>>,
    producers: Mutex<Vec<Arc<AtomicBool>>>,
}

fn count_open(flags: &Mutex<Vec<Arc<AtomicBool>>>) -> usize {
    flags
        .lock()
        .iter()
        .filter(|closed| !closed.load(Ordering::SeqCst))
        .count()
}

/// Builds loopback devices and keeps track of what they created.
#[derive(Clone, Default)]
pub struct LoopbackDeviceFactory {
    log: Arc<FactoryLog>,
}

impl LoopbackDeviceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices loaded so far.
    pub fn loads(&self) -> usize {
        self.log.loads.load(Ordering::SeqCst)
    }

    pub fn open_transports(&self) -> usize {
        count_open(&self.log.transports)
    }

    pub fn open_producers(&self) -> usize {
        count_open(&self.log.producers)
    }
}

#[async_trait]
impl DeviceFactory for LoopbackDeviceFactory {
    async fn load(&self, router: &RtpCapabilities) -> TransportResult<Box<dyn Device>> {
        let codecs: Vec<Value> = router
            .0
            .get("codecs")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let kinds: HashSet<MediaKind> = codecs
            .iter()
            .filter_map(|codec| match codec.get("kind").and_then(Value::as_str) {
                Some("audio") => Some(MediaKind::Audio),
                Some("video") => Some(MediaKind::Video),
                _ => None,
            })
            .collect();

        if kinds.is_empty() {
            return Err(TransportError::ServerNegotiation(
                "Router capabilities contain no usable codecs".to_string(),
            ));
        }

        self.log.loads.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(LoopbackDevice {
            kinds,
            codecs,
            log: Arc::clone(&self.log),
        }))
    }
}

struct LoopbackDevice {
    kinds: HashSet<MediaKind>,
    codecs: Vec<Value>,
    log: Arc<FactoryLog>,
}

impl Device for LoopbackDevice {
    fn can_produce(&self, kind: MediaKind) -> bool {
        self.kinds.contains(&kind)
    }

    fn create_send_transport(
        &self,
        options: TransportOptions,
        listener: Arc<dyn TransportListener>,
    ) -> TransportResult<Box<dyn SendTransport>> {
        let closed = Arc::new(AtomicBool::new(false));
        self.log.transports.lock().push(Arc::clone(&closed));

        Ok(Box::new(LoopbackTransport {
            id: options.id,
            listener,
            kinds: self.kinds.clone(),
            codecs: self.codecs.clone(),
            connected: false,
            connect_failed: None,
            next_mid: 0,
            closed,
            log: Arc::clone(&self.log),
        }))
    }
}

struct LoopbackTransport {
    id: String,
    listener: Arc<dyn TransportListener>,
    kinds: HashSet<MediaKind>,
    codecs: Vec<Value>,
    connected: bool,
    connect_failed: Option<String>,
    next_mid: u32,
    closed: Arc<AtomicBool>,
    log: Arc<FactoryLog>,
}

impl LoopbackTransport {
    async fn ensure_connected(&mut self, kind: MediaKind) -> TransportResult<()> {
        if let Some(message) = &self.connect_failed {
            return Err(TransportError::Produce {
                kind,
                message: message.clone(),
            });
        }
        if self.connected {
            return Ok(());
        }

        let (done, rx) = Completion::channel();
        self.listener.on_connect(
            ConnectEvent {
                dtls_parameters: json!({
                    "role": "client",
                    "fingerprints": [{"algorithm": "sha-256", "value": "DD:EE:FF"}]
                }),
            },
            done,
        );

        let message = match rx.await {
            Ok(Ok(())) => {
                self.connected = true;
                return Ok(());
            }
            Ok(Err(message)) => message,
            Err(_) => "connect callback dropped".to_string(),
        };

        self.connect_failed = Some(message.clone());
        Err(TransportError::Produce { kind, message })
    }

    fn rtp_parameters(&mut self, kind: MediaKind) -> Value {
        let mid = self.next_mid;
        self.next_mid += 1;

        let codecs: Vec<&Value> = self
            .codecs
            .iter()
            .filter(|codec| codec.get("kind").and_then(Value::as_str) == Some(kind.as_str()))
            .collect();

        json!({ "mid": mid.to_string(), "codecs": codecs, "encodings": [{"ssrc": 1000 + mid}] })
    }
}

#[async_trait]
impl SendTransport for LoopbackTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn produce(&mut self, track: &LocalTrack) -> TransportResult<Box<dyn Producer>> {
        let kind = track.kind();

        if self.is_closed() {
            return Err(TransportError::TransportClosed);
        }
        if !self.kinds.contains(&kind) {
            return Err(TransportError::Produce {
                kind,
                message: format!("Device cannot produce {}", kind),
            });
        }
        if !track.is_live() {
            return Err(TransportError::Produce {
                kind,
                message: "Track has ended".to_string(),
            });
        }

        self.ensure_connected(kind).await?;

        let rtp_parameters = self.rtp_parameters(kind);
        let (done, rx) = Completion::channel();
        self.listener.on_produce(
            ProduceEvent {
                kind,
                rtp_parameters,
            },
            done,
        );

        let id = match rx.await {
            Ok(Ok(id)) => id,
            Ok(Err(message)) => return Err(TransportError::Produce { kind, message }),
            Err(_) => {
                return Err(TransportError::Produce {
                    kind,
                    message: "produce callback dropped".to_string(),
                })
            }
        };

        let closed = Arc::new(AtomicBool::new(false));
        self.log.producers.lock().push(Arc::clone(&closed));

        Ok(Box::new(LoopbackProducer { id, kind, closed }))
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct LoopbackProducer {
    id: String,
    kind: MediaKind,
    closed: Arc<AtomicBool>,
}

impl Producer for LoopbackProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
