//! Socket.IO connector (Engine.IO v4 over the WebSocket transport).
//!
//! Every request goes out as an event emitted with an acknowledgement id and
//! the server answers with an ack packet carrying the callback argument.
//! Ack ids stay inside the connector: the channel above still sees
//! [`Envelope`]s matched by method name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use crate::error::TransportError;
use crate::protocol::Envelope;
use crate::socket::{Connector, SocketHalves};
use crate::TransportResult;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PONG: &str = "3";
const CONNECT: &str = "40";
const DISCONNECT: &str = "41";

/// One decoded text frame.
#[derive(Debug, Clone, PartialEq)]
enum Frame {
    /// Engine.IO handshake with the session parameters.
    Open(Value),
    Close,
    Ping,
    Pong,
    Noop,
    /// The default namespace was joined.
    Connected,
    ConnectError(String),
    Disconnected,
    Event {
        id: Option<u64>,
        event: String,
        data: Option<Value>,
    },
    Ack {
        id: u64,
        data: Value,
    },
}

fn malformed(text: &str) -> TransportError {
    TransportError::Protocol(format!("Malformed Socket.IO frame {:?}", text))
}

fn decode(text: &str) -> TransportResult<Frame> {
    let body = text.get(1..).unwrap_or_default();

    match text.chars().next() {
        Some('0') => serde_json::from_str(body)
            .map(Frame::Open)
            .map_err(|_| malformed(text)),
        Some('1') => Ok(Frame::Close),
        Some('2') => Ok(Frame::Ping),
        Some('3') => Ok(Frame::Pong),
        Some('4') => decode_packet(body),
        Some('6') => Ok(Frame::Noop),
        _ => Err(malformed(text)),
    }
}

/// Decode a Socket.IO packet: type, optional namespace, optional ack id, JSON.
fn decode_packet(packet: &str) -> TransportResult<Frame> {
    let kind = packet
        .chars()
        .next()
        .filter(char::is_ascii_digit)
        .ok_or_else(|| malformed(packet))?;

    let mut rest = &packet[1..];
    if rest.starts_with('/') {
        rest = rest.split_once(',').map_or("", |(_, tail)| tail);
    }

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let id = match digits {
        0 => None,
        _ => Some(rest[..digits].parse::<u64>().map_err(|_| malformed(packet))?),
    };
    let payload = &rest[digits..];

    match kind {
        '0' => Ok(Frame::Connected),
        '1' => Ok(Frame::Disconnected),
        '2' => {
            let mut args = parse_args(packet, payload)?.into_iter();
            let event = match args.next() {
                Some(Value::String(event)) => event,
                _ => return Err(malformed(packet)),
            };
            Ok(Frame::Event {
                id,
                event,
                data: args.next(),
            })
        }
        '3' => Ok(Frame::Ack {
            id: id.ok_or_else(|| malformed(packet))?,
            data: parse_args(packet, payload)?
                .into_iter()
                .next()
                .unwrap_or(Value::Null),
        }),
        '4' => {
            let value: Value = serde_json::from_str(payload).unwrap_or(Value::Null);
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| payload.to_string(), str::to_string);
            Ok(Frame::ConnectError(message))
        }
        _ => Err(TransportError::Protocol(format!(
            "Unsupported Socket.IO packet {:?}",
            packet
        ))),
    }
}

fn parse_args(packet: &str, payload: &str) -> TransportResult<Vec<Value>> {
    serde_json::from_str(payload).map_err(|_| malformed(packet))
}

fn encode_event(id: u64, event: &str, data: Option<&Value>) -> TransportResult<String> {
    let mut args = vec![Value::String(event.to_string())];
    args.extend(data.cloned());

    let json = serde_json::to_string(&args).map_err(|e| TransportError::Protocol(e.to_string()))?;
    Ok(format!("42{}{}", id, json))
}

/// The Engine.IO endpoint for a server address.
fn endpoint(url: &Url) -> Url {
    let mut endpoint = url.clone();
    if endpoint.path().is_empty() || endpoint.path() == "/" {
        endpoint.set_path("/socket.io/");
    }
    endpoint.set_query(Some("EIO=4&transport=websocket"));
    endpoint
}

/// Ack ids of emitted events that still wait for an answer.
///
/// Only the newest id per event is kept, so the late ack of an abandoned
/// request cannot answer its successor.
#[derive(Debug, Default)]
struct AckIds {
    next: u64,
    pending: HashMap<u64, String>,
}

impl AckIds {
    fn register(&mut self, event: &str) -> u64 {
        let id = self.next;
        self.next += 1;

        self.pending.retain(|_, pending| pending != event);
        self.pending.insert(id, event.to_string());
        id
    }

    fn resolve(&mut self, id: u64) -> Option<String> {
        self.pending.remove(&id)
    }
}

/// Connector for Socket.IO signaling servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketIoConnector;

#[async_trait]
impl Connector for SocketIoConnector {
    #[instrument(name = "socketio_connect", skip(self), fields(url = %url))]
    async fn connect(&self, url: &Url) -> TransportResult<SocketHalves> {
        let endpoint = endpoint(url);
        let (mut socket, _response) = tokio_tungstenite::connect_async(endpoint.as_str())
            .await
            .map_err(|e| TransportError::SignalingConnect(e.to_string()))?;

        handshake(&mut socket).await?;
        info!("Socket.IO connected");

        let (sink, stream) = socket.split();
        let acks = Arc::new(Mutex::new(AckIds::default()));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (pong_tx, pong_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_frames(sink, outbound_rx, pong_rx, Arc::clone(&acks)));
        tokio::spawn(read_frames(stream, inbound_tx, pong_tx, acks));

        Ok(SocketHalves { outbound, inbound })
    }
}

/// Wait for the Engine.IO open, join the default namespace and wait for the
/// server to confirm it.
async fn handshake(socket: &mut Socket) -> TransportResult<()> {
    let mut opened = false;

    while let Some(message) = socket.next().await {
        let text = match message.map_err(|e| TransportError::SignalingConnect(e.to_string()))? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        match decode(&text)? {
            Frame::Open(params) => {
                debug!(%params, "Engine.IO session opened");
                opened = true;
                send_text(socket, CONNECT).await?;
            }
            Frame::Ping => send_text(socket, PONG).await?,
            Frame::Connected if opened => return Ok(()),
            Frame::ConnectError(message) => return Err(TransportError::SignalingConnect(message)),
            other => trace!(?other, "Ignoring frame before connect"),
        }
    }

    Err(TransportError::SignalingConnect(
        "Socket closed during handshake".to_string(),
    ))
}

async fn send_text(socket: &mut Socket, text: &str) -> TransportResult<()> {
    socket
        .send(Message::Text(text.to_string()))
        .await
        .map_err(|e| TransportError::SignalingConnect(e.to_string()))
}

async fn write_frames(
    mut sink: SplitSink<Socket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
    mut pongs: mpsc::UnboundedReceiver<()>,
    acks: Arc<Mutex<AckIds>>,
) {
    loop {
        let text = tokio::select! {
            envelope = outbound.recv() => match envelope {
                Some(Envelope::Emit { event, data }) => {
                    let id = acks.lock().register(&event);
                    match encode_event(id, &event, data.as_ref()) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Dropping unencodable event: {}", e);
                            continue;
                        }
                    }
                }
                Some(Envelope::Ack { event, .. }) => {
                    debug!(event = %event, "Server events are never acknowledged");
                    continue;
                }
                None => break,
            },
            Some(()) = pongs.recv() => PONG.to_string(),
        };

        trace!(frame = %text, "Socket.IO frame out");
        if let Err(e) = sink.send(Message::Text(text)).await {
            warn!("Socket.IO write failed: {}", e);
            return;
        }
    }

    let _ = sink.send(Message::Text(DISCONNECT.to_string())).await;
    let _ = sink.close().await;
    debug!("Socket.IO writer stopped");
}

async fn read_frames(
    mut stream: SplitStream<Socket>,
    inbound: mpsc::UnboundedSender<Envelope>,
    pongs: mpsc::UnboundedSender<()>,
    acks: Arc<Mutex<AckIds>>,
) {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("Socket.IO socket error: {}", e);
                break;
            }
        };
        trace!(frame = %text, "Socket.IO frame in");

        let envelope = match decode(&text) {
            Ok(Frame::Ping) => {
                let _ = pongs.send(());
                continue;
            }
            Ok(Frame::Ack { id, data }) => match acks.lock().resolve(id) {
                Some(event) => Envelope::Ack { event, data },
                None => {
                    debug!(id, "Discarding ack for a superseded request");
                    continue;
                }
            },
            Ok(Frame::Event { event, data, .. }) => Envelope::Emit { event, data },
            Ok(Frame::Close) | Ok(Frame::Disconnected) => break,
            Ok(other) => {
                trace!(?other, "Ignoring frame");
                continue;
            }
            Err(e) => {
                warn!("Dropping malformed frame: {}", e);
                continue;
            }
        };

        if inbound.send(envelope).is_err() {
            break;
        }
    }

    debug!("Socket.IO reader stopped");
}
