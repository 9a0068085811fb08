//! Duplex socket underneath the signaling channel.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use crate::error::TransportError;
use crate::protocol::Envelope;
use crate::TransportResult;

/// Both directions of an established signaling socket.
///
/// Dropping `outbound` closes the socket; `inbound` ends when the server
/// goes away.
#[derive(Debug)]
pub struct SocketHalves {
    pub outbound: mpsc::UnboundedSender<Envelope>,
    pub inbound: mpsc::UnboundedReceiver<Envelope>,
}

/// Opens signaling sockets.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Resolve once the socket is connected.
    async fn connect(&self, url: &Url) -> TransportResult<SocketHalves>;
}

/// Parse and normalize the signaling server address.
///
/// `http`/`https` are accepted for compatibility with Socket.IO style
/// addresses and mapped to `ws`/`wss`.
pub fn parse_server_url(raw: &str) -> TransportResult<Url> {
    let mut url = Url::parse(raw).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {}",
                other
            )))
        }
    };

    if url.host_str().is_none() {
        return Err(TransportError::InvalidUrl("Missing host".to_string()));
    }

    url.set_scheme(scheme)
        .map_err(|()| TransportError::InvalidUrl(format!("cannot use scheme {}", scheme)))?;

    Ok(url)
}

/// WebSocket connector carrying JSON text frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    #[instrument(name = "websocket_connect", skip(self), fields(url = %url))]
    async fn connect(&self, url: &Url) -> TransportResult<SocketHalves> {
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::SignalingConnect(e.to_string()))?;

        info!("WebSocket connected");

        let (mut sink, mut stream) = socket.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Envelope>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<Envelope>();

        tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&envelope) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Dropping unencodable frame: {}", e);
                        continue;
                    }
                };
                trace!(frame = %text, "Signaling frame out");
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("Signaling write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
            debug!("Signaling writer stopped");
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        trace!(frame = %text, "Signaling frame in");
                        match serde_json::from_str::<Envelope>(&text) {
                            Ok(envelope) => {
                                if inbound_tx.send(envelope).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Dropping malformed frame: {}", e),
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Signaling socket error: {}", e);
                        break;
                    }
                }
            }
            debug!("Signaling reader stopped");
        });

        Ok(SocketHalves { outbound, inbound })
    }
}
