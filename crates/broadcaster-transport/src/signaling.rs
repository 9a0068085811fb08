//! Request/acknowledgement channel to the media server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use broadcaster_ipc::SessionConfig;

use crate::connection::ConnectionState;
use crate::error::TransportError;
use crate::protocol::Envelope;
use crate::socket::{parse_server_url, Connector, SocketHalves};
use crate::TransportResult;

type PendingAcks = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;

/// Signaling channel with one outstanding acknowledgement per method.
///
/// Requests are matched to acknowledgements by method name alone, so two
/// overlapping requests for the same method are refused. A request abandoned
/// by its timeout is not retracted: the server may still act on it, and its
/// late acknowledgement is discarded.
pub struct SignalingChannel {
    outbound: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    pending: PendingAcks,
    state: Arc<RwLock<ConnectionState>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    request_timeout: Duration,
}

impl SignalingChannel {
    /// Connect to the server named in `config`.
    #[instrument(name = "signaling_connect", skip_all, fields(url = %config.server_url))]
    pub async fn connect(
        connector: &dyn Connector,
        config: &SessionConfig,
    ) -> TransportResult<Self> {
        let url = parse_server_url(&config.server_url)?;
        info!("Connecting to signaling server");

        let halves = match tokio::time::timeout(config.connect_timeout(), connector.connect(&url))
            .await
        {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => {
                warn!("Signaling connection failed: {}", e);
                return Err(e);
            }
            Err(_) => {
                warn!("Signaling connection timed out");
                return Err(TransportError::SignalingTimeout {
                    method: "connect".to_string(),
                    timeout_ms: config.connect_timeout_ms,
                });
            }
        };

        info!("Connected to signaling server");
        Ok(Self::from_socket(halves, config.request_timeout()))
    }

    /// Wrap an already connected socket.
    pub fn from_socket(halves: SocketHalves, request_timeout: Duration) -> Self {
        let SocketHalves { outbound, inbound } = halves;
        let pending: PendingAcks = Arc::new(Mutex::new(HashMap::new()));
        let state = Arc::new(RwLock::new(ConnectionState::Connected));

        let dispatcher = tokio::spawn(dispatch_acks(
            inbound,
            Arc::clone(&pending),
            Arc::clone(&state),
        ));

        Self {
            outbound: Mutex::new(Some(outbound)),
            pending,
            state,
            dispatcher: Mutex::new(Some(dispatcher)),
            request_timeout,
        }
    }

    /// Emit `method` and wait for its acknowledgement.
    pub async fn request(&self, method: &str, payload: Option<Value>) -> TransportResult<Value> {
        if self.state().is_lost() {
            return Err(TransportError::ChannelDisconnected);
        }

        let ack_rx = {
            let mut pending = self.pending.lock();
            if pending.get(method).is_some_and(|tx| !tx.is_closed()) {
                return Err(TransportError::RequestInFlight(method.to_string()));
            }
            let (tx, rx) = oneshot::channel();
            pending.insert(method.to_string(), tx);
            rx
        };

        if let Err(e) = self.emit(method, payload) {
            self.pending.lock().remove(method);
            return Err(e);
        }
        debug!(method, "Signaling request sent");

        match tokio::time::timeout(self.request_timeout, ack_rx).await {
            Ok(Ok(response)) => {
                debug!(method, "Signaling request acknowledged");
                Ok(response)
            }
            Ok(Err(_)) => Err(TransportError::ChannelDisconnected),
            Err(_) => {
                self.pending.lock().remove(method);
                warn!(method, "Signaling request timed out");
                Err(TransportError::SignalingTimeout {
                    method: method.to_string(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    fn emit(&self, method: &str, data: Option<Value>) -> TransportResult<()> {
        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(TransportError::NotConnected)?;

        tx.send(Envelope::Emit {
            event: method.to_string(),
            data,
        })
        .map_err(|_| TransportError::ChannelDisconnected)
    }

    /// Close the socket. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let outbound = self.outbound.lock().take();
        let dispatcher = self.dispatcher.lock().take();

        if outbound.is_none() && dispatcher.is_none() {
            return;
        }

        if let Some(handle) = dispatcher {
            handle.abort();
        }
        self.pending.lock().clear();
        *self.state.write() = ConnectionState::Disconnected;

        info!("Disconnected from signaling server");
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected()
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn dispatch_acks(
    mut inbound: mpsc::UnboundedReceiver<Envelope>,
    pending: PendingAcks,
    state: Arc<RwLock<ConnectionState>>,
) {
    while let Some(envelope) = inbound.recv().await {
        match envelope {
            Envelope::Ack { event, data } => match pending.lock().remove(&event) {
                Some(tx) => {
                    if tx.send(data).is_err() {
                        debug!(event = %event, "Acknowledgement arrived after the waiter left");
                    }
                }
                None => debug!(event = %event, "Discarding late acknowledgement"),
            },
            Envelope::Emit { event, .. } => trace!(event = %event, "Ignoring server event"),
        }
    }

    *state.write() = ConnectionState::Lost;
    pending.lock().clear();
    warn!("Signaling connection closed by server");
}
