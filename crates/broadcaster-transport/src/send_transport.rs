//! Send transport creation and its signaling bridges.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::device::{
    Completion, ConnectEvent, LoadedDevice, ProduceEvent, SendTransport, TransportListener,
};
use crate::error::TransportError;
use crate::protocol::{
    parse_reply, to_payload, unwrap_field, ConnectTransportRequest, EmptyResponse,
    ProduceRequest, ProduceResponse, TransportOptions, CONNECT_TRANSPORT,
    CREATE_WEBRTC_TRANSPORT, PRODUCE,
};
use crate::signaling::SignalingChannel;
use crate::TransportResult;

/// Creates the session's send transport.
pub struct TransportManager {
    channel: Arc<SignalingChannel>,
}

impl TransportManager {
    pub fn new(channel: Arc<SignalingChannel>) -> Self {
        Self { channel }
    }

    /// Ask the server for a transport, build the local half and wire its
    /// bridges.
    #[instrument(name = "create_transport", skip_all)]
    pub async fn create_transport(&self, device: &LoadedDevice) -> TransportResult<TransportHandle> {
        let response = self.channel.request(CREATE_WEBRTC_TRANSPORT, None).await?;
        let options: TransportOptions =
            parse_reply(CREATE_WEBRTC_TRANSPORT, unwrap_field(response, "params"))?;

        info!(transport_id = %options.id, "Server transport created");

        let bridge = Arc::new(SignalingBridge::new(
            Arc::clone(&self.channel),
            options.id.clone(),
        ));

        let transport = device
            .device()
            .create_send_transport(options.clone(), bridge)
            .map_err(|e| {
                TransportError::ServerNegotiation(format!("Could not create send transport: {}", e))
            })?;

        Ok(TransportHandle { transport, options })
    }
}

/// The session's send transport and its server descriptor.
pub struct TransportHandle {
    transport: Box<dyn SendTransport>,
    options: TransportOptions,
}

impl TransportHandle {
    pub fn id(&self) -> &str {
        &self.options.id
    }

    /// Server-side parameters this transport was created from.
    pub fn descriptor(&self) -> &TransportOptions {
        &self.options
    }

    pub fn transport_mut(&mut self) -> &mut dyn SendTransport {
        self.transport.as_mut()
    }

    /// Close the local transport. Safe to call repeatedly.
    pub fn close(&mut self) {
        if !self.transport.is_closed() {
            self.transport.close();
            info!(transport_id = %self.options.id, "Transport closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("id", &self.options.id)
            .field("closed", &self.transport.is_closed())
            .finish()
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Maps transport negotiation needs onto signaling requests.
#[derive(Clone)]
pub struct SignalingBridge {
    channel: Arc<SignalingChannel>,
    transport_id: String,
}

impl SignalingBridge {
    pub fn new(channel: Arc<SignalingChannel>, transport_id: String) -> Self {
        Self {
            channel,
            transport_id,
        }
    }

    /// Forward DTLS parameters with `connectTransport`.
    pub async fn connect(&self, event: ConnectEvent) -> TransportResult<()> {
        let request = ConnectTransportRequest {
            transport_id: self.transport_id.clone(),
            dtls_parameters: event.dtls_parameters,
        };

        let response = self
            .channel
            .request(CONNECT_TRANSPORT, Some(to_payload(&request)?))
            .await?;
        parse_reply::<EmptyResponse>(CONNECT_TRANSPORT, response)?;

        debug!(transport_id = %self.transport_id, "Transport connected");
        Ok(())
    }

    /// Register a new outbound stream with `produce`; returns the producer id.
    pub async fn produce(&self, event: ProduceEvent) -> TransportResult<String> {
        let request = ProduceRequest {
            transport_id: self.transport_id.clone(),
            kind: event.kind,
            rtp_parameters: event.rtp_parameters,
        };

        let response = self
            .channel
            .request(PRODUCE, Some(to_payload(&request)?))
            .await?;
        let ProduceResponse { id } = parse_reply(PRODUCE, response)?;

        debug!(producer_id = %id, kind = %event.kind, "Producer registered");
        Ok(id)
    }
}

impl TransportListener for SignalingBridge {
    fn on_connect(&self, event: ConnectEvent, done: Completion<()>) {
        let bridge = self.clone();
        tokio::spawn(async move {
            match bridge.connect(event).await {
                Ok(()) => done.resolve(()),
                Err(e) => {
                    warn!("connectTransport failed: {}", e);
                    done.reject(e.to_string());
                }
            }
        });
    }

    fn on_produce(&self, event: ProduceEvent, done: Completion<String>) {
        let bridge = self.clone();
        tokio::spawn(async move {
            match bridge.produce(event).await {
                Ok(id) => done.resolve(id),
                Err(e) => {
                    warn!("produce failed: {}", e);
                    done.reject(e.to_string());
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceNegotiator;
    use crate::loopback::{LoopbackDeviceFactory, LoopbackServer, Reply};
    use broadcaster_ipc::{MediaKind, SessionConfig};
    use serde_json::json;

    async fn bridge_for(server: &LoopbackServer) -> SignalingBridge {
        let channel = SignalingChannel::connect(server, &SessionConfig::default())
            .await
            .unwrap();
        SignalingBridge::new(Arc::new(channel), "t1".into())
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_bridge_resolves_on_empty_ack() {
        let server = LoopbackServer::new();
        let bridge = bridge_for(&server).await;
        let (done, rx) = Completion::channel();

        bridge.on_connect(
            ConnectEvent {
                dtls_parameters: json!({"role": "client"}),
            },
            done,
        );

        assert_eq!(rx.await.unwrap(), Ok(()));
        assert_eq!(
            server.payloads(CONNECT_TRANSPORT),
            [Some(json!({"transportId": "t1", "dtlsParameters": {"role": "client"}}))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_bridge_rejects_with_server_message() {
        let server = LoopbackServer::new();
        server.set_reply(CONNECT_TRANSPORT, Reply::Ack(json!({"error": "x"})));
        let bridge = bridge_for(&server).await;
        let (done, rx) = Completion::channel();

        bridge.on_connect(
            ConnectEvent {
                dtls_parameters: json!({}),
            },
            done,
        );

        assert_eq!(rx.await.unwrap(), Err("x".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_bridge_rejects_on_timeout() {
        let server = LoopbackServer::new();
        server.set_reply(CONNECT_TRANSPORT, Reply::Silent);
        let bridge = bridge_for(&server).await;
        let (done, rx) = Completion::channel();

        bridge.on_connect(
            ConnectEvent {
                dtls_parameters: json!({}),
            },
            done,
        );

        let message = rx.await.unwrap().unwrap_err();
        assert!(message.starts_with("Timeout waiting for connectTransport"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_produce_bridge_resolves_with_server_id() {
        let server = LoopbackServer::new();
        let bridge = bridge_for(&server).await;
        let (done, rx) = Completion::channel();

        bridge.on_produce(
            ProduceEvent {
                kind: MediaKind::Audio,
                rtp_parameters: json!({"mid": "0"}),
            },
            done,
        );

        assert_eq!(rx.await.unwrap(), Ok("p1".to_string()));
        let sent = server.payloads(PRODUCE);
        assert_eq!(sent[0].as_ref().unwrap()["kind"], "audio");
        assert_eq!(sent[0].as_ref().unwrap()["transportId"], "t1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_transport_error_payload() {
        let server = LoopbackServer::new();
        server.set_reply(
            CREATE_WEBRTC_TRANSPORT,
            Reply::Ack(json!({"params": {"error": "router closed"}})),
        );
        let channel = Arc::new(
            SignalingChannel::connect(&server, &SessionConfig::default())
                .await
                .unwrap(),
        );
        let factory = LoopbackDeviceFactory::new();
        let device = DeviceNegotiator::new(&factory)
            .negotiate(&channel)
            .await
            .unwrap();

        let err = TransportManager::new(channel)
            .create_transport(&device)
            .await
            .unwrap_err();

        assert_eq!(err, TransportError::ServerNegotiation("router closed".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_transport_uses_server_descriptor() {
        let server = LoopbackServer::new();
        let channel = Arc::new(
            SignalingChannel::connect(&server, &SessionConfig::default())
                .await
                .unwrap(),
        );
        let factory = LoopbackDeviceFactory::new();
        let device = DeviceNegotiator::new(&factory)
            .negotiate(&channel)
            .await
            .unwrap();

        let mut handle = TransportManager::new(channel)
            .create_transport(&device)
            .await
            .unwrap();

        assert_eq!(handle.id(), "t1");
        assert_eq!(handle.transport_mut().id(), "t1");
        handle.close();
        handle.close();
        assert!(handle.is_closed());
    }
}
