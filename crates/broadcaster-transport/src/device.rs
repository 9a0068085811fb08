//! Local negotiation device and the seams of the transport library.
//!
//! The device, its send transport and producers come from a WebRTC
//! negotiation library. The session only sees them through these traits.
//! A send transport reports negotiation needs to its [`TransportListener`]
//! and waits on a [`Completion`] the listener must finish exactly once.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{info, instrument};

use broadcaster_capture::LocalTrack;
use broadcaster_ipc::MediaKind;

use crate::error::TransportError;
use crate::protocol::{
    parse_reply, unwrap_field, RtpCapabilities, TransportOptions, GET_ROUTER_RTP_CAPABILITIES,
};
use crate::signaling::SignalingChannel;
use crate::TransportResult;

/// Receiving side of a [`Completion`].
pub type CompletionReceiver<T> = oneshot::Receiver<Result<T, String>>;

/// Callback/errback pair handed to a transport listener.
///
/// Consuming `resolve` or `reject` completes it; a transport waiting on it
/// never proceeds otherwise.
pub struct Completion<T> {
    tx: oneshot::Sender<Result<T, String>>,
}

impl<T> Completion<T> {
    /// Create a completion and the receiver the transport waits on.
    pub fn channel() -> (Self, CompletionReceiver<T>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Invoke the callback.
    pub fn resolve(self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    /// Invoke the errback.
    pub fn reject(self, message: impl Into<String>) {
        let _ = self.tx.send(Err(message.into()));
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("completed", &self.tx.is_closed())
            .finish()
    }
}

/// The transport needs its secure channel established.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectEvent {
    pub dtls_parameters: Value,
}

/// The transport needs a new outbound stream registered.
#[derive(Debug, Clone, PartialEq)]
pub struct ProduceEvent {
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

/// Receives the negotiation needs of a send transport.
pub trait TransportListener: Send + Sync {
    /// First need for the secure channel. Resolve with nothing.
    fn on_connect(&self, event: ConnectEvent, done: Completion<()>);

    /// A new outbound stream. Resolve with the server producer id.
    fn on_produce(&self, event: ProduceEvent, done: Completion<String>);
}

/// Builds devices from router capabilities.
#[async_trait]
pub trait DeviceFactory: Send + Sync {
    /// Create a device and load it with the router capabilities.
    async fn load(&self, router: &RtpCapabilities) -> TransportResult<Box<dyn Device>>;
}

/// A loaded negotiation device.
pub trait Device: Send + Sync {
    /// Check if the device can send media of `kind` to this router.
    fn can_produce(&self, kind: MediaKind) -> bool;

    /// Create the local half of a send transport.
    fn create_send_transport(
        &self,
        options: TransportOptions,
        listener: Arc<dyn TransportListener>,
    ) -> TransportResult<Box<dyn SendTransport>>;
}

/// Local send transport.
#[async_trait]
pub trait SendTransport: Send + Sync {
    fn id(&self) -> &str;

    /// Start sending `track`. Drives the listener as needed.
    async fn produce(&mut self, track: &LocalTrack) -> TransportResult<Box<dyn Producer>>;

    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// One track being sent.
pub trait Producer: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// A device loaded with this session's router capabilities.
pub struct LoadedDevice {
    device: Box<dyn Device>,
    router_capabilities: RtpCapabilities,
}

impl LoadedDevice {
    pub fn device(&self) -> &dyn Device {
        self.device.as_ref()
    }

    pub fn router_capabilities(&self) -> &RtpCapabilities {
        &self.router_capabilities
    }
}

impl fmt::Debug for LoadedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedDevice")
            .field("can_produce_video", &self.device.can_produce(MediaKind::Video))
            .field("can_produce_audio", &self.device.can_produce(MediaKind::Audio))
            .finish()
    }
}

/// Loads the local device against the remote router.
pub struct DeviceNegotiator<'a> {
    factory: &'a dyn DeviceFactory,
}

impl<'a> DeviceNegotiator<'a> {
    pub fn new(factory: &'a dyn DeviceFactory) -> Self {
        Self { factory }
    }

    /// Fetch router capabilities and load a device with them.
    ///
    /// Timeouts keep their identity; any other failure is reported as a
    /// negotiation error. Nothing is retried.
    #[instrument(name = "negotiate_device", skip_all)]
    pub async fn negotiate(&self, channel: &SignalingChannel) -> TransportResult<LoadedDevice> {
        let response = channel.request(GET_ROUTER_RTP_CAPABILITIES, None).await?;
        let router_capabilities: RtpCapabilities = parse_reply(
            GET_ROUTER_RTP_CAPABILITIES,
            unwrap_field(response, "rtpCapabilities"),
        )?;

        if !router_capabilities.0.is_object() {
            return Err(TransportError::ServerNegotiation(
                "Router returned no RTP capabilities".to_string(),
            ));
        }

        let device = self
            .factory
            .load(&router_capabilities)
            .await
            .map_err(|e| match e {
                TransportError::ServerNegotiation(_) => e,
                other => TransportError::ServerNegotiation(format!(
                    "Could not load device: {}",
                    other
                )),
            })?;

        info!(
            video = device.can_produce(MediaKind::Video),
            audio = device.can_produce(MediaKind::Audio),
            "Device loaded"
        );

        Ok(LoadedDevice {
            device,
            router_capabilities,
        })
    }
}
