//! SFU signaling, send transport and producers.
//!
//! This crate talks to the media server: a request/acknowledgement
//! [`SignalingChannel`], the [`DeviceNegotiator`] that loads the local device
//! with the router capabilities, the [`TransportManager`] that creates the send
//! transport and bridges its negotiation callbacks to signaling requests, and
//! the [`ProducerRegistry`] holding one producer per local track.

mod connection;
mod device;
mod error;
#[cfg(any(test, feature = "loopback"))]
pub mod loopback;
mod producer;
pub mod protocol;
mod send_transport;
mod signaling;
mod socket;
mod socketio;

pub use connection::ConnectionState;
pub use device::{
    Completion, CompletionReceiver, ConnectEvent, Device, DeviceFactory, DeviceNegotiator,
    LoadedDevice, ProduceEvent, Producer, SendTransport, TransportListener,
};
pub use error::TransportError;
pub use producer::{ProduceOutcome, ProducerHandle, ProducerRegistry};
pub use send_transport::{SignalingBridge, TransportHandle, TransportManager};
pub use signaling::SignalingChannel;
pub use socket::{parse_server_url, Connector, SocketHalves, WebSocketConnector};
pub use socketio::SocketIoConnector;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
