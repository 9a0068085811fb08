//! Signaling messages and payloads.
//!
//! The channel exchanges [`Envelope`]s and matches acks by method name only.
//! Connectors put them on the wire: [`SocketIoConnector`](crate::SocketIoConnector)
//! as Socket.IO events with ack ids, [`WebSocketConnector`](crate::WebSocketConnector)
//! as plain JSON text frames of the form
//! `{"type":"emit","event":<method>,"data":<payload>}` and
//! `{"type":"ack","event":<method>,"data":<response>}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use broadcaster_ipc::MediaKind;

use crate::error::TransportError;
use crate::TransportResult;

pub const GET_ROUTER_RTP_CAPABILITIES: &str = "getRouterRtpCapabilities";
pub const CREATE_WEBRTC_TRANSPORT: &str = "createWebRtcTransport";
pub const CONNECT_TRANSPORT: &str = "connectTransport";
pub const PRODUCE: &str = "produce";

/// One signaling frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Envelope {
    /// An event with an optional payload.
    Emit {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    /// The single-shot acknowledgement of an emitted event.
    Ack {
        event: String,
        #[serde(default)]
        data: Value,
    },
}

/// Router RTP capabilities. Opaque to the session; only the device reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpCapabilities(pub Value);

/// Server-side transport parameters returned by `createWebRtcTransport`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOptions {
    pub id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Vec<Value>,
    pub dtls_parameters: Value,
}

/// Payload of `connectTransport`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    pub transport_id: String,
    pub dtls_parameters: Value,
}

/// Payload of `produce`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub transport_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

/// Successful `produce` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProduceResponse {
    pub id: String,
}

/// Successful `connectTransport` response (`{}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyResponse {}

/// Either `{error}` or the expected payload.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ServerReply<T> {
    Error { error: String },
    Ok(T),
}

/// Decode a response, turning `{error}` into [`TransportError::ServerNegotiation`].
pub fn parse_reply<T: DeserializeOwned>(method: &str, value: Value) -> TransportResult<T> {
    let reply: ServerReply<T> = serde_json::from_value(value).map_err(|e| {
        TransportError::ServerNegotiation(format!("Malformed {} response: {}", method, e))
    })?;

    match reply {
        ServerReply::Ok(payload) => Ok(payload),
        ServerReply::Error { error } => Err(TransportError::ServerNegotiation(error)),
    }
}

/// Unwrap `{key: inner}` to `inner`; any other shape is returned unchanged.
///
/// Servers may answer `getRouterRtpCapabilities` with either the bare
/// capabilities or `{rtpCapabilities}`, and `createWebRtcTransport` with either
/// the bare parameters or `{params}`.
pub fn unwrap_field(value: Value, key: &str) -> Value {
    match value {
        Value::Object(mut map) if map.len() == 1 && map.contains_key(key) => {
            map.remove(key).unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Encode a request payload.
pub fn to_payload<T: Serialize>(request: &T) -> TransportResult<Value> {
    serde_json::to_value(request).map_err(|e| TransportError::Protocol(e.to_string()))
}
