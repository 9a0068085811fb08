//! Producers for the local tracks.

use std::fmt;

use tracing::{info, warn};

use broadcaster_capture::{LocalTrack, TrackEndedListener};
use broadcaster_ipc::ProducerInfo;

use crate::device::{Producer, SendTransport};
use crate::error::TransportError;

/// A producer bound to the track it sends.
pub struct ProducerHandle {
    producer: Box<dyn Producer>,
    track: LocalTrack,
    ended: TrackEndedListener,
}

impl ProducerHandle {
    pub fn info(&self) -> ProducerInfo {
        ProducerInfo {
            id: self.producer.id().to_string(),
            kind: self.producer.kind(),
            track_id: self.track.id().to_string(),
        }
    }

    pub fn track(&self) -> &LocalTrack {
        &self.track
    }

    fn close(&mut self) {
        if !self.producer.is_closed() {
            self.producer.close();
        }
    }
}

impl fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("id", &self.producer.id())
            .field("kind", &self.producer.kind())
            .field("track", &self.track)
            .finish()
    }
}

/// Result of producing a batch of tracks.
#[derive(Debug, Default)]
pub struct ProduceOutcome {
    pub created: Vec<ProducerInfo>,
    /// Per-track failures, always [`TransportError::Produce`].
    pub failures: Vec<TransportError>,
}

impl ProduceOutcome {
    /// Check if not a single track is being sent.
    pub fn is_total_failure(&self) -> bool {
        self.created.is_empty()
    }
}

/// Producers of the current session, one per track.
#[derive(Debug, Default)]
pub struct ProducerRegistry {
    producers: Vec<ProducerHandle>,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce each track in turn.
    ///
    /// Tracks are produced one at a time since acknowledgements are matched
    /// by method name. A failing track does not stop the others.
    pub async fn produce(
        &mut self,
        transport: &mut dyn SendTransport,
        tracks: &[LocalTrack],
    ) -> ProduceOutcome {
        let mut outcome = ProduceOutcome::default();

        for track in tracks {
            let kind = track.kind();
            match transport.produce(track).await {
                Ok(producer) => {
                    let handle = ProducerHandle {
                        producer,
                        track: track.clone(),
                        ended: track.on_ended(),
                    };
                    let info = handle.info();
                    info!(producer_id = %info.id, kind = %kind, "Producer created");
                    outcome.created.push(info);
                    self.producers.push(handle);
                }
                Err(e) => {
                    let e = match e {
                        TransportError::Produce { .. } => e,
                        other => TransportError::Produce {
                            kind,
                            message: other.to_string(),
                        },
                    };
                    warn!("{}", e);
                    outcome.failures.push(e);
                }
            }
        }

        outcome
    }

    /// Close and drop producers whose track has ended.
    pub fn reap_ended(&mut self) -> Vec<ProducerInfo> {
        let mut reaped = Vec::new();

        self.producers.retain_mut(|handle| {
            if !handle.ended.has_ended() {
                return true;
            }
            handle.close();
            let info = handle.info();
            info!(producer_id = %info.id, kind = %info.kind, "Track ended, producer closed");
            reaped.push(info);
            false
        });

        reaped
    }

    /// Close every producer. Safe to call repeatedly.
    pub fn close_all(&mut self) {
        for mut handle in self.producers.drain(..) {
            handle.close();
        }
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    pub fn infos(&self) -> Vec<ProducerInfo> {
        self.producers.iter().map(ProducerHandle::info).collect()
    }
}

impl Drop for ProducerRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device::DeviceNegotiator;
    use crate::loopback::{LoopbackDeviceFactory, LoopbackServer, Reply};
    use crate::protocol::PRODUCE;
    use crate::send_transport::{TransportHandle, TransportManager};
    use crate::signaling::SignalingChannel;
    use broadcaster_ipc::{MediaKind, SessionConfig};
    use serde_json::json;

    async fn transport(
        server: &LoopbackServer,
        factory: &LoopbackDeviceFactory,
    ) -> TransportHandle {
        let channel = Arc::new(
            SignalingChannel::connect(server, &SessionConfig::default())
                .await
                .unwrap(),
        );
        let device = DeviceNegotiator::new(factory)
            .negotiate(&channel)
            .await
            .unwrap();
        TransportManager::new(channel)
            .create_transport(&device)
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_producer_per_track() {
        let server = LoopbackServer::new();
        let factory = LoopbackDeviceFactory::new();
        let mut handle = transport(&server, &factory).await;
        let tracks = [
            LocalTrack::new(MediaKind::Video, "cam"),
            LocalTrack::new(MediaKind::Audio, "mic"),
        ];

        let mut registry = ProducerRegistry::new();
        let outcome = registry.produce(handle.transport_mut(), &tracks).await;

        assert!(outcome.failures.is_empty());
        let ids: Vec<_> = outcome.created.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["p1", "p2"]);
        assert_eq!(outcome.created[0].track_id, tracks[0].id());
        assert_eq!(registry.len(), 2);
        assert_eq!(
            server.requests(),
            [
                "getRouterRtpCapabilities",
                "createWebRtcTransport",
                "connectTransport",
                "produce",
                "produce"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_keeps_other_producers() {
        let server = LoopbackServer::new();
        let factory = LoopbackDeviceFactory::new();
        let mut handle = transport(&server, &factory).await;
        let video = LocalTrack::new(MediaKind::Video, "cam");
        let audio = LocalTrack::new(MediaKind::Audio, "mic");
        video.end();

        let mut registry = ProducerRegistry::new();
        let outcome = registry
            .produce(handle.transport_mut(), &[video, audio])
            .await;

        assert_eq!(outcome.created.len(), 1);
        assert_eq!(outcome.created[0].kind, MediaKind::Audio);
        assert!(!outcome.is_total_failure());
        assert!(matches!(
            outcome.failures.as_slice(),
            [TransportError::Produce { kind: MediaKind::Video, .. }]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_is_reported_per_kind() {
        let server = LoopbackServer::new();
        server.set_reply(PRODUCE, Reply::Ack(json!({"error": "no room"})));
        let factory = LoopbackDeviceFactory::new();
        let mut handle = transport(&server, &factory).await;

        let mut registry = ProducerRegistry::new();
        let outcome = registry
            .produce(
                handle.transport_mut(),
                &[LocalTrack::new(MediaKind::Video, "cam")],
            )
            .await;

        assert!(outcome.is_total_failure());
        assert_eq!(
            outcome.failures[0].to_string(),
            "Error producing video: no room"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_track_closes_only_its_producer() {
        let server = LoopbackServer::new();
        let factory = LoopbackDeviceFactory::new();
        let mut handle = transport(&server, &factory).await;
        let video = LocalTrack::new(MediaKind::Video, "cam");
        let audio = LocalTrack::new(MediaKind::Audio, "mic");

        let mut registry = ProducerRegistry::new();
        registry
            .produce(handle.transport_mut(), &[video.clone(), audio])
            .await;
        assert_eq!(factory.open_producers(), 2);

        assert!(registry.reap_ended().is_empty());
        video.end();
        let reaped = registry.reap_ended();

        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].kind, MediaKind::Video);
        assert_eq!(registry.infos()[0].kind, MediaKind::Audio);
        assert_eq!(factory.open_producers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_track_is_not_reaped() {
        let server = LoopbackServer::new();
        let factory = LoopbackDeviceFactory::new();
        let mut handle = transport(&server, &factory).await;
        let video = LocalTrack::new(MediaKind::Video, "cam");

        let mut registry = ProducerRegistry::new();
        registry
            .produce(handle.transport_mut(), &[video.clone()])
            .await;
        video.stop();

        assert!(registry.reap_ended().is_empty());
        registry.close_all();
        registry.close_all();
        assert_eq!(factory.open_producers(), 0);
    }
}
