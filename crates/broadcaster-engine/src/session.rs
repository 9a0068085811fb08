//! The broadcast session controller.

use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, error, info, instrument, warn};

use broadcaster_capture::{LocalStream, MediaAcquisition, MediaSource, PreviewSink};
use broadcaster_ipc::{
    MediaKind, ProducerInfo, SessionConfig, SessionEvent, SessionState, StopReason,
};
use broadcaster_transport::{
    Connector, DeviceFactory, DeviceNegotiator, SignalingChannel, TransportError,
    TransportManager,
};

use crate::error::{SessionError, NO_MEDIA_MESSAGE};
use crate::state::SessionResources;
use crate::SessionResult;

/// External services a session is built on.
#[derive(Clone)]
pub struct SessionServices {
    /// Opens the signaling socket.
    pub connector: Arc<dyn Connector>,
    /// Builds the negotiation device.
    pub devices: Arc<dyn DeviceFactory>,
    /// Opens camera and microphone.
    pub media: Arc<dyn MediaSource>,
}

/// Forwards preview changes to the UI.
struct EventPreview {
    event_tx: Sender<SessionEvent>,
}

impl PreviewSink for EventPreview {
    fn show(&self, stream: Option<&LocalStream>) {
        let event = SessionEvent::PreviewChanged(stream.map(LocalStream::snapshot));
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send preview event: {}", e);
        }
    }
}

/// Drives one broadcaster session: local media, the go-live sequence and
/// teardown.
pub struct SessionController {
    config: SessionConfig,
    services: SessionServices,
    media: MediaAcquisition,
    resources: SessionResources,
    state: SessionState,
    error: Option<String>,
    event_tx: Sender<SessionEvent>,
}

impl SessionController {
    /// Create a controller. Nothing is captured or connected yet.
    pub fn new(
        config: SessionConfig,
        services: SessionServices,
        event_tx: Sender<SessionEvent>,
    ) -> Self {
        let mut media = MediaAcquisition::new(Arc::clone(&services.media));
        media.set_preview(Arc::new(EventPreview {
            event_tx: event_tx.clone(),
        }));

        Self {
            config,
            services,
            media,
            resources: SessionResources::new(),
            state: SessionState::Idle,
            error: None,
            event_tx,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Status banner text.
    pub fn status(&self) -> &'static str {
        self.state.status_message()
    }

    /// Last error shown to the user, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn media(&self) -> &MediaAcquisition {
        &self.media
    }

    pub fn producers(&self) -> Vec<ProducerInfo> {
        self.resources.producers.infos()
    }

    pub fn transport_id(&self) -> Option<&str> {
        self.resources.transport_id()
    }

    /// Check if any session resource is still held.
    pub fn has_resources(&self) -> bool {
        !self.resources.is_empty()
    }

    pub async fn set_camera(&mut self, enabled: bool) -> SessionResult<()> {
        self.set_media(MediaKind::Video, enabled).await
    }

    pub async fn set_microphone(&mut self, enabled: bool) -> SessionResult<()> {
        self.set_media(MediaKind::Audio, enabled).await
    }

    pub async fn toggle_camera(&mut self) -> SessionResult<bool> {
        self.toggle_media(MediaKind::Video).await
    }

    pub async fn toggle_microphone(&mut self) -> SessionResult<bool> {
        self.toggle_media(MediaKind::Audio).await
    }

    /// Enable or disable one kind of local media.
    ///
    /// While broadcasting this only changes the local stream and preview;
    /// producers are left as they are.
    pub async fn set_media(&mut self, kind: MediaKind, enabled: bool) -> SessionResult<()> {
        let result = if enabled {
            self.media.enable(kind).await
        } else {
            self.media.disable(kind);
            Ok(())
        };

        self.send_media_changed();
        result.map_err(|e| self.report(SessionError::from(e)))
    }

    async fn toggle_media(&mut self, kind: MediaKind) -> SessionResult<bool> {
        let result = self.media.toggle(kind).await;

        self.send_media_changed();
        result.map_err(|e| self.report(SessionError::from(e)))
    }

    /// Run the go-live sequence.
    ///
    /// Ignored while a previous attempt is in progress or live. On failure
    /// everything the attempt built is released and the session is `Failed`;
    /// local media is kept so the user can retry.
    #[instrument(name = "go_live", skip(self))]
    pub async fn go_live(&mut self) -> SessionResult<()> {
        if self.state.is_starting() || self.state.is_live() {
            debug!("Already starting or live, ignoring go live");
            return Ok(());
        }

        if !self.media.has_media() {
            return Err(self.report(SessionError::Validation(NO_MEDIA_MESSAGE.to_string())));
        }

        self.resources.release();
        self.error = None;
        self.transition_to(SessionState::Connecting)?;

        match self.setup().await {
            Ok(()) => {
                info!(
                    producers = self.resources.producers.len(),
                    "Broadcast started"
                );
                Ok(())
            }
            Err(e) => {
                error!("Go live failed: {}", e);
                self.resources.release();
                let message = e.user_message();
                if let Err(invalid) = self.transition_to(SessionState::Failed { message }) {
                    warn!("{}", invalid);
                }
                Err(self.report(e))
            }
        }
    }

    async fn setup(&mut self) -> SessionResult<()> {
        let channel =
            SignalingChannel::connect(self.services.connector.as_ref(), &self.config).await?;
        let channel = Arc::new(channel);
        self.resources.channel = Some(Arc::clone(&channel));

        self.transition_to(SessionState::Negotiating)?;
        let device = DeviceNegotiator::new(self.services.devices.as_ref())
            .negotiate(&channel)
            .await?;

        self.transition_to(SessionState::CreatingTransport)?;
        let transport = TransportManager::new(channel)
            .create_transport(&device)
            .await?;
        self.resources.device = Some(device);
        self.resources.transport = Some(transport);

        self.transition_to(SessionState::Producing)?;
        let tracks = self.media.tracks();
        let SessionResources {
            transport,
            producers,
            ..
        } = &mut self.resources;
        let transport = transport.as_mut().ok_or(TransportError::TransportClosed)?;
        let outcome = producers.produce(transport.transport_mut(), &tracks).await;

        let total_failure = outcome.is_total_failure();
        let mut failures = outcome.failures.into_iter().map(SessionError::from);

        // With nothing produced the first failure fails the session; the rest
        // are still shown.
        let first = if total_failure {
            Some(
                failures
                    .next()
                    .unwrap_or_else(|| SessionError::Validation(NO_MEDIA_MESSAGE.to_string())),
            )
        } else {
            None
        };

        for e in failures {
            self.send_event(SessionEvent::Error {
                recoverable: true,
                message: e.user_message(),
            });
        }

        if let Some(first) = first {
            return Err(first);
        }

        self.send_event(SessionEvent::ProducersChanged(outcome.created));
        self.transition_to(SessionState::Broadcasting)?;
        Ok(())
    }

    /// End the broadcast and release local media.
    #[instrument(name = "stop", skip(self))]
    pub fn stop(&mut self, reason: StopReason) {
        let was_active = self.state.is_starting() || self.state.is_live();

        self.teardown();

        if was_active {
            info!(?reason, "Broadcast stopped");
            if let Err(e) = self.transition_to(SessionState::Stopped { reason }) {
                warn!("{}", e);
            }
        }
    }

    /// Release everything this session holds. Safe to call repeatedly.
    #[instrument(name = "teardown", skip(self))]
    pub fn teardown(&mut self) {
        let had_producers = !self.resources.producers.is_empty();
        let had_media = self.media.stream().is_some()
            || self.media.is_camera_enabled()
            || self.media.is_microphone_enabled();

        self.resources.release();
        if had_producers {
            self.send_event(SessionEvent::ProducersChanged(Vec::new()));
        }

        if had_media {
            self.media.release();
            self.send_media_changed();
        }
    }

    /// Close producers whose track ended on its own. The session keeps
    /// broadcasting.
    pub fn reap_ended_tracks(&mut self) -> Vec<ProducerInfo> {
        let reaped = self.resources.producers.reap_ended();
        if reaped.is_empty() {
            return reaped;
        }

        for info in &reaped {
            self.send_event(SessionEvent::TrackEnded {
                kind: info.kind,
                producer_id: info.id.clone(),
            });
        }
        self.send_event(SessionEvent::ProducersChanged(self.resources.producers.infos()));

        reaped
    }

    /// Re-send the current state.
    pub fn send_state(&self) {
        self.send_event(SessionEvent::StateChanged {
            previous: Box::new(self.state.clone()),
            current: Box::new(self.state.clone()),
        });
        self.send_media_changed();
    }

    fn transition_to(&mut self, new_state: SessionState) -> SessionResult<()> {
        self.state.check_transition(&new_state)?;

        let previous = std::mem::replace(&mut self.state, new_state.clone());

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        let status = new_state.status_message();
        self.send_event(SessionEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new_state),
        });
        if !status.is_empty() {
            self.send_event(SessionEvent::Status(status.to_string()));
        }
        Ok(())
    }

    /// Record and surface an error, handing it back to the caller.
    fn report(&mut self, e: SessionError) -> SessionError {
        let message = e.user_message();
        warn!("{}", message);
        self.error = Some(message.clone());
        self.send_event(SessionEvent::Error {
            recoverable: true,
            message,
        });
        e
    }

    fn send_media_changed(&self) {
        self.send_event(SessionEvent::MediaChanged {
            camera: self.media.is_camera_enabled(),
            microphone: self.media.is_microphone_enabled(),
        });
    }

    fn send_event(&self, event: SessionEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use broadcaster_capture::SyntheticSource;
    use broadcaster_ipc::{event_channel, TrackReadyState};
    use broadcaster_transport::loopback::{
        default_capabilities, LoopbackDeviceFactory, LoopbackServer, Reply,
    };
    use broadcaster_transport::protocol::{
        CONNECT_TRANSPORT, CREATE_WEBRTC_TRANSPORT, GET_ROUTER_RTP_CAPABILITIES, PRODUCE,
    };
    use crossbeam_channel::Receiver;
    use serde_json::json;

    struct Harness {
        server: LoopbackServer,
        devices: LoopbackDeviceFactory,
        source: Arc<SyntheticSource>,
        events: Receiver<SessionEvent>,
        session: SessionController,
    }

    impl Harness {
        fn new() -> Self {
            let server = LoopbackServer::new();
            let devices = LoopbackDeviceFactory::new();
            let source = Arc::new(SyntheticSource::new());
            let (event_tx, events) = event_channel();

            let services = SessionServices {
                connector: Arc::new(server.clone()),
                devices: Arc::new(devices.clone()),
                media: source.clone(),
            };
            let session = SessionController::new(SessionConfig::default(), services, event_tx);

            Self {
                server,
                devices,
                source,
                events,
                session,
            }
        }

        async fn with_camera_and_mic() -> Self {
            let mut h = Self::new();
            h.session.set_camera(true).await.unwrap();
            h.session.set_microphone(true).await.unwrap();
            h
        }

        fn drain(&self) -> Vec<SessionEvent> {
            self.events.try_iter().collect()
        }

        fn errors(&self) -> Vec<String> {
            self.drain()
                .into_iter()
                .filter_map(|event| match event {
                    SessionEvent::Error { message, .. } => Some(message),
                    _ => None,
                })
                .collect()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_go_live_scenario() {
        let mut h = Harness::with_camera_and_mic().await;

        h.session.go_live().await.unwrap();

        assert_eq!(h.session.state(), &SessionState::Broadcasting);
        assert_eq!(h.session.status(), "Broadcasting");
        assert_eq!(h.session.transport_id(), Some("t1"));

        let producers = h.session.producers();
        assert_eq!(producers.len(), 2);
        assert_eq!(producers[0].id, "p1");
        assert_eq!(producers[0].kind, MediaKind::Video);
        assert_eq!(producers[1].id, "p2");
        assert_eq!(producers[1].kind, MediaKind::Audio);

        assert_eq!(
            h.server.requests(),
            [
                GET_ROUTER_RTP_CAPABILITIES,
                CREATE_WEBRTC_TRANSPORT,
                CONNECT_TRANSPORT,
                PRODUCE,
                PRODUCE
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_live_reports_each_step() {
        let mut h = Harness::with_camera_and_mic().await;
        h.drain();

        h.session.go_live().await.unwrap();

        let statuses: Vec<String> = h
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::Status(status) => Some(status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            [
                "Connecting to server...",
                "Initializing WebRTC...",
                "Creating transport...",
                "Starting broadcast...",
                "Broadcasting"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_live_without_media_never_connects() {
        let mut h = Harness::new();

        let err = h.session.go_live().await.unwrap_err();

        assert_eq!(err, SessionError::Validation(NO_MEDIA_MESSAGE.into()));
        assert_eq!(h.session.state(), &SessionState::Idle);
        assert_eq!(h.session.error(), Some(NO_MEDIA_MESSAGE));
        assert_eq!(h.server.connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capabilities_timeout_halts_sequence() {
        let mut h = Harness::with_camera_and_mic().await;
        h.server
            .set_reply(GET_ROUTER_RTP_CAPABILITIES, Reply::Silent);

        let err = h.session.go_live().await.unwrap_err();

        assert!(matches!(err, SessionError::Transport(ref e) if e.is_timeout()));
        assert_eq!(
            h.session.state(),
            &SessionState::Failed {
                message: "Connection error: Timeout waiting for getRouterRtpCapabilities after 5000 ms"
                    .into()
            }
        );
        assert_eq!(h.session.status(), "Connection failed");
        assert_eq!(h.server.requests(), [GET_ROUTER_RTP_CAPABILITIES]);
        assert_eq!(h.devices.loads(), 0);
        assert!(!h.session.has_resources());
        assert!(h.session.media().has_media());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connection_fails_session() {
        let mut h = Harness::with_camera_and_mic().await;
        h.server.refuse_connections();

        let err = h.session.go_live().await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::Transport(TransportError::SignalingConnect(_))
        ));
        assert!(h.session.state().is_failed());
        assert!(h.session.error().unwrap().starts_with("Connection error: "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_connection_fails_before_negotiation() {
        let mut h = Harness::with_camera_and_mic().await;
        h.server.stall_connections();

        let err = h.session.go_live().await.unwrap_err();

        assert_eq!(
            err,
            SessionError::Transport(TransportError::SignalingTimeout {
                method: "connect".into(),
                timeout_ms: 5000
            })
        );
        assert!(h.session.state().is_failed());
        assert_eq!(
            h.session.error(),
            Some("Connection error: Timeout waiting for connect after 5000 ms")
        );
        assert_eq!(h.devices.loads(), 0);
        assert!(h.server.requests().is_empty());
        assert!(!h.session.has_resources());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_error_fails_before_any_produce() {
        let mut h = Harness::with_camera_and_mic().await;
        h.server
            .set_reply(CONNECT_TRANSPORT, Reply::Ack(json!({"error": "x"})));

        h.session.go_live().await.unwrap_err();

        assert_eq!(
            h.session.state(),
            &SessionState::Failed {
                message: "Error producing video: x".into()
            }
        );
        assert_eq!(h.server.payloads(CONNECT_TRANSPORT).len(), 1);
        assert!(h.server.payloads(PRODUCE).is_empty());
        assert_eq!(h.devices.open_transports(), 0);
        assert!(h.session.producers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_payload_fails_session() {
        let mut h = Harness::with_camera_and_mic().await;
        h.server.set_reply(
            CREATE_WEBRTC_TRANSPORT,
            Reply::Ack(json!({"error": "router closed"})),
        );

        h.session.go_live().await.unwrap_err();

        assert_eq!(h.session.error(), Some("Connection error: router closed"));
        assert!(!h.server.requests().iter().any(|m| m == CONNECT_TRANSPORT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_production_keeps_broadcasting() {
        let mut h = Harness::with_camera_and_mic().await;
        h.server.set_reply(
            GET_ROUTER_RTP_CAPABILITIES,
            Reply::Ack(json!({"codecs": [{"kind": "audio", "mimeType": "audio/opus"}]})),
        );
        h.drain();

        h.session.go_live().await.unwrap();

        assert!(h.session.is_live());
        assert_eq!(h.session.producers().len(), 1);
        assert_eq!(
            h.errors(),
            ["Error producing video: Device cannot produce video"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_track_failing_reports_each_failure() {
        let mut h = Harness::with_camera_and_mic().await;
        h.server
            .set_reply(PRODUCE, Reply::Ack(json!({"error": "router full"})));
        h.drain();

        h.session.go_live().await.unwrap_err();

        assert_eq!(
            h.session.state(),
            &SessionState::Failed {
                message: "Error producing video: router full".into()
            }
        );
        assert_eq!(h.server.payloads(PRODUCE).len(), 2);

        let errors = h.errors();
        assert_eq!(errors.len(), 2);
        assert!(errors.contains(&"Error producing video: router full".to_string()));
        assert!(errors.contains(&"Error producing audio: router full".to_string()));
        assert!(!h.session.has_resources());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_twice_releases_everything() {
        let mut h = Harness::with_camera_and_mic().await;
        h.session.go_live().await.unwrap();

        h.session.stop(StopReason::UserRequested);
        h.session.stop(StopReason::UserRequested);
        h.session.teardown();

        assert_eq!(
            h.session.state(),
            &SessionState::Stopped {
                reason: StopReason::UserRequested
            }
        );
        assert_eq!(h.session.status(), "Stopped");
        assert!(!h.session.has_resources());
        assert!(!h.session.media().is_camera_enabled());
        assert!(!h.session.media().is_microphone_enabled());
        assert!(h.session.media().stream().is_none());
        assert_eq!(h.devices.open_producers(), 0);
        assert_eq!(h.devices.open_transports(), 0);
        assert!(h
            .source
            .issued()
            .iter()
            .all(|t| t.ready_state() == TrackReadyState::Stopped));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.server.open_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_preview() {
        let mut h = Harness::with_camera_and_mic().await;
        h.session.go_live().await.unwrap();
        h.drain();

        h.session.stop(StopReason::UserRequested);

        let events = h.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::PreviewChanged(None))));
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::MediaChanged {
                camera: false,
                microphone: false
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_track_keeps_broadcasting() {
        let mut h = Harness::with_camera_and_mic().await;
        h.session.go_live().await.unwrap();
        h.drain();

        h.source.unplug(MediaKind::Video);
        let reaped = h.session.reap_ended_tracks();

        assert_eq!(reaped.len(), 1);
        assert_eq!(h.session.state(), &SessionState::Broadcasting);
        let producers = h.session.producers();
        assert_eq!(producers.len(), 1);
        assert_eq!(producers[0].kind, MediaKind::Audio);
        assert_eq!(h.devices.open_producers(), 1);

        let events = h.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::TrackEnded { kind: MediaKind::Video, producer_id } if producer_id == "p1"
        )));
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::Error { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_failure_builds_fresh_session() {
        let mut h = Harness::with_camera_and_mic().await;
        h.server
            .set_reply(GET_ROUTER_RTP_CAPABILITIES, Reply::Silent);
        h.session.go_live().await.unwrap_err();

        h.server.set_reply(
            GET_ROUTER_RTP_CAPABILITIES,
            Reply::Ack(json!({ "rtpCapabilities": default_capabilities() })),
        );
        h.session.go_live().await.unwrap();

        assert!(h.session.is_live());
        assert_eq!(h.session.error(), None);
        assert_eq!(h.server.connections(), 2);
        assert_eq!(h.devices.loads(), 1);
        assert_eq!(h.session.producers().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_live_while_live_is_ignored() {
        let mut h = Harness::with_camera_and_mic().await;
        h.session.go_live().await.unwrap();

        h.session.go_live().await.unwrap();

        assert_eq!(h.server.connections(), 1);
        assert_eq!(h.session.producers().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_camera_keeps_flag_off() {
        let mut h = Harness::new();
        h.source.deny(MediaKind::Video);

        let err = h.session.set_camera(true).await.unwrap_err();

        assert!(matches!(err, SessionError::MediaAccess(_)));
        assert!(!h.session.media().is_camera_enabled());
        assert_eq!(
            h.session.error(),
            Some("Could not access camera: permission denied")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_while_live_leaves_producers() {
        let mut h = Harness::with_camera_and_mic().await;
        h.session.go_live().await.unwrap();

        assert!(!h.session.toggle_camera().await.unwrap());

        assert!(h.session.is_live());
        assert_eq!(h.session.producers().len(), 2);
        assert!(!h.session.media().is_camera_enabled());
        assert!(h.session.toggle_camera().await.unwrap());
        assert_eq!(h.server.payloads(PRODUCE).len(), 2);
    }
}
