use crate::address::{redact, validate_stream_address};
use crate::collaborator::Collaborator;
use crate::error::{OrchestratorError, Result};
use crate::model::{Device, SessionStatus, StreamCandidate, TelemetrySnapshot, VideoState};
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// One monitoring session: at most one active stream, its polling lease,
/// and the discovery results the operator picks from.
///
/// Share it as `Arc<Session>` with the poll scheduler; all mutation goes
/// through its methods.
pub struct Session {
    collaborator: Arc<dyn Collaborator>,
    request_timeout: Duration,
    status_tx: watch::Sender<SessionStatus>,
    stream: Mutex<StreamSlot>,
    telemetry: RwLock<Option<TelemetrySnapshot>>,
    pub(crate) discovery: Mutex<DiscoveryLists>,
    pub(crate) device_generation: AtomicU64,
    pub(crate) candidate_generation: AtomicU64,
}

// Active address and lease share one lock so a tick never sees the lease
// armed next to a stale address.
#[derive(Debug, Default)]
struct StreamSlot {
    active: Option<String>,
    lease: bool,
    video: VideoState,
    displayed: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct DiscoveryLists {
    pub(crate) devices: Vec<Device>,
    pub(crate) candidates: Vec<StreamCandidate>,
    pub(crate) selected: Option<String>,
}

impl Session {
    pub fn new(collaborator: Arc<dyn Collaborator>, request_timeout: Duration) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Idle);
        Self {
            collaborator,
            request_timeout,
            status_tx,
            stream: Mutex::new(StreamSlot::default()),
            telemetry: RwLock::new(None),
            discovery: Mutex::new(DiscoveryLists::default()),
            device_generation: AtomicU64::new(0),
            candidate_generation: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn collaborator(&self) -> Arc<dyn Collaborator> {
        Arc::clone(&self.collaborator)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status_tx.borrow().clone()
    }

    /// Receiver that observes every status transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    #[must_use]
    pub fn active_stream(&self) -> Option<String> {
        self.stream.lock().active.clone()
    }

    #[must_use]
    pub fn lease_active(&self) -> bool {
        self.stream.lock().lease
    }

    #[must_use]
    pub fn video_state(&self) -> VideoState {
        self.stream.lock().video
    }

    /// Active stream as last reported by the collaborator.
    #[must_use]
    pub fn displayed_stream(&self) -> Option<String> {
        self.stream.lock().displayed.clone()
    }

    #[must_use]
    pub fn telemetry(&self) -> Option<TelemetrySnapshot> {
        self.telemetry.read().clone()
    }

    #[must_use]
    pub fn devices(&self) -> Vec<Device> {
        self.discovery.lock().devices.clone()
    }

    #[must_use]
    pub fn candidates(&self) -> Vec<StreamCandidate> {
        self.discovery.lock().candidates.clone()
    }

    #[must_use]
    pub fn selected_address(&self) -> Option<String> {
        self.discovery.lock().selected.clone()
    }

    /// Read-only reachability probe; never touches the active stream.
    pub async fn test_stream(&self, address: &str) -> Result<()> {
        let address = match validate_stream_address(address) {
            Ok(address) => address,
            Err(err) => return Err(self.fail(err)),
        };

        self.set_status(SessionStatus::busy("testing stream"));
        match self
            .call("reachability test", self.collaborator.test_stream(address))
            .await
        {
            Ok(true) => {
                self.set_status(SessionStatus::ready("camera responds"));
                Ok(())
            }
            Ok(false) => {
                self.set_status(SessionStatus::failed("invalid or unreachable"));
                Err(OrchestratorError::domain("invalid or unreachable"))
            }
            Err(err) => {
                debug!(address = %redact(address), error = %err, "reachability test failed");
                self.set_status(SessionStatus::failed("invalid or unreachable"));
                Err(err)
            }
        }
    }

    /// Makes `address` the session's single live stream and arms the lease.
    ///
    /// On failure the previous active stream is kept as it was.
    pub async fn activate_stream(&self, address: &str) -> Result<()> {
        let address = match validate_stream_address(address) {
            Ok(address) => address.to_owned(),
            Err(err) => return Err(self.fail(err)),
        };

        self.set_status(SessionStatus::busy("activating stream"));
        if let Err(err) = self
            .call("activate stream", self.collaborator.activate_stream(&address))
            .await
        {
            let reason = match err.reason().trim() {
                "" => "could not activate stream".to_owned(),
                reason => reason.to_owned(),
            };
            warn!(address = %redact(&address), %reason, "stream activation refused");
            self.set_status(SessionStatus::Failed(reason));
            return Err(err);
        }

        {
            let mut slot = self.stream.lock();
            let previous = slot.active.replace(address.clone());
            slot.lease = true;
            slot.video = VideoState::Live {
                last_token: None,
                frame_bytes: 0,
            };
            if let Some(previous) = previous
                && previous != address
            {
                info!(previous = %redact(&previous), "superseding active stream");
            }
        }
        info!(address = %redact(&address), "stream activated");

        self.refresh_displayed_stream().await;
        self.set_status(SessionStatus::ready("stream activated"));
        Ok(())
    }

    /// Re-reads the collaborator's view of the active stream. Failures are logged only.
    pub async fn refresh_displayed_stream(&self) {
        match self
            .call("current stream", self.collaborator.current_stream())
            .await
        {
            Ok(current) => {
                self.stream.lock().displayed = current;
            }
            Err(err) => {
                warn!(error = %err, "failed to refresh current stream");
            }
        }
    }

    pub fn deactivate(&self) {
        {
            let mut slot = self.stream.lock();
            if let Some(previous) = slot.active.take() {
                info!(address = %redact(&previous), "stream deactivated");
            }
            slot.lease = false;
            slot.video = VideoState::Placeholder;
            slot.displayed = None;
        }
        self.set_status(SessionStatus::Idle);
    }

    /// Active address, only while the lease is armed.
    pub(crate) fn frame_target(&self) -> Option<String> {
        let slot = self.stream.lock();
        if slot.lease { slot.active.clone() } else { None }
    }

    /// Returns false when the lease was disarmed while the frame was in flight.
    pub(crate) fn record_frame(&self, token: u64, frame_bytes: usize) -> bool {
        let mut slot = self.stream.lock();
        if !slot.lease {
            return false;
        }
        slot.video = VideoState::Live {
            last_token: Some(token),
            frame_bytes,
        };
        true
    }

    pub(crate) fn record_telemetry(&self, snapshot: TelemetrySnapshot) {
        *self.telemetry.write() = Some(snapshot);
    }

    pub(crate) fn set_status(&self, status: SessionStatus) {
        debug!(%status, "session status");
        self.status_tx.send_replace(status);
    }

    pub(crate) fn fail(&self, err: OrchestratorError) -> OrchestratorError {
        self.set_status(SessionStatus::failed(err.reason()));
        err
    }

    /// Bounds one collaborator call so no operation stays busy forever.
    pub(crate) async fn call<T, F>(&self, operation: &str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.request_timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::transport(format!(
                "{operation} timed out after {} ms",
                self.request_timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Session;
    use crate::error::OrchestratorError;
    use crate::fake::{Call, FakeCollaborator};
    use crate::model::{SessionStatus, VideoState};
    use std::sync::Arc;
    use std::time::Duration;

    fn session_with(fake: &Arc<FakeCollaborator>) -> Session {
        Session::new(fake.clone(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn activate_sets_active_stream_lease_and_ready() {
        let fake = Arc::new(FakeCollaborator::default());
        let session = session_with(&fake);

        session
            .activate_stream("rtsp://cam/1")
            .await
            .expect("activation succeeds");

        assert_eq!(session.active_stream().as_deref(), Some("rtsp://cam/1"));
        assert!(session.lease_active());
        assert_eq!(session.status(), SessionStatus::ready("stream activated"));
        assert_eq!(session.displayed_stream().as_deref(), Some("rtsp://cam/1"));
        assert_eq!(
            fake.calls(),
            vec![
                Call::ActivateStream("rtsp://cam/1".to_owned()),
                Call::CurrentStream
            ]
        );
    }

    #[tokio::test]
    async fn malformed_activation_never_reaches_collaborator() {
        let fake = Arc::new(FakeCollaborator::default());
        let session = session_with(&fake);
        session
            .activate_stream("rtsp://cam/1")
            .await
            .expect("first activation");

        let err = session
            .activate_stream("http://cam/2")
            .await
            .expect_err("malformed address rejected");

        assert_eq!(err, OrchestratorError::validation("must start with rtsp://"));
        assert_eq!(session.status(), SessionStatus::failed("must start with rtsp://"));
        assert_eq!(session.active_stream().as_deref(), Some("rtsp://cam/1"));
        assert_eq!(fake.count(|call| matches!(call, Call::ActivateStream(_))), 1);
    }

    #[tokio::test]
    async fn empty_activation_reports_address_required() {
        let fake = Arc::new(FakeCollaborator::default());
        let session = session_with(&fake);

        assert!(session.activate_stream("  ").await.is_err());
        assert_eq!(session.status(), SessionStatus::failed("address required"));
        assert!(fake.calls().is_empty());
        assert!(!session.lease_active());
    }

    #[tokio::test]
    async fn refused_activation_keeps_previous_stream() {
        let fake = Arc::new(FakeCollaborator::default());
        let session = session_with(&fake);
        session
            .activate_stream("rtsp://cam/1")
            .await
            .expect("first activation");

        fake.set_activation(Err(OrchestratorError::transport("camera busy")));
        assert!(session.activate_stream("rtsp://cam/2").await.is_err());

        assert_eq!(session.active_stream().as_deref(), Some("rtsp://cam/1"));
        assert!(session.lease_active());
        assert_eq!(session.status(), SessionStatus::failed("camera busy"));
    }

    #[tokio::test]
    async fn refusal_without_reason_uses_generic_message() {
        let fake = Arc::new(FakeCollaborator::default());
        fake.set_activation(Err(OrchestratorError::transport("")));
        let session = session_with(&fake);

        assert!(session.activate_stream("rtsp://cam/1").await.is_err());

        assert_eq!(session.active_stream(), None);
        assert!(!session.lease_active());
        assert_eq!(
            session.status(),
            SessionStatus::failed("could not activate stream")
        );
    }

    #[tokio::test]
    async fn new_activation_supersedes_previous() {
        let fake = Arc::new(FakeCollaborator::default());
        let session = session_with(&fake);

        session.activate_stream("rtsp://cam/1").await.expect("first");
        session.activate_stream("RTSP://cam/2").await.expect("second");

        assert_eq!(session.active_stream().as_deref(), Some("RTSP://cam/2"));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_collaborator_times_out_into_failed() {
        let fake = Arc::new(FakeCollaborator::default());
        fake.delay_calls(Duration::from_secs(60));
        let session = session_with(&fake);

        let err = session
            .activate_stream("rtsp://cam/1")
            .await
            .expect_err("timeout");

        assert!(matches!(err, OrchestratorError::Transport(_)));
        assert!(session.status().is_terminal());
        assert_eq!(session.active_stream(), None);
    }

    #[tokio::test]
    async fn test_stream_reports_reachability_without_activating() {
        let fake = Arc::new(FakeCollaborator::default());
        let session = session_with(&fake);

        session
            .test_stream(" rtsp://cam/1 ")
            .await
            .expect("reachable");
        assert_eq!(session.status(), SessionStatus::ready("camera responds"));
        assert_eq!(session.active_stream(), None);
        assert!(!session.lease_active());
        assert_eq!(fake.calls(), vec![Call::TestStream("rtsp://cam/1".to_owned())]);

        fake.set_reachable(Ok(false));
        assert!(session.test_stream("rtsp://cam/1").await.is_err());
        assert_eq!(session.status(), SessionStatus::failed("invalid or unreachable"));

        fake.set_reachable(Err(OrchestratorError::transport("connection refused")));
        assert!(session.test_stream("rtsp://cam/1").await.is_err());
        assert_eq!(session.status(), SessionStatus::failed("invalid or unreachable"));
    }

    #[tokio::test]
    async fn test_stream_validates_before_calling() {
        let fake = Arc::new(FakeCollaborator::default());
        let session = session_with(&fake);

        assert!(session.test_stream("cam/1").await.is_err());
        assert_eq!(session.status(), SessionStatus::failed("must start with rtsp://"));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn deactivate_clears_stream_and_disarms_lease() {
        let fake = Arc::new(FakeCollaborator::default());
        let session = session_with(&fake);
        session.activate_stream("rtsp://cam/1").await.expect("activate");
        assert!(session.record_frame(7, 1024));

        session.deactivate();

        assert_eq!(session.active_stream(), None);
        assert!(!session.lease_active());
        assert_eq!(session.video_state(), VideoState::Placeholder);
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(!session.record_frame(8, 1024));
        assert_eq!(session.frame_target(), None);
    }

    #[tokio::test]
    async fn subscribers_observe_busy_then_terminal() {
        let fake = Arc::new(FakeCollaborator::default());
        let session = session_with(&fake);
        let mut status_rx = session.subscribe();
        status_rx.mark_unchanged();

        session.activate_stream("rtsp://cam/1").await.expect("activate");

        assert!(status_rx.has_changed().expect("sender alive"));
        assert_eq!(
            *status_rx.borrow_and_update(),
            SessionStatus::ready("stream activated")
        );
    }
}
