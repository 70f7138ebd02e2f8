use crate::address::redact;
use crate::error::{OrchestratorError, Result};
use crate::model::{TelemetrySnapshot, now_unix_millis};
use crate::session::Session;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPeriods {
    pub telemetry: Duration,
    pub frames: Duration,
}

impl Default for PollPeriods {
    fn default() -> Self {
        Self {
            telemetry: Duration::from_secs(2),
            frames: Duration::from_secs(1),
        }
    }
}

impl PollPeriods {
    pub fn validate(&self) -> Result<()> {
        if self.telemetry.is_zero() || self.frames.is_zero() {
            return Err(OrchestratorError::validation(
                "poll periods must be greater than zero",
            ));
        }
        if self.frames >= self.telemetry {
            return Err(OrchestratorError::validation(
                "frame period must be shorter than telemetry period",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum PollEvent {
    Telemetry(TelemetrySnapshot),
    Frame { token: u64, frame: Vec<u8> },
}

/// One repeating task. Stopping prevents new ticks; a fetch already in
/// flight runs to completion.
#[derive(Debug)]
pub struct PollLoop {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

impl PollLoop {
    fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let worker = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => tick().await,
                }
            }
            debug!(loop_name = name, "poll loop stopped");
        });

        Self {
            name,
            stop_tx,
            worker,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}

/// The telemetry and frame loops of one session.
#[derive(Debug)]
pub struct PollScheduler {
    telemetry: PollLoop,
    frames: PollLoop,
}

impl PollScheduler {
    /// Starts both loops. Telemetry runs regardless of the lease; frames only
    /// while it is armed.
    pub fn start(
        session: Arc<Session>,
        periods: PollPeriods,
        events: Option<mpsc::UnboundedSender<PollEvent>>,
    ) -> Self {
        let telemetry = {
            let session = Arc::clone(&session);
            let events = events.clone();
            PollLoop::spawn("telemetry", periods.telemetry, move || {
                telemetry_tick(Arc::clone(&session), events.clone())
            })
        };

        let frames = {
            let tokens = Arc::new(FrameTokens::default());
            PollLoop::spawn("frames", periods.frames, move || {
                frame_tick(Arc::clone(&session), Arc::clone(&tokens), events.clone())
            })
        };

        Self { telemetry, frames }
    }

    #[must_use]
    pub fn telemetry_loop(&self) -> &PollLoop {
        &self.telemetry
    }

    #[must_use]
    pub fn frame_loop(&self) -> &PollLoop {
        &self.frames
    }

    pub fn stop(&self) {
        self.telemetry.stop();
        self.frames.stop();
    }

    /// Ends the session: stops both loops and deactivates the stream.
    pub fn teardown(self, session: &Session) {
        self.stop();
        session.deactivate();
    }
}

async fn telemetry_tick(session: Arc<Session>, events: Option<mpsc::UnboundedSender<PollEvent>>) {
    let collaborator = session.collaborator();
    match session
        .call("telemetry fetch", collaborator.fetch_telemetry())
        .await
    {
        Ok(snapshot) => {
            session.record_telemetry(snapshot.clone());
            if let Some(tx) = events.as_ref() {
                let _ = tx.send(PollEvent::Telemetry(snapshot));
            }
        }
        Err(err) => {
            warn!(error = %err, "telemetry fetch failed, keeping last snapshot");
        }
    }
}

async fn frame_tick(
    session: Arc<Session>,
    tokens: Arc<FrameTokens>,
    events: Option<mpsc::UnboundedSender<PollEvent>>,
) {
    let Some(address) = session.frame_target() else {
        return;
    };

    let token = tokens.next();
    let collaborator = session.collaborator();
    match session
        .call("frame fetch", collaborator.fetch_frame(token))
        .await
    {
        Ok(frame) => {
            if !session.record_frame(token, frame.len()) {
                debug!(token, "discarding frame that arrived after deactivation");
                return;
            }
            if let Some(tx) = events.as_ref() {
                let _ = tx.send(PollEvent::Frame { token, frame });
            }
        }
        Err(err) => {
            warn!(address = %redact(&address), token, error = %err, "frame fetch failed");
        }
    }
}

/// Cache-busting tokens: wall-clock millis, forced strictly increasing.
#[derive(Debug, Default)]
struct FrameTokens {
    last: AtomicU64,
}

impl FrameTokens {
    fn next(&self) -> u64 {
        let now = now_unix_millis();
        let mut current = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(current.saturating_add(1));
            match self.last.compare_exchange(
                current,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return candidate,
                Err(observed) => current = observed,
            }
        }
    }
}
