use crate::collaborator::{Collaborator, ProbeRequest};
use crate::error::{OrchestratorError, Result};
use crate::model::{Device, StreamCandidate, TelemetrySnapshot};
use crate::notify::AlertChannel;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    ScanNetwork,
    ProbeStreams { address: String, port: u16 },
    TestStream(String),
    ActivateStream(String),
    CurrentStream,
    FetchTelemetry,
    FetchFrame(u64),
    DispatchAlert(AlertChannel),
    AlertLink(AlertChannel),
}

type Scripted<T> = (Duration, Result<T>);

/// Scripted stand-in for the detection server that records every call.
pub(crate) struct FakeCollaborator {
    calls: Mutex<Vec<Call>>,
    scans: Mutex<VecDeque<Scripted<Vec<Device>>>>,
    scan_default: Mutex<Result<Vec<Device>>>,
    probes: Mutex<VecDeque<Scripted<Vec<StreamCandidate>>>>,
    probe_default: Mutex<Result<Vec<StreamCandidate>>>,
    reachable: Mutex<Result<bool>>,
    activation: Mutex<Result<()>>,
    current: Mutex<Option<String>>,
    telemetry: Mutex<Result<TelemetrySnapshot>>,
    frame: Mutex<Result<Vec<u8>>>,
    call_delay: Mutex<Duration>,
    alerts_fail: AtomicBool,
}

impl Default for FakeCollaborator {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            scans: Mutex::new(VecDeque::new()),
            scan_default: Mutex::new(Ok(Vec::new())),
            probes: Mutex::new(VecDeque::new()),
            probe_default: Mutex::new(Ok(Vec::new())),
            reachable: Mutex::new(Ok(true)),
            activation: Mutex::new(Ok(())),
            current: Mutex::new(None),
            telemetry: Mutex::new(Ok(TelemetrySnapshot::default())),
            frame: Mutex::new(Ok(vec![0xFF, 0xD8, 0xFF, 0xD9])),
            call_delay: Mutex::new(Duration::ZERO),
            alerts_fail: AtomicBool::new(false),
        }
    }
}

impl FakeCollaborator {
    pub(crate) fn with_devices(devices: Vec<Device>) -> Self {
        let fake = Self::default();
        *fake.scan_default.lock() = Ok(devices);
        fake
    }

    pub(crate) fn with_streams(streams: Vec<StreamCandidate>) -> Self {
        let fake = Self::default();
        *fake.probe_default.lock() = Ok(streams);
        fake
    }

    pub(crate) fn set_scan(&self, result: Result<Vec<Device>>) {
        *self.scan_default.lock() = result;
    }

    pub(crate) fn script_scan(&self, delay: Duration, result: Result<Vec<Device>>) {
        self.scans.lock().push_back((delay, result));
    }

    pub(crate) fn set_probe(&self, result: Result<Vec<StreamCandidate>>) {
        *self.probe_default.lock() = result;
    }

    pub(crate) fn script_probe(&self, delay: Duration, result: Result<Vec<StreamCandidate>>) {
        self.probes.lock().push_back((delay, result));
    }

    pub(crate) fn set_reachable(&self, result: Result<bool>) {
        *self.reachable.lock() = result;
    }

    pub(crate) fn set_activation(&self, result: Result<()>) {
        *self.activation.lock() = result;
    }

    pub(crate) fn set_telemetry(&self, result: Result<TelemetrySnapshot>) {
        *self.telemetry.lock() = result;
    }

    pub(crate) fn delay_calls(&self, delay: Duration) {
        *self.call_delay.lock() = delay;
    }

    pub(crate) fn fail_alerts(&self) {
        self.alerts_fail.store(true, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub(crate) fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| matches(call)).count()
    }

    pub(crate) fn frame_tokens(&self) -> Vec<u64> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::FetchFrame(token) => Some(*token),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    async fn pause(&self) {
        let delay = *self.call_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Collaborator for FakeCollaborator {
    async fn scan_network(&self) -> Result<Vec<Device>> {
        self.record(Call::ScanNetwork);
        let scripted = self.scans.lock().pop_front();
        match scripted {
            Some((delay, result)) => {
                tokio::time::sleep(delay).await;
                result
            }
            None => self.scan_default.lock().clone(),
        }
    }

    async fn probe_streams(&self, request: &ProbeRequest) -> Result<Vec<StreamCandidate>> {
        self.record(Call::ProbeStreams {
            address: request.address.clone(),
            port: request.port,
        });
        let scripted = self.probes.lock().pop_front();
        match scripted {
            Some((delay, result)) => {
                tokio::time::sleep(delay).await;
                result
            }
            None => self.probe_default.lock().clone(),
        }
    }

    async fn test_stream(&self, address: &str) -> Result<bool> {
        self.record(Call::TestStream(address.to_owned()));
        self.pause().await;
        self.reachable.lock().clone()
    }

    async fn activate_stream(&self, address: &str) -> Result<()> {
        self.record(Call::ActivateStream(address.to_owned()));
        self.pause().await;
        let result = self.activation.lock().clone();
        if result.is_ok() {
            *self.current.lock() = Some(address.to_owned());
        }
        result
    }

    async fn current_stream(&self) -> Result<Option<String>> {
        self.record(Call::CurrentStream);
        Ok(self.current.lock().clone())
    }

    async fn fetch_telemetry(&self) -> Result<TelemetrySnapshot> {
        self.record(Call::FetchTelemetry);
        self.telemetry.lock().clone()
    }

    async fn fetch_frame(&self, token: u64) -> Result<Vec<u8>> {
        self.record(Call::FetchFrame(token));
        self.frame.lock().clone()
    }

    async fn dispatch_alert(&self, channel: AlertChannel) -> Result<()> {
        self.record(Call::DispatchAlert(channel));
        if self.alerts_fail.load(Ordering::SeqCst) {
            return Err(OrchestratorError::transport("alerts/send unreachable"));
        }
        Ok(())
    }

    async fn alert_link(&self, channel: AlertChannel) -> Result<String> {
        self.record(Call::AlertLink(channel));
        if self.alerts_fail.load(Ordering::SeqCst) {
            return Err(OrchestratorError::domain("alert link missing from response"));
        }
        Ok(match channel {
            AlertChannel::WhatsApp => "https://wa.me/?text=alert".to_owned(),
            AlertChannel::Email => "mailto:ops@example.com?subject=alert".to_owned(),
        })
    }
}
