use crate::address::{build_stream_address, redact};
use crate::collaborator::ProbeRequest;
use crate::error::{OrchestratorError, Result};
use crate::model::{Credentials, Device, SessionStatus, StreamCandidate};
use crate::session::Session;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

const FALLBACK_PORT: u16 = 80;
const PREFERRED_PORTS: [u16; 2] = [80, 554];

/// Port to pre-fill when probing a scanned device: 80, then 554, then the
/// first open port, then 80.
#[must_use]
pub fn suggest_port(device: &Device) -> u16 {
    PREFERRED_PORTS
        .into_iter()
        .find(|port| device.open_ports.contains(port))
        .or_else(|| device.open_ports.first().copied())
        .unwrap_or(FALLBACK_PORT)
}

impl Session {
    /// Replaces the device list with a fresh scan.
    ///
    /// Returns [`OrchestratorError::Superseded`] when a newer scan started
    /// before this one finished; the newer scan owns the list and the status.
    pub async fn scan_network(&self) -> Result<Vec<Device>> {
        let ticket = next_ticket(&self.device_generation);
        self.set_status(SessionStatus::busy("scanning network"));

        let result = self
            .call("network scan", self.collaborator().scan_network())
            .await
            .and_then(normalize_devices);

        let mut lists = self.discovery.lock();
        if !is_current(&self.device_generation, ticket) {
            debug!(ticket, "dropping superseded scan result");
            return Err(OrchestratorError::Superseded);
        }

        match result {
            Ok(devices) => {
                lists.devices = devices.clone();
                info!(count = devices.len(), "network scan finished");
                self.set_status(SessionStatus::ready(format!(
                    "{} camera(s) found",
                    devices.len()
                )));
                Ok(devices)
            }
            Err(err) => {
                lists.devices.clear();
                let message = match &err {
                    OrchestratorError::Domain(_) => "no devices found".to_owned(),
                    other => format!("network scan failed: {}", other.reason()),
                };
                self.set_status(SessionStatus::Failed(message));
                Err(err)
            }
        }
    }

    /// Asks the collaborator for the streams a device exposes and replaces the
    /// candidate list with them.
    pub async fn probe_streams(
        &self,
        address: &str,
        port: u16,
        credentials: &Credentials,
    ) -> Result<Vec<StreamCandidate>> {
        let address = address.trim();
        if address.is_empty() || !credentials.is_complete() {
            return Err(self.fail(OrchestratorError::validation("missing fields")));
        }

        let ticket = next_ticket(&self.candidate_generation);
        self.set_status(SessionStatus::busy("probing streams"));

        let request = ProbeRequest {
            address: address.to_owned(),
            port,
            credentials: credentials.clone(),
        };
        let result = self
            .call("stream probe", self.collaborator().probe_streams(&request))
            .await
            .and_then(normalize_candidates);

        let mut lists = self.discovery.lock();
        if !is_current(&self.candidate_generation, ticket) {
            debug!(ticket, "dropping superseded probe result");
            return Err(OrchestratorError::Superseded);
        }

        lists.selected = None;
        match result {
            Ok(candidates) => {
                lists.candidates = candidates.clone();
                info!(%address, port, count = candidates.len(), "stream probe finished");
                self.set_status(SessionStatus::ready(format!(
                    "{} stream(s) found",
                    candidates.len()
                )));
                Ok(candidates)
            }
            Err(err) => {
                lists.candidates.clear();
                let message = match err.reason().trim() {
                    "" => "stream probe failed".to_owned(),
                    reason => reason.to_owned(),
                };
                self.set_status(SessionStatus::Failed(message));
                Err(err)
            }
        }
    }

    /// Looks up a scanned device together with its suggested probe port.
    #[must_use]
    pub fn select_device(&self, address: &str) -> Option<(Device, u16)> {
        let address = address.trim();
        let lists = self.discovery.lock();
        let device = lists
            .devices
            .iter()
            .find(|device| device.address == address)?
            .clone();
        drop(lists);

        let port = suggest_port(&device);
        self.set_status(SessionStatus::Idle);
        Some((device, port))
    }

    /// Port to probe `address` on when the operator gave none: the suggestion
    /// for the scanned device, scanning first when it is not listed yet.
    /// Falls back to 80 when the scan fails or does not find it.
    pub async fn suggested_probe_port(&self, address: &str) -> u16 {
        if let Some((_, port)) = self.select_device(address) {
            return port;
        }
        if let Err(err) = self.scan_network().await {
            debug!(error = %err, "scan for probe port failed");
        }
        self.select_device(address)
            .map_or(FALLBACK_PORT, |(_, port)| port)
    }

    /// Resolves the candidate at `index` with the operator's credentials and
    /// remembers it as the address to test or activate.
    pub fn select_candidate(&self, index: usize, credentials: &Credentials) -> Result<String> {
        let candidate = self.discovery.lock().candidates.get(index).cloned();
        let Some(candidate) = candidate else {
            return Err(self.fail(OrchestratorError::validation("no stream selected")));
        };

        let resolved = build_stream_address(&candidate.base_address, credentials);
        debug!(address = %redact(&resolved), "stream candidate selected");
        self.discovery.lock().selected = Some(resolved.clone());

        self.set_status(SessionStatus::ready("stream selected"));
        Ok(resolved)
    }
}

fn next_ticket(generation: &AtomicU64) -> u64 {
    generation.fetch_add(1, Ordering::SeqCst) + 1
}

fn is_current(generation: &AtomicU64, ticket: u64) -> bool {
    generation.load(Ordering::SeqCst) == ticket
}

fn normalize_devices(devices: Vec<Device>) -> Result<Vec<Device>> {
    let mut seen = HashSet::new();
    let normalized = devices
        .into_iter()
        .filter_map(|device| {
            let address = device.address.trim();
            if address.is_empty() || !seen.insert(address.to_owned()) {
                return None;
            }
            Some(Device::new(address, device.open_ports))
        })
        .collect::<Vec<_>>();

    if normalized.is_empty() {
        return Err(OrchestratorError::domain("no devices found"));
    }
    Ok(normalized)
}

fn normalize_candidates(candidates: Vec<StreamCandidate>) -> Result<Vec<StreamCandidate>> {
    let mut seen = HashSet::new();
    let normalized = candidates
        .into_iter()
        .filter_map(|candidate| {
            let base_address = candidate.base_address.trim();
            if base_address.is_empty() || !seen.insert(base_address.to_owned()) {
                return None;
            }
            Some(StreamCandidate {
                profile_label: candidate.profile_label,
                base_address: base_address.to_owned(),
            })
        })
        .collect::<Vec<_>>();

    if normalized.is_empty() {
        return Err(OrchestratorError::domain("no streams found"));
    }
    Ok(normalized)
}
