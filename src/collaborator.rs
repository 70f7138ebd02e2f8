use crate::error::{OrchestratorError, Result};
use crate::model::{Credentials, Device, StreamCandidate, TelemetrySnapshot};
use crate::notify::AlertChannel;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::time::Duration;
use tracing::debug;
use url::Url;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Everything the orchestrator asks of the outside world.
///
/// Scanning, ONVIF probing, detection and alert delivery all live behind this
/// trait; the orchestrator only sequences the calls and interprets results.
#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn scan_network(&self) -> Result<Vec<Device>>;

    async fn probe_streams(&self, request: &ProbeRequest) -> Result<Vec<StreamCandidate>>;

    /// `Ok(false)` means the collaborator answered but the stream is not usable.
    async fn test_stream(&self, address: &str) -> Result<bool>;

    /// A refusal is reported as [`OrchestratorError::Transport`] carrying the server's reason.
    async fn activate_stream(&self, address: &str) -> Result<()>;

    async fn current_stream(&self) -> Result<Option<String>>;

    async fn fetch_telemetry(&self) -> Result<TelemetrySnapshot>;

    async fn fetch_frame(&self, token: u64) -> Result<Vec<u8>>;

    async fn dispatch_alert(&self, channel: AlertChannel) -> Result<()>;

    async fn alert_link(&self, channel: AlertChannel) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub address: String,
    pub port: u16,
    pub credentials: Credentials,
}

/// Talks to the detection server's JSON API.
#[derive(Debug, Clone)]
pub struct HttpCollaborator {
    client: reqwest::Client,
    base: Url,
}

impl HttpCollaborator {
    pub fn new(base: Url, timeout: Duration) -> Result<Self> {
        let mut base = base;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .build()
            .map_err(|err| {
                OrchestratorError::transport(format!("failed building HTTP client: {err}"))
            })?;

        Ok(Self { client, base })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn frame_url(&self, token: u64) -> Result<Url> {
        let mut url = self.endpoint("video")?;
        url.query_pairs_mut().append_pair("t", &token.to_string());
        Ok(url)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base.join(path).map_err(|err| {
            OrchestratorError::validation(format!("invalid endpoint '{path}': {err}"))
        })
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!(%url, "POST");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|err| transport_error(path, &err))?;
        decode_json(path, response).await
    }

    async fn get_json<T>(&self, path: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| transport_error(path, &err))?;
        decode_json(path, response).await
    }
}

#[async_trait]
impl Collaborator for HttpCollaborator {
    async fn scan_network(&self) -> Result<Vec<Device>> {
        let reply: ScanReply = self
            .post_json("camera/network-scan", &serde_json::json!({}))
            .await?;
        reply.into_devices()
    }

    async fn probe_streams(&self, request: &ProbeRequest) -> Result<Vec<StreamCandidate>> {
        let body = ProbeBody {
            ip: &request.address,
            port: request.port,
            user: &request.credentials.user,
            password: &request.credentials.secret,
        };
        let reply: ProbeReply = self.post_json("camera/onvif-probe", &body).await?;
        reply.into_candidates()
    }

    async fn test_stream(&self, address: &str) -> Result<bool> {
        let reply: Acknowledgement = self
            .post_json("camera/test", &StreamBody { rtsp: address })
            .await?;
        Ok(reply.success)
    }

    async fn activate_stream(&self, address: &str) -> Result<()> {
        let reply: Acknowledgement = self
            .post_json("camera/select", &StreamBody { rtsp: address })
            .await?;
        reply.into_activation()
    }

    async fn current_stream(&self) -> Result<Option<String>> {
        let reply: CurrentReply = self.get_json("camera/current").await?;
        Ok(reply.into_address())
    }

    async fn fetch_telemetry(&self) -> Result<TelemetrySnapshot> {
        let reply: PersonReply = self.get_json("persona").await?;
        Ok(reply.into_snapshot())
    }

    async fn fetch_frame(&self, token: u64) -> Result<Vec<u8>> {
        let url = self.frame_url(token)?;
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| transport_error("video", &err))?
            .error_for_status()
            .map_err(|err| transport_error("video", &err))?;

        // The endpoint is an MJPEG stream; the first complete JPEG is the frame.
        let mut buffer = Vec::new();
        let mut locator = JpegLocator::default();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| transport_error("video", &err))?
        {
            buffer.extend_from_slice(&chunk);
            if let Some(frame) = locator.advance(&buffer) {
                buffer.truncate(frame.end);
                return Ok(buffer.split_off(frame.start));
            }
            if buffer.len() > MAX_FRAME_BYTES {
                return Err(OrchestratorError::domain(format!(
                    "no complete frame within {MAX_FRAME_BYTES} bytes"
                )));
            }
        }

        Err(OrchestratorError::domain("video stream ended without a frame"))
    }

    async fn dispatch_alert(&self, channel: AlertChannel) -> Result<()> {
        let path = server_alert_path(channel);
        let url = self.endpoint(path)?;
        self.client
            .post(url)
            .send()
            .await
            .map_err(|err| transport_error(path, &err))?
            .error_for_status()
            .map_err(|err| transport_error(path, &err))?;
        Ok(())
    }

    async fn alert_link(&self, channel: AlertChannel) -> Result<String> {
        let reply: LinkReply = self.get_json(deep_link_alert_path(channel)).await?;
        reply.into_url()
    }
}

const fn server_alert_path(channel: AlertChannel) -> &'static str {
    match channel {
        AlertChannel::WhatsApp => "alerts/sendWhatsApp1",
        AlertChannel::Email => "alerts/sendEmail1",
    }
}

const fn deep_link_alert_path(channel: AlertChannel) -> &'static str {
    match channel {
        AlertChannel::WhatsApp => "alerts/sendWhatsApp2",
        AlertChannel::Email => "alerts/sendEmail2",
    }
}

async fn decode_json<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> Result<T> {
    let response = response
        .error_for_status()
        .map_err(|err| transport_error(path, &err))?;
    let body = response
        .text()
        .await
        .map_err(|err| transport_error(path, &err))?;
    parse_reply(path, &body)
}

fn parse_reply<T: DeserializeOwned>(path: &str, body: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|err| OrchestratorError::domain(format!("malformed response from {path}: {err}")))
}

fn transport_error(path: &str, err: &reqwest::Error) -> OrchestratorError {
    if err.is_timeout() {
        OrchestratorError::transport(format!("{path} timed out"))
    } else if let Some(status) = err.status() {
        OrchestratorError::transport(format!("{path} answered {status}"))
    } else {
        OrchestratorError::transport(format!("{path} unreachable: {err}"))
    }
}

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Finds the first complete JPEG in a growing buffer. Each call only looks at
/// bytes appended since the previous one, plus one byte of overlap for a
/// marker split across chunks.
#[derive(Debug, Default)]
struct JpegLocator {
    soi: Option<usize>,
    scanned: usize,
}

impl JpegLocator {
    fn advance(&mut self, buffer: &[u8]) -> Option<Range<usize>> {
        let soi = match self.soi {
            Some(soi) => soi,
            None => {
                let from = self.scanned.saturating_sub(1);
                let Some(offset) = find_marker(&buffer[from..], SOI) else {
                    self.scanned = buffer.len();
                    return None;
                };
                let soi = from + offset;
                self.soi = Some(soi);
                self.scanned = soi + SOI.len();
                soi
            }
        };

        let from = self.scanned.saturating_sub(1).max(soi + SOI.len());
        match find_marker(&buffer[from..], EOI) {
            Some(offset) => Some(soi..from + offset + EOI.len()),
            None => {
                self.scanned = buffer.len();
                None
            }
        }
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|pair| pair == marker)
}

#[derive(Debug, Deserialize)]
struct ScanReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    devices: Vec<ScannedDevice>,
    #[serde(default)]
    error: Option<String>,
}

impl ScanReply {
    fn into_devices(self) -> Result<Vec<Device>> {
        if !self.success {
            return Err(OrchestratorError::domain(
                self.error
                    .filter(|reason| !reason.trim().is_empty())
                    .unwrap_or_else(|| "no devices found".to_owned()),
            ));
        }

        Ok(self
            .devices
            .into_iter()
            .map(|device| Device::new(device.ip, device.ports))
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct ScannedDevice {
    ip: String,
    #[serde(default)]
    ports: Vec<u16>,
}

#[derive(Serialize)]
struct ProbeBody<'a> {
    ip: &'a str,
    port: u16,
    user: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct ProbeReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    streams: Vec<ProbedStream>,
    #[serde(default)]
    error: Option<String>,
}

impl ProbeReply {
    fn into_candidates(self) -> Result<Vec<StreamCandidate>> {
        if !self.success {
            return Err(OrchestratorError::transport(
                self.error
                    .filter(|reason| !reason.trim().is_empty())
                    .unwrap_or_else(|| "stream probe failed".to_owned()),
            ));
        }

        Ok(self
            .streams
            .into_iter()
            .map(|stream| StreamCandidate {
                profile_label: stream.profile,
                base_address: stream.rtsp,
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct ProbedStream {
    #[serde(default)]
    profile: Option<String>,
    rtsp: String,
}

#[derive(Serialize)]
struct StreamBody<'a> {
    rtsp: &'a str,
}

#[derive(Debug, Deserialize)]
struct Acknowledgement {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

impl Acknowledgement {
    fn into_activation(self) -> Result<()> {
        if self.success {
            return Ok(());
        }
        Err(OrchestratorError::transport(
            self.error
                .filter(|reason| !reason.trim().is_empty())
                .unwrap_or_else(|| "could not activate stream".to_owned()),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct CurrentReply {
    #[serde(default)]
    rtsp: Option<String>,
}

impl CurrentReply {
    fn into_address(self) -> Option<String> {
        self.rtsp.filter(|address| !address.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct PersonReply {
    #[serde(default)]
    persona_detectada: bool,
    #[serde(default)]
    pose: Option<String>,
    #[serde(default)]
    meta: Option<PersonMeta>,
}

#[derive(Debug, Default, Deserialize)]
struct PersonMeta {
    #[serde(default)]
    visibility_count: Option<u32>,
    #[serde(default)]
    head_tilt: Option<f64>,
}

impl PersonReply {
    fn into_snapshot(self) -> TelemetrySnapshot {
        let meta = self.meta.unwrap_or_default();
        TelemetrySnapshot {
            presence_detected: self.persona_detectada,
            pose_label: self.pose.filter(|pose| !pose.trim().is_empty()),
            visibility_count: meta.visibility_count,
            head_tilt: meta.head_tilt,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LinkReply {
    #[serde(default)]
    url: Option<String>,
}

impl LinkReply {
    fn into_url(self) -> Result<String> {
        self.url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| OrchestratorError::domain("alert link missing from response"))
    }
}
