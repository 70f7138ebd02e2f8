use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Host found by a network scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub address: String,
    pub open_ports: Vec<u16>,
}

impl Device {
    /// Builds a device, keeping the first occurrence of each port in scan order.
    #[must_use]
    pub fn new(address: impl Into<String>, ports: impl IntoIterator<Item = u16>) -> Self {
        let mut open_ports: Vec<u16> = Vec::new();
        for port in ports {
            if !open_ports.contains(&port) {
                open_ports.push(port);
            }
        }
        Self {
            address: address.into(),
            open_ports,
        }
    }

    #[must_use]
    pub fn label(&self) -> String {
        let ports = self
            .open_ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} (ports: {ports})", self.address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCandidate {
    pub profile_label: Option<String>,
    pub base_address: String,
}

impl StreamCandidate {
    #[must_use]
    pub fn label(&self) -> String {
        let profile = self
            .profile_label
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("Profile");
        format!("{profile} - {}", self.base_address)
    }
}

/// Camera login held for the current session only.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret: secret.into(),
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.user.trim().is_empty() && !self.secret.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("secret", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Busy(String),
    Ready(String),
    Failed(String),
}

impl SessionStatus {
    pub fn busy(operation: impl Into<String>) -> Self {
        Self::Busy(operation.into())
    }

    pub fn ready(message: impl Into<String>) -> Self {
        Self::Ready(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready(_) | Self::Failed(_))
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Busy(operation) => write!(f, "busy: {operation}..."),
            Self::Ready(message) => write!(f, "ready: {message}"),
            Self::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub presence_detected: bool,
    pub pose_label: Option<String>,
    pub visibility_count: Option<u32>,
    pub head_tilt: Option<f64>,
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let presence = if self.presence_detected { "yes" } else { "no" };
        let pose = self.pose_label.as_deref().unwrap_or("--");
        write!(f, "person: {presence}  pose: {pose}  visible: ")?;
        match self.visibility_count {
            Some(count) => write!(f, "{count}")?,
            None => write!(f, "--")?,
        }
        write!(f, "  head tilt: ")?;
        match self.head_tilt {
            Some(tilt) => write!(f, "{tilt:.3}"),
            None => write!(f, "--"),
        }
    }
}

/// What the presentation layer should show in the video area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VideoState {
    #[default]
    Placeholder,
    Live {
        last_token: Option<u64>,
        frame_bytes: usize,
    },
}

#[must_use]
pub fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
