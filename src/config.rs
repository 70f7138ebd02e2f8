use crate::poller::PollPeriods;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const APP_DIR: &str = "camwatch";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server_url: String,
    pub telemetry_period_ms: u64,
    pub frame_period_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8010".to_owned(),
            telemetry_period_ms: 2_000,
            frame_period_ms: 1_000,
            request_timeout_ms: 5_000,
        }
    }
}

/// Values given on the command line; each one wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub server_url: Option<String>,
    pub telemetry_period_ms: Option<u64>,
    pub frame_period_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

impl Settings {
    #[must_use]
    pub fn with_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(server_url) = overrides.server_url.as_ref() {
            self.server_url.clone_from(server_url);
        }
        if let Some(period) = overrides.telemetry_period_ms {
            self.telemetry_period_ms = period;
        }
        if let Some(period) = overrides.frame_period_ms {
            self.frame_period_ms = period;
        }
        if let Some(timeout) = overrides.request_timeout_ms {
            self.request_timeout_ms = timeout;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.server_url()?;
        if self.request_timeout_ms == 0 {
            return Err(anyhow!("request_timeout_ms must be greater than zero"));
        }
        self.periods()
            .validate()
            .map_err(|err| anyhow!("{}", err.reason()))
    }

    pub fn server_url(&self) -> Result<Url> {
        let url = Url::parse(self.server_url.trim())
            .with_context(|| format!("invalid server_url '{}'", self.server_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "server_url must use http or https, got '{}'",
                url.scheme()
            ));
        }
        Ok(url)
    }

    #[must_use]
    pub fn periods(&self) -> PollPeriods {
        PollPeriods {
            telemetry: Duration::from_millis(self.telemetry_period_ms),
            frames: Duration::from_millis(self.frame_period_ms),
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let root = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .context("unable to determine user data directory")?;
    Ok(root.join(APP_DIR).join("config.json"))
}

/// Reads the settings file, writing defaults first when it does not exist.
pub fn load_or_create(path: Option<&Path>) -> Result<Settings> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_path()?,
    };

    if !path.exists() {
        let defaults = Settings::default();
        write_settings(&path, &defaults)?;
        return Ok(defaults);
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed reading config at {}", path.display()))?;
    serde_json::from_str::<Settings>(&raw)
        .with_context(|| format!("failed parsing config at {}", path.display()))
}

fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    ensure_parent_dir(path)?;
    let payload = serde_json::to_string_pretty(settings).context("failed serializing config")?;
    fs::write(path, payload)
        .with_context(|| format!("failed writing config at {}", path.display()))?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating config directory {}", parent.display()))?;
    }
    Ok(())
}
