use camwatch::AlertChannel;
use camwatch::config::Overrides;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "camwatch",
    version,
    about = "Discover IP cameras, activate one RTSP stream and watch its live detection feed"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Detection server base URL (overrides the config file).
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Per-request timeout in milliseconds.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Settings file. Defaults to the user data directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

impl GlobalArgs {
    #[must_use]
    pub fn overrides(&self) -> Overrides {
        Overrides {
            server_url: self.server.clone(),
            request_timeout_ms: self.timeout_ms,
            ..Overrides::default()
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ask the server to scan the local network for cameras.
    Scan,
    /// List the RTSP streams a camera exposes over ONVIF.
    Probe(ProbeArgs),
    /// Inject credentials into a stream address.
    Resolve(ResolveArgs),
    /// Check that a stream address answers, without activating it.
    Test(AddressArgs),
    /// Make a stream the active source for detection.
    Activate(AddressArgs),
    /// Show the stream the server currently uses.
    Current,
    /// Activate a stream and follow telemetry and frames until Ctrl-C.
    Watch(WatchArgs),
    /// Send an alert through the server, or open its deep link.
    Alert(AlertArgs),
}

#[derive(Debug, Args)]
pub struct CredentialArgs {
    /// Camera user name.
    #[arg(long, short, default_value = "")]
    pub user: String,

    /// Camera password.
    #[arg(long, short, default_value = "")]
    pub password: String,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Camera IP or host name.
    #[arg(long, short)]
    pub address: String,

    /// ONVIF service port. Defaults to the port suggested by a scan, or 80.
    #[arg(long)]
    pub port: Option<u16>,

    #[command(flatten)]
    pub credentials: CredentialArgs,

    /// Resolve the candidate at this index (0-based) with the same credentials.
    #[arg(long)]
    pub select: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Stream address as reported by the camera.
    pub address: String,

    #[command(flatten)]
    pub credentials: CredentialArgs,

    /// Print the password instead of masking it.
    #[arg(long, default_value_t = false)]
    pub show_secret: bool,
}

#[derive(Debug, Args)]
pub struct AddressArgs {
    /// Full RTSP address, credentials included when the camera needs them.
    pub address: String,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Full RTSP address to activate.
    pub address: String,

    /// Write the latest frame to this file.
    #[arg(long)]
    pub frame_out: Option<PathBuf>,

    /// Telemetry poll period in milliseconds.
    #[arg(long)]
    pub telemetry_ms: Option<u64>,

    /// Frame poll period in milliseconds.
    #[arg(long)]
    pub frame_ms: Option<u64>,
}

#[derive(Debug, Args)]
pub struct AlertArgs {
    /// Alert channel: whatsapp or email.
    pub channel: AlertChannel,

    /// Ask for a link and open it locally instead of sending server-side.
    #[arg(long, default_value_t = false)]
    pub deep_link: bool,
}
