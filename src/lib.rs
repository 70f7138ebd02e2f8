//! Camera discovery and single-stream activation for a monitoring session.
//!
//! A [`Session`] turns scan and ONVIF probe results into stream candidates,
//! activates exactly one RTSP stream, and publishes its progress as
//! [`SessionStatus`] transitions. A [`PollScheduler`] then pulls telemetry
//! and frames from the detection server while the stream's lease is armed.

pub mod address;
pub mod collaborator;
pub mod config;
pub mod discovery;
pub mod error;
pub mod model;
pub mod notify;
pub mod poller;
pub mod session;

#[cfg(test)]
pub(crate) mod fake;

pub use address::{build_stream_address, validate_stream_address};
pub use collaborator::{Collaborator, HttpCollaborator, ProbeRequest};
pub use discovery::suggest_port;
pub use error::{OrchestratorError, Result};
pub use model::{
    Credentials, Device, SessionStatus, StreamCandidate, TelemetrySnapshot, VideoState,
};
pub use notify::{AlertChannel, LinkOpener, Notifier};
pub use poller::{PollEvent, PollPeriods, PollScheduler};
pub use session::Session;
