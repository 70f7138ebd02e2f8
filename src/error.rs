//! Error types for the orchestrator.

/// Failure of one orchestrator operation.
///
/// Every variant except [`Superseded`](Self::Superseded) resolves to a
/// `Failed` session status carrying [`reason`](Self::reason). None of them
/// are fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorError {
    /// Missing or malformed input, caught before any network call.
    #[error("validation error: {0}")]
    Validation(String),

    /// Collaborator unreachable, timed out, or answered with a non-success result.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call succeeded but the result is empty or unusable.
    #[error("domain error: {0}")]
    Domain(String),

    /// A newer discovery call was issued before this one completed.
    #[error("superseded by a newer request")]
    Superseded,
}

impl OrchestratorError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport(reason.into())
    }

    pub fn domain(reason: impl Into<String>) -> Self {
        Self::Domain(reason.into())
    }

    /// Human-readable reason, without the taxonomy prefix.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Validation(reason) | Self::Transport(reason) | Self::Domain(reason) => reason,
            Self::Superseded => "superseded by a newer request",
        }
    }
}

/// Convenience alias for `Result<T, OrchestratorError>`.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
