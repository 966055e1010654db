//! Agent error taxonomy
//!
//! Divergence (confirmed value differs from requested) is deliberately
//! not represented here: it is ordinary data carried in the confirmed
//! result, see [`crate::audio::ConfirmedVolume`].

use thiserror::Error;

/// Errors surfaced by actuators and command validation
#[derive(Debug, Error)]
pub enum AgentError {
    /// Color string does not match `#RRGGBB` (leading `#` optional on input)
    #[error("invalid color {0:?}, expected #RRGGBB")]
    InvalidColor(String),

    /// Malformed inbound command: missing required field, out-of-range
    /// numeric, unknown preset name. Surfaced to the hub as a nack.
    #[error("invalid command: {0}")]
    Validation(String),

    /// A control tool or service is absent or failed; callers fall back
    /// to the next backend in the chain or keep prior state.
    #[error("backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: &'static str, reason: String },

    /// Connection lost or request timed out toward the hub
    #[error("transport error: {0}")]
    Transport(String),
}

impl AgentError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AgentError::Validation(msg.into())
    }

    pub fn backend(backend: &'static str, reason: impl Into<String>) -> Self {
        AgentError::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }
}

/// Result alias for agent operations
pub type AgentResult<T> = std::result::Result<T, AgentError>;
