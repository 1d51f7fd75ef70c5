//! Error types for the call engine

use thiserror::Error;
use trunkline_manager_core::ManagerError;

use crate::lifecycle::CallEvent;
use crate::types::{CallId, CallStatus, Provider};

/// Result type for call-engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the call engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested lifecycle transition is not valid from the call's
    /// current status; the stored record is left unchanged
    #[error("call {call_id} is in state {from}, which does not allow {event}")]
    InvalidTransition {
        call_id: CallId,
        from: CallStatus,
        event: CallEvent,
    },

    /// No call with the given id
    #[error("call not found: {call_id}")]
    NotFound { call_id: CallId },

    /// The backend that would handle the operation is not configured or not
    /// connected, and no fallback applies
    #[error("provider {provider} is unavailable")]
    ProviderUnavailable { provider: Provider },

    /// Manager-protocol failure (connection, auth, or command timeout)
    #[error(transparent)]
    Manager(#[from] ManagerError),

    /// The PBX accepted the connection but rejected a command
    #[error("pbx rejected command: {message}")]
    Pbx { message: String },

    /// The cloud backend capability reported a failure
    #[error("cloud backend error: {message}")]
    Cloud { message: String },
}

impl EngineError {
    /// Create a not-found error
    pub fn not_found(call_id: CallId) -> Self {
        Self::NotFound { call_id }
    }

    /// Create a provider-unavailable error
    pub fn unavailable(provider: Provider) -> Self {
        Self::ProviderUnavailable { provider }
    }

    /// Create a PBX command-rejection error
    pub fn pbx(message: impl Into<String>) -> Self {
        Self::Pbx {
            message: message.into(),
        }
    }

    /// Create a cloud backend error
    pub fn cloud(message: impl Into<String>) -> Self {
        Self::Cloud {
            message: message.into(),
        }
    }
}
