//! Cloud backend boundary
//!
//! The actual HTTP SDK lives outside this crate; what the engine needs from
//! it is the opaque [`CloudBackend`] capability plus the mapping from the
//! provider's status vocabulary to the canonical five-state lifecycle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::types::CallStatus;

/// Opaque cloud telephony capability
#[async_trait]
pub trait CloudBackend: Send + Sync {
    /// Place a call; returns the provider-assigned call identifier
    async fn place(&self, from: &str, to: &str) -> EngineResult<String>;

    /// Terminate the call addressed by the given provider call identifier
    async fn terminate(&self, handle: &str) -> EngineResult<()>;
}

/// Call direction as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Status callback payload delivered by the provider's webhook,
/// already validated by the HTTP layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudWebhook {
    pub call_id: String,
    pub from: String,
    pub to: String,
    pub status: String,
    pub direction: CallDirection,
}

/// Map a provider status string to the canonical lifecycle status.
///
/// The lookup is fixed; anything unrecognized is treated as a failure rather
/// than ignored, so a provider vocabulary change cannot strand a call in a
/// non-terminal state.
pub fn map_status(raw: &str) -> CallStatus {
    match raw.to_ascii_lowercase().as_str() {
        "queued" | "initiated" => CallStatus::Outgoing,
        "ringing" => CallStatus::Incoming,
        "in-progress" | "answered" => CallStatus::Connected,
        "completed" => CallStatus::Ended,
        "busy" | "no-answer" | "canceled" | "failed" => CallStatus::Failed,
        _ => CallStatus::Failed,
    }
}
