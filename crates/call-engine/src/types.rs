//! Core call types shared across both backends
//!
//! A [`CallRecord`] is one telephone call regardless of which backend sourced
//! it; [`CallStatus`] is the five-state canonical lifecycle value both
//! backends map into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque unique identifier for a call.
///
/// Either backend-assigned (PBX unique channel id, cloud call id) or locally
/// generated via [`CallId::generate`], in which case it is namespaced by
/// provider so the two id families stay disjoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Wrap a backend-assigned identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh local identifier, namespaced by provider
    pub fn generate(provider: Provider) -> Self {
        Self(format!("{}-{}", provider, Uuid::new_v4()))
    }

    /// The identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Which backend owns a call; fixed at creation, never changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// The local PBX, reached over its manager interface
    Pbx,
    /// The cloud telephony provider, reached over HTTP
    Cloud,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Pbx => f.write_str("pbx"),
            Provider::Cloud => f.write_str("cloud"),
        }
    }
}

/// Canonical call lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Inbound call observed, not yet accepted
    Incoming,
    /// Outbound call placed, not yet answered
    Outgoing,
    /// Both legs up
    Connected,
    /// Terminated normally
    Ended,
    /// Terminated by a provider-reported failure
    Failed,
}

impl CallStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Ended | CallStatus::Failed)
    }

    /// Statuses reported by the active-call listing
    pub fn is_active(&self) -> bool {
        matches!(self, CallStatus::Incoming | CallStatus::Connected)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallStatus::Incoming => "incoming",
            CallStatus::Outgoing => "outgoing",
            CallStatus::Connected => "connected",
            CallStatus::Ended => "ended",
            CallStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One telephone call, regardless of backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    /// Unique identifier for the lifetime of the process
    pub id: CallId,
    /// Caller address, backend-specific format
    pub from: String,
    /// Destination address, backend-specific format
    pub to: String,
    /// Current lifecycle status
    pub status: CallStatus,
    /// Set at creation
    pub start_time: DateTime<Utc>,
    /// Present iff the status is terminal
    pub end_time: Option<DateTime<Utc>>,
    /// Present iff the status is terminal; whole seconds, floored at zero
    pub duration_seconds: Option<u64>,
    /// Backend resource reference for hangup/status commands
    /// (PBX channel name or cloud call identifier)
    pub handle: Option<String>,
    /// Owning backend, immutable after creation
    pub provider: Provider,
}

impl CallRecord {
    /// Create a record in one of the two entry states
    pub fn new(
        id: CallId,
        from: impl Into<String>,
        to: impl Into<String>,
        status: CallStatus,
        provider: Provider,
    ) -> Self {
        Self {
            id,
            from: from.into(),
            to: to.into(),
            status,
            start_time: Utc::now(),
            end_time: None,
            duration_seconds: None,
            handle: None,
            provider,
        }
    }

    /// Attach the backend resource handle
    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }
}

/// Partial update with merge semantics: only the named fields change
#[derive(Debug, Clone, Default)]
pub struct CallUpdate {
    pub status: Option<CallStatus>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<u64>,
    pub handle: Option<String>,
}

impl CallUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: CallStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    /// Apply the update to a record in place
    pub(crate) fn apply_to(self, record: &mut CallRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(end_time) = self.end_time {
            record.end_time = Some(end_time);
        }
        if let Some(duration) = self.duration_seconds {
            record.duration_seconds = Some(duration);
        }
        if let Some(handle) = self.handle {
            record.handle = Some(handle);
        }
    }
}
