//! Call lifecycle state machine
//!
//! All mutation of call records flows through [`LifecycleEngine`], whether
//! the driving event came from the PBX event feed, a cloud status callback,
//! or an API caller. The transition table:
//!
//! | Event              | Valid from            | Destination |
//! |--------------------|-----------------------|-------------|
//! | accept             | incoming              | connected   |
//! | remote answer      | incoming, outgoing    | connected   |
//! | reject             | incoming              | ended       |
//! | hangup             | any non-terminal      | ended       |
//! | provider failure   | any non-terminal      | failed      |
//!
//! A transition from a state not listed for the event is rejected with
//! [`EngineError::InvalidTransition`] and the record is left untouched.
//! Every committed transition emits exactly one notification; sink failures
//! are logged and never roll the transition back.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::notify::{CallNotification, NotificationKind, NotificationSink};
use crate::store::CallStore;
use crate::types::{CallId, CallRecord, CallStatus, Provider};

/// A lifecycle transition request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    /// The local side accepted an incoming call
    Accepted,
    /// The remote side answered
    RemoteAnswered,
    /// The local side rejected an incoming call
    Rejected,
    /// Either side hung up, or the API requested termination
    Hangup,
    /// The provider reported busy, no-answer, or an error
    ProviderFailure,
}

impl CallEvent {
    /// Destination status, when the source status permits this event
    pub fn destination(self, from: CallStatus) -> Option<CallStatus> {
        match (self, from) {
            (CallEvent::Accepted, CallStatus::Incoming) => Some(CallStatus::Connected),
            (CallEvent::RemoteAnswered, CallStatus::Incoming | CallStatus::Outgoing) => {
                Some(CallStatus::Connected)
            }
            (CallEvent::Rejected, CallStatus::Incoming) => Some(CallStatus::Ended),
            (CallEvent::Hangup, from) if !from.is_terminal() => Some(CallStatus::Ended),
            (CallEvent::ProviderFailure, from) if !from.is_terminal() => Some(CallStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for CallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallEvent::Accepted => "accept",
            CallEvent::RemoteAnswered => "remote-answer",
            CallEvent::Rejected => "reject",
            CallEvent::Hangup => "hangup",
            CallEvent::ProviderFailure => "provider-failure",
        };
        f.write_str(s)
    }
}

/// Drives all call state transitions and owns notification emission
pub struct LifecycleEngine {
    store: Arc<CallStore>,
    sink: Arc<dyn NotificationSink>,
}

impl LifecycleEngine {
    pub fn new(store: Arc<CallStore>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { store, sink }
    }

    /// Create a record for an observed inbound call
    pub async fn create_incoming(
        &self,
        id: CallId,
        from: impl Into<String>,
        to: impl Into<String>,
        provider: Provider,
        handle: Option<String>,
    ) -> CallRecord {
        let mut record = CallRecord::new(id, from, to, CallStatus::Incoming, provider);
        record.handle = handle;
        self.store.insert(record.clone());
        debug!(call_id = %record.id, %provider, "incoming call created");
        self.emit(NotificationKind::IncomingCall, &record).await;
        record
    }

    /// Create a record for an outbound call placed by this system
    pub async fn create_outgoing(
        &self,
        id: CallId,
        from: impl Into<String>,
        to: impl Into<String>,
        provider: Provider,
        handle: Option<String>,
    ) -> CallRecord {
        let mut record = CallRecord::new(id, from, to, CallStatus::Outgoing, provider);
        record.handle = handle;
        self.store.insert(record.clone());
        debug!(call_id = %record.id, %provider, "outgoing call created");
        self.emit(NotificationKind::OutgoingCall, &record).await;
        record
    }

    /// Apply a lifecycle event to the call.
    ///
    /// The transition is validated and committed under the record's entry
    /// lock; on rejection the record is untouched and the error names the
    /// offending state.
    pub async fn apply(&self, id: &CallId, event: CallEvent) -> EngineResult<CallRecord> {
        let committed = self.store.modify(id, |record| {
            let next = event.destination(record.status).ok_or_else(|| {
                EngineError::InvalidTransition {
                    call_id: id.clone(),
                    from: record.status,
                    event,
                }
            })?;
            commit(record, next);
            Ok(record.clone())
        })?;
        debug!(call_id = %id, status = %committed.status, %event, "call transition committed");
        self.emit(kind_for(committed.status), &committed).await;
        Ok(committed)
    }

    /// Fold a canonical status reported by a provider into the state machine.
    ///
    /// Returns `Ok(None)` without transition or notification when the status
    /// matches the call's current state (provider callbacks repeat) or when
    /// it names an entry state, which cannot be re-entered.
    pub async fn apply_status(
        &self,
        id: &CallId,
        status: CallStatus,
    ) -> EngineResult<Option<CallRecord>> {
        let committed = self.store.modify(id, |record| {
            if record.status == status {
                return Ok(None);
            }
            let event = match status {
                CallStatus::Connected => CallEvent::RemoteAnswered,
                CallStatus::Ended => CallEvent::Hangup,
                CallStatus::Failed => CallEvent::ProviderFailure,
                // Progress reports before answer carry no transition
                CallStatus::Incoming | CallStatus::Outgoing => return Ok(None),
            };
            let next = event.destination(record.status).ok_or_else(|| {
                EngineError::InvalidTransition {
                    call_id: id.clone(),
                    from: record.status,
                    event,
                }
            })?;
            commit(record, next);
            Ok(Some(record.clone()))
        })?;
        if let Some(record) = &committed {
            debug!(call_id = %id, status = %record.status, "provider status folded in");
            self.emit(kind_for(record.status), record).await;
        }
        Ok(committed)
    }

    async fn emit(&self, kind: NotificationKind, record: &CallRecord) {
        let notification = CallNotification {
            kind,
            call_id: record.id.clone(),
            data: serde_json::to_value(record).unwrap_or(serde_json::Value::Null),
        };
        if let Err(err) = self.sink.notify(notification).await {
            // Best-effort delivery; the transition stands
            warn!(call_id = %record.id, error = %err, "notification delivery failed");
        }
    }
}

fn commit(record: &mut CallRecord, next: CallStatus) {
    record.status = next;
    if next.is_terminal() {
        let now = Utc::now();
        record.end_time = Some(now);
        record.duration_seconds = Some((now - record.start_time).num_seconds().max(0) as u64);
    }
}

fn kind_for(status: CallStatus) -> NotificationKind {
    match status {
        CallStatus::Incoming => NotificationKind::IncomingCall,
        CallStatus::Outgoing => NotificationKind::OutgoingCall,
        CallStatus::Connected => NotificationKind::CallConnected,
        CallStatus::Ended => NotificationKind::CallEnded,
        CallStatus::Failed => NotificationKind::CallFailed,
    }
}
