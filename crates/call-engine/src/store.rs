//! In-memory call record store
//!
//! Authoritative table of call records, keyed by call id. Operations are
//! atomic per id; cross-call invariants belong to the lifecycle engine, and
//! listings make no isolation guarantee against concurrent updates.

use dashmap::DashMap;
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::types::{CallId, CallRecord, CallUpdate};

/// Mapping from call identifier to call record
#[derive(Debug, Default)]
pub struct CallStore {
    calls: DashMap<CallId, CallRecord>,
}

impl CallStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }

    /// Insert a record. Callers are responsible for id uniqueness; an
    /// existing record under the same id is replaced.
    pub fn insert(&self, record: CallRecord) {
        if let Some(previous) = self.calls.insert(record.id.clone(), record) {
            warn!(call_id = %previous.id, "replaced existing call record");
        }
    }

    /// Snapshot of the record for the given id
    pub fn get(&self, id: &CallId) -> Option<CallRecord> {
        self.calls.get(id).map(|entry| entry.clone())
    }

    /// Whether a record exists for the given id
    pub fn contains(&self, id: &CallId) -> bool {
        self.calls.contains_key(id)
    }

    /// Partial update with merge semantics; only the named fields change
    pub fn update(&self, id: &CallId, update: CallUpdate) -> EngineResult<CallRecord> {
        self.modify(id, |record| {
            update.apply_to(record);
            Ok(record.clone())
        })
    }

    /// Run a closure against the record under its entry lock.
    ///
    /// This is what makes per-id updates linearizable: the closure observes
    /// and mutates the record with no interleaved writer.
    pub(crate) fn modify<R>(
        &self,
        id: &CallId,
        f: impl FnOnce(&mut CallRecord) -> EngineResult<R>,
    ) -> EngineResult<R> {
        match self.calls.get_mut(id) {
            Some(mut entry) => f(entry.value_mut()),
            None => Err(EngineError::not_found(id.clone())),
        }
    }

    /// All records, in no particular order
    pub fn list(&self) -> Vec<CallRecord> {
        self.calls.iter().map(|entry| entry.clone()).collect()
    }

    /// Records whose status is incoming or connected
    pub fn active(&self) -> Vec<CallRecord> {
        self.calls
            .iter()
            .filter(|entry| entry.status.is_active())
            .map(|entry| entry.clone())
            .collect()
    }

    /// The non-terminal record addressed by the given backend channel, if any
    pub fn find_by_channel(&self, channel: &str) -> Option<CallRecord> {
        self.calls
            .iter()
            .find(|entry| {
                !entry.status.is_terminal() && entry.handle.as_deref() == Some(channel)
            })
            .map(|entry| entry.clone())
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Remove every record; used for shutdown and test reset
    pub fn clear(&self) {
        self.calls.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallStatus, Provider};

    fn record(id: &str, status: CallStatus) -> CallRecord {
        CallRecord::new(CallId::new(id), "1001", "2000", status, Provider::Pbx)
    }

    #[test]
    fn insert_get_roundtrip() {
        let store = CallStore::new();
        store.insert(record("a", CallStatus::Incoming));
        let got = store.get(&CallId::new("a")).expect("stored");
        assert_eq!(got.from, "1001");
        assert!(store.get(&CallId::new("b")).is_none());
    }

    #[test]
    fn update_unknown_id_is_not_found() {
        let store = CallStore::new();
        let err = store
            .update(&CallId::new("missing"), CallUpdate::new())
            .expect_err("no record");
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn active_listing_filters_by_status() {
        let store = CallStore::new();
        store.insert(record("in", CallStatus::Incoming));
        store.insert(record("out", CallStatus::Outgoing));
        store.insert(record("up", CallStatus::Connected));
        store.insert(record("done", CallStatus::Ended));
        let mut active: Vec<String> = store
            .active()
            .into_iter()
            .map(|c| c.id.as_str().to_string())
            .collect();
        active.sort();
        assert_eq!(active, vec!["in", "up"]);
    }

    #[test]
    fn find_by_channel_skips_terminal_records() {
        let store = CallStore::new();
        store.insert(record("old", CallStatus::Ended).with_handle("SIP/1001"));
        store.insert(record("live", CallStatus::Outgoing).with_handle("SIP/1001"));
        let found = store.find_by_channel("SIP/1001").expect("live record");
        assert_eq!(found.id.as_str(), "live");
        assert!(store.find_by_channel("SIP/9999").is_none());
    }

    #[test]
    fn clear_empties_the_store() {
        let store = CallStore::new();
        store.insert(record("a", CallStatus::Incoming));
        assert_eq!(store.len(), 1);
        store.clear();
        assert!(store.is_empty());
    }
}
