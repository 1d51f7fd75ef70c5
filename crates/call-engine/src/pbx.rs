//! PBX-side call control and event translation
//!
//! [`PbxControl`] assembles originate/hangup actions over the manager
//! client; [`PbxEventTranslator`] turns the manager's unsolicited events into
//! lifecycle operations. Events referencing unknown calls are ignored, and a
//! re-delivered answered state for an already-connected call is dropped
//! before it reaches the transition table.

use std::sync::Arc;

use tracing::{debug, warn};
use trunkline_manager_core::{ManagerClient, ManagerEvent, CHANNEL_STATE_ANSWERED};

use crate::error::{EngineError, EngineResult};
use crate::lifecycle::{CallEvent, LifecycleEngine};
use crate::store::CallStore;
use crate::types::{CallId, CallRecord, CallStatus, Provider};

/// Issues call-control actions against the PBX manager interface
#[derive(Clone)]
pub struct PbxControl {
    client: ManagerClient,
    dial_context: String,
    channel_technology: String,
}

impl PbxControl {
    pub fn new(
        client: ManagerClient,
        dial_context: impl Into<String>,
        channel_technology: impl Into<String>,
    ) -> Self {
        Self {
            client,
            dial_context: dial_context.into(),
            channel_technology: channel_technology.into(),
        }
    }

    /// The manager client this control issues actions through
    pub fn client(&self) -> &ManagerClient {
        &self.client
    }

    /// Originate a call from the given extension to the given destination.
    ///
    /// Returns the channel handle used to address later commands at the call.
    pub async fn originate(&self, from: &str, to: &str) -> EngineResult<String> {
        let channel = format!("{}/{}", self.channel_technology, from);
        let response = self
            .client
            .submit(
                "Originate",
                &[
                    ("Channel", channel.as_str()),
                    ("Exten", to),
                    ("Context", self.dial_context.as_str()),
                    ("Priority", "1"),
                    ("CallerID", from),
                    ("Async", "true"),
                ],
            )
            .await?;
        if !response.is_success() {
            return Err(EngineError::pbx(
                response.message_text().unwrap_or("originate rejected"),
            ));
        }
        Ok(channel)
    }

    /// Hang up the call addressed by the given channel handle
    pub async fn hangup(&self, channel: &str) -> EngineResult<()> {
        let response = self
            .client
            .submit("Hangup", &[("Channel", channel)])
            .await?;
        if !response.is_success() {
            return Err(EngineError::pbx(
                response.message_text().unwrap_or("hangup rejected"),
            ));
        }
        Ok(())
    }
}

/// Maps manager events onto lifecycle operations
pub struct PbxEventTranslator {
    store: Arc<CallStore>,
    lifecycle: Arc<LifecycleEngine>,
}

impl PbxEventTranslator {
    pub fn new(store: Arc<CallStore>, lifecycle: Arc<LifecycleEngine>) -> Self {
        Self { store, lifecycle }
    }

    /// Process one unsolicited event
    pub async fn handle(&self, event: ManagerEvent) {
        match event {
            ManagerEvent::NewChannel {
                unique_id,
                channel,
                caller_id_num: Some(from),
                exten: Some(exten),
            } => {
                let id = CallId::new(unique_id);
                if self.store.contains(&id) {
                    debug!(call_id = %id, "duplicate channel-creation event ignored");
                    return;
                }
                // The leg of a call we originated reports back under the
                // channel we asked for; that is not a new incoming call.
                if self.store.find_by_channel(&channel).is_some() {
                    debug!(%channel, "channel belongs to an originated call");
                    return;
                }
                self.lifecycle
                    .create_incoming(id, from, exten, Provider::Pbx, Some(channel))
                    .await;
            }
            ManagerEvent::NewChannel { unique_id, .. } => {
                debug!(%unique_id, "channel without caller or extension ignored");
            }
            ManagerEvent::NewState {
                ref unique_id,
                ref channel,
                ref channel_state,
            } if channel_state.as_str() == CHANNEL_STATE_ANSWERED => {
                let Some(call) = self.resolve(unique_id, channel) else {
                    debug!(%unique_id, "answered state for unknown call ignored");
                    return;
                };
                if call.status == CallStatus::Connected {
                    debug!(call_id = %call.id, "re-delivered answered state ignored");
                    return;
                }
                if let Err(err) = self.lifecycle.apply(&call.id, CallEvent::RemoteAnswered).await {
                    warn!(call_id = %call.id, error = %err, "answered event not applicable");
                }
            }
            ManagerEvent::NewState { .. } => {}
            ManagerEvent::Hangup {
                ref unique_id,
                ref channel,
                ref cause,
            } => {
                let Some(call) = self.resolve(unique_id, channel) else {
                    debug!(%unique_id, "hangup for unknown call ignored");
                    return;
                };
                debug!(call_id = %call.id, ?cause, "hangup event received");
                if let Err(err) = self.lifecycle.apply(&call.id, CallEvent::Hangup).await {
                    // Already finalized, e.g. by an API hangup racing the event
                    debug!(call_id = %call.id, error = %err, "hangup event not applicable");
                }
            }
            ManagerEvent::Other { name, .. } => {
                debug!(event = %name, "unhandled manager event");
            }
        }
    }

    /// Find the call an event refers to: by backend-assigned id first, then
    /// by channel handle (locally originated calls carry a local id).
    fn resolve(&self, unique_id: &str, channel: &str) -> Option<CallRecord> {
        let id = CallId::new(unique_id);
        self.store
            .get(&id)
            .or_else(|| self.store.find_by_channel(channel))
    }
}
