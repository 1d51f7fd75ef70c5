//! The unified call broker
//!
//! [`CallBroker`] is the one call-lifecycle API the HTTP layer talks to. It
//! routes outbound requests to a backend, drives the lifecycle engine from
//! both event sources (the PBX event feed and cloud status webhooks), and
//! answers queries out of the call store.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trunkline_call_engine::{CallBroker, EngineConfig, NullSink};
//! use trunkline_manager_core::ManagerClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let manager = ManagerClient::connect(config.pbx.clone());
//! let broker = CallBroker::new(config, manager, None, Arc::new(NullSink));
//!
//! let call = broker.place_call("1001", "2000", None).await?;
//! println!("placed {} via {}", call.id, call.provider);
//! broker.hangup_call(&call.id).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trunkline_manager_core::ManagerClient;

use crate::cloud::{map_status, CallDirection, CloudBackend, CloudWebhook};
use crate::config::{DegradedPolicy, EngineConfig};
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::{CallEvent, LifecycleEngine};
use crate::notify::NotificationSink;
use crate::pbx::{PbxControl, PbxEventTranslator};
use crate::router::{route, CallRequest};
use crate::store::CallStore;
use crate::types::{CallId, CallRecord, Provider};

/// How long a simulated call rings before it is answered
const SIMULATED_ANSWER_DELAY: Duration = Duration::from_secs(2);

/// Brokers calls across the PBX and cloud backends behind one API
pub struct CallBroker {
    config: EngineConfig,
    store: Arc<CallStore>,
    lifecycle: Arc<LifecycleEngine>,
    pbx: PbxControl,
    cloud: Option<Arc<dyn CloudBackend>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl CallBroker {
    /// Create the broker and start pumping manager events into the
    /// lifecycle engine
    pub fn new(
        config: EngineConfig,
        manager: ManagerClient,
        cloud: Option<Arc<dyn CloudBackend>>,
        sink: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        let store = Arc::new(CallStore::new());
        let lifecycle = Arc::new(LifecycleEngine::new(store.clone(), sink));
        let pbx = PbxControl::new(
            manager.clone(),
            config.dial_context.clone(),
            config.channel_technology.clone(),
        );
        let translator = PbxEventTranslator::new(store.clone(), lifecycle.clone());
        let mut events = manager.subscribe();
        let pump = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => translator.handle(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "manager event feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Arc::new(Self {
            config,
            store,
            lifecycle,
            pbx,
            cloud,
            pump: Mutex::new(Some(pump)),
        })
    }

    /// The manager client backing PBX operations
    pub fn manager(&self) -> &ManagerClient {
        self.pbx.client()
    }

    /// Place an outbound call; the router picks the backend unless the
    /// caller named one explicitly
    pub async fn place_call(
        &self,
        from: impl Into<String>,
        to: impl Into<String>,
        provider: Option<Provider>,
    ) -> EngineResult<CallRecord> {
        let request = CallRequest {
            from: from.into(),
            to: to.into(),
            provider,
        };
        match route(&request) {
            Provider::Cloud => self.place_cloud(request).await,
            Provider::Pbx => self.place_pbx(request).await,
        }
    }

    async fn place_cloud(&self, request: CallRequest) -> EngineResult<CallRecord> {
        let Some(cloud) = self.cloud.clone() else {
            return Err(EngineError::unavailable(Provider::Cloud));
        };
        let provider_id = cloud.place(&request.from, &request.to).await?;
        let id = CallId::new(provider_id.clone());
        info!(call_id = %id, "cloud call placed");
        Ok(self
            .lifecycle
            .create_outgoing(
                id,
                request.from,
                request.to,
                Provider::Cloud,
                Some(provider_id),
            )
            .await)
    }

    async fn place_pbx(&self, request: CallRequest) -> EngineResult<CallRecord> {
        match self.pbx.originate(&request.from, &request.to).await {
            Ok(channel) => {
                let id = CallId::generate(Provider::Pbx);
                info!(call_id = %id, %channel, "pbx call originated");
                Ok(self
                    .lifecycle
                    .create_outgoing(id, request.from, request.to, Provider::Pbx, Some(channel))
                    .await)
            }
            Err(EngineError::Manager(err)) if err.is_connection_failure() => {
                self.place_degraded(request).await
            }
            Err(err) => Err(err),
        }
    }

    /// PBX-routed call while the manager connection is down: fail or
    /// simulate, per the configured policy
    async fn place_degraded(&self, request: CallRequest) -> EngineResult<CallRecord> {
        match self.config.degraded_policy {
            DegradedPolicy::Reject => {
                warn!(to = %request.to, "pbx unavailable; rejecting call");
                Err(EngineError::unavailable(Provider::Pbx))
            }
            DegradedPolicy::Simulate => {
                let id = CallId::generate(Provider::Pbx);
                info!(call_id = %id, "pbx unavailable; simulating local-only call");
                let record = self
                    .lifecycle
                    .create_outgoing(id.clone(), request.from, request.to, Provider::Pbx, None)
                    .await;
                let lifecycle = self.lifecycle.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(SIMULATED_ANSWER_DELAY).await;
                    if let Err(err) = lifecycle.apply(&id, CallEvent::RemoteAnswered).await {
                        debug!(call_id = %id, error = %err, "simulated call already finalized");
                    }
                });
                Ok(record)
            }
        }
    }

    /// Accept an incoming call
    pub async fn accept_call(&self, id: &CallId) -> EngineResult<CallRecord> {
        self.lifecycle.apply(id, CallEvent::Accepted).await
    }

    /// Reject an incoming call
    pub async fn reject_call(&self, id: &CallId) -> EngineResult<CallRecord> {
        self.lifecycle.apply(id, CallEvent::Rejected).await
    }

    /// Hang up a call on whichever backend owns it.
    ///
    /// The backend command is best-effort; the record is finalized locally
    /// either way, so a dead PBX cannot strand a call as connected.
    pub async fn hangup_call(&self, id: &CallId) -> EngineResult<CallRecord> {
        let call = self
            .store
            .get(id)
            .ok_or_else(|| EngineError::not_found(id.clone()))?;
        if call.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                call_id: id.clone(),
                from: call.status,
                event: CallEvent::Hangup,
            });
        }
        match (call.provider, call.handle.as_deref()) {
            (Provider::Pbx, Some(handle)) => {
                if let Err(err) = self.pbx.hangup(handle).await {
                    warn!(call_id = %id, error = %err, "pbx hangup failed; finalizing locally");
                }
            }
            (Provider::Cloud, Some(handle)) => {
                if let Some(cloud) = &self.cloud {
                    if let Err(err) = cloud.terminate(handle).await {
                        warn!(call_id = %id, error = %err, "cloud terminate failed; finalizing locally");
                    }
                }
            }
            // Simulated calls have no backend resource
            _ => {}
        }
        self.lifecycle.apply(id, CallEvent::Hangup).await
    }

    /// Fold a cloud status callback into the lifecycle.
    ///
    /// The first observation of a cloud call creates its record; repeated
    /// status deliveries are no-ops.
    pub async fn handle_webhook(&self, webhook: CloudWebhook) -> EngineResult<Option<CallRecord>> {
        let id = CallId::new(webhook.call_id.clone());
        let status = map_status(&webhook.status);
        if !self.store.contains(&id) {
            let record = match webhook.direction {
                CallDirection::Inbound => {
                    self.lifecycle
                        .create_incoming(
                            id.clone(),
                            webhook.from,
                            webhook.to,
                            Provider::Cloud,
                            Some(webhook.call_id),
                        )
                        .await
                }
                CallDirection::Outbound => {
                    self.lifecycle
                        .create_outgoing(
                            id.clone(),
                            webhook.from,
                            webhook.to,
                            Provider::Cloud,
                            Some(webhook.call_id),
                        )
                        .await
                }
            };
            if record.status == status {
                return Ok(Some(record));
            }
        }
        self.lifecycle.apply_status(&id, status).await
    }

    /// Snapshot of one call
    pub fn get_call(&self, id: &CallId) -> EngineResult<CallRecord> {
        self.store
            .get(id)
            .ok_or_else(|| EngineError::not_found(id.clone()))
    }

    /// All calls, any status
    pub fn list_calls(&self) -> Vec<CallRecord> {
        self.store.list()
    }

    /// Calls currently incoming or connected
    pub fn active_calls(&self) -> Vec<CallRecord> {
        self.store.active()
    }

    /// Drop every call record; for shutdown and test reset
    pub fn clear_calls(&self) {
        self.store.clear();
    }

    /// Stop the event pump and close the manager connection
    pub async fn shutdown(&self) {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        self.pbx.client().close().await;
    }
}
