//! # trunkline-call-engine
//!
//! One call-lifecycle API over two telephony backends: a local PBX driven
//! through [`trunkline_manager_core`], and a cloud provider reached through
//! the opaque [`CloudBackend`] capability.
//!
//! The pieces, leaves first:
//!
//! - [`store::CallStore`] — authoritative in-memory call table
//! - [`lifecycle::LifecycleEngine`] — the state machine every mutation goes
//!   through, emitting one notification per committed transition
//! - [`router`] — pure backend selection for outbound requests
//! - [`broker::CallBroker`] — the facade the API layer talks to
//!
//! Both backends feed the same five-state lifecycle
//! (`incoming | outgoing | connected | ended | failed`); whichever backend
//! sourced an event, the transition rules and notifications are identical.

pub mod broker;
pub mod cloud;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod pbx;
pub mod router;
pub mod store;
pub mod types;

pub use broker::CallBroker;
pub use cloud::{map_status, CallDirection, CloudBackend, CloudWebhook};
pub use config::{CloudConfig, DegradedPolicy, EngineConfig};
pub use error::{EngineError, EngineResult};
pub use lifecycle::{CallEvent, LifecycleEngine};
pub use notify::{BroadcastSink, CallNotification, NotificationKind, NotificationSink, NullSink};
pub use pbx::{PbxControl, PbxEventTranslator};
pub use router::{route, CallRequest};
pub use store::CallStore;
pub use types::{CallId, CallRecord, CallStatus, CallUpdate, Provider};
