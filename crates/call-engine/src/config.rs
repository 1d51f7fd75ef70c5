//! Engine configuration
//!
//! Values only; parsing files or environment belongs to the embedding
//! process.

use serde::{Deserialize, Serialize};
use trunkline_manager_core::ManagerConfig;

/// Cloud provider account settings, consumed by the HTTP-side
/// [`CloudBackend`](crate::cloud::CloudBackend) implementation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Provider account identifier
    pub account_sid: String,
    /// Provider auth token
    pub auth_token: String,
    /// Source number used for cloud-originated calls
    pub from_number: String,
}

/// What to do with PBX-routed calls while the manager connection is degraded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DegradedPolicy {
    /// Fail the call with a provider-unavailable error
    #[default]
    Reject,
    /// Synthesize a local-only simulated call record, driven by a local
    /// timer instead of PBX events
    Simulate,
}

/// Configuration for the call broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// PBX manager interface settings
    pub pbx: ManagerConfig,
    /// Cloud provider settings; `None` disables cloud routing
    pub cloud: Option<CloudConfig>,
    /// Degraded-PBX behavior; an explicit choice, never a hidden default
    pub degraded_policy: DegradedPolicy,
    /// Dialplan context used when originating PBX calls
    pub dial_context: String,
    /// Channel technology prefix for PBX endpoints
    pub channel_technology: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pbx: ManagerConfig::default(),
            cloud: None,
            degraded_policy: DegradedPolicy::Reject,
            dial_context: "from-internal".to_string(),
            channel_technology: "SIP".to_string(),
        }
    }
}

impl EngineConfig {
    /// Configuration talking to the given PBX
    pub fn new(pbx: ManagerConfig) -> Self {
        Self {
            pbx,
            ..Default::default()
        }
    }

    /// Enable cloud routing
    pub fn with_cloud(mut self, cloud: CloudConfig) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Set the degraded-PBX policy
    pub fn with_degraded_policy(mut self, policy: DegradedPolicy) -> Self {
        self.degraded_policy = policy;
        self
    }
}
