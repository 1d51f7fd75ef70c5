//! Provider selection for outbound calls
//!
//! A pure, total function of the request: an explicit provider override wins
//! unconditionally; otherwise the shape of the destination address decides.
//! International-format numbers and anything longer than a short extension
//! go to the cloud backend, local extensions go to the PBX.

use crate::types::Provider;

/// Destination addresses longer than this are not local extensions
pub const EXTENSION_MAX_LEN: usize = 6;

/// Marker prefix for international-format numbers
pub const INTERNATIONAL_PREFIX: char = '+';

/// An outbound call request as handed over by the API layer,
/// already validated
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub from: String,
    pub to: String,
    /// Explicit backend override, if the caller named one
    pub provider: Option<Provider>,
}

impl CallRequest {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }
}

/// Select the backend for an outbound call request
pub fn route(request: &CallRequest) -> Provider {
    if let Some(provider) = request.provider {
        return provider;
    }
    if request.to.starts_with(INTERNATIONAL_PREFIX) || request.to.len() > EXTENSION_MAX_LEN {
        Provider::Cloud
    } else {
        Provider::Pbx
    }
}
