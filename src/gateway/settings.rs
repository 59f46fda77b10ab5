use crate::access_control::{PolicySet, ResourceClassifier, ScopeResolver};
use crate::config::AppConfig;
use crate::error::ConfigError;

/// Immutable policy snapshot read once per request
#[derive(Debug, Clone)]
pub struct GateSettings {
    pub resolver: ScopeResolver,
    pub classifier: ResourceClassifier,
    pub policies: PolicySet,
    /// Mix the client-supplied client-id header into rate-limit identity
    pub trust_client_id_header: bool,
}

impl GateSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            resolver: ScopeResolver::from_config(&config.access),
            classifier: ResourceClassifier::from_config(&config.resources)?,
            policies: PolicySet::from_config(&config.policies)?,
            trust_client_id_header: config.rate_limiting.trust_client_id_header,
        })
    }
}
