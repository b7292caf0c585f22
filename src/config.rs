use std::time::Duration;

use serde::Deserialize;

use crate::provisioning::{RegistrationOptions, GLOBAL_PROVISIONING_ENDPOINT};

/// Settings of an [`IoTHubClientManager`](crate::IoTHubClientManager)
///
/// Every field has a default, so an empty configuration source is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Hostname of the provisioning service
    pub provisioning_endpoint: String,
    /// Milliseconds between two steps of the provisioning session
    pub pump_interval_ms: u64,
    /// Seconds to wait for the hub assignment
    pub registration_timeout_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let options = RegistrationOptions::default();
        Self {
            provisioning_endpoint: GLOBAL_PROVISIONING_ENDPOINT.to_owned(),
            pump_interval_ms: options.pump_interval.as_millis() as u64,
            registration_timeout_secs: options.timeout.as_secs(),
        }
    }
}

impl ManagerConfig {
    /// Pump interval and timeout as used by the registration loop
    pub fn registration_options(&self) -> RegistrationOptions {
        RegistrationOptions {
            pump_interval: Duration::from_millis(self.pump_interval_ms),
            timeout: Duration::from_secs(self.registration_timeout_secs),
        }
    }
}
