//! Provision a device and hand back a connected hub client
//!
//! [`IoTHubClientManager`] ties a [`ProvisioningConnector`] that talks to the
//! provisioning service to a [`DeviceClientFactory`] that builds the device
//! client once the hub assignment is known.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::provisioning::{register_device, ProvisioningConnector, RegistrationOptions};
use crate::transport::DeviceTransport;

/// Builds device clients for an assigned hub identity
#[async_trait]
pub trait DeviceClientFactory: Send + Sync {
    /// Client handed to the caller, who owns it from then on
    type Client;
    /// Reason a client could not be built
    type Error: std::error::Error + Send + Sync + 'static;

    /// Build a client for `device_id` on `hub_uri` speaking `transport`
    async fn create_from_identity(
        &self,
        hub_uri: &str,
        device_id: &str,
        transport: DeviceTransport,
    ) -> Result<Self::Client, Self::Error>;
}

/// Provisions devices and creates their hub clients
#[derive(Debug)]
pub struct IoTHubClientManager<P, F> {
    connector: P,
    factory: F,
    provisioning_endpoint: String,
    options: RegistrationOptions,
}

impl IoTHubClientManager<(), ()> {
    /// Get a builder for the client manager
    pub fn builder() -> IoTHubClientManagerBuilder<(), ()> {
        IoTHubClientManagerBuilder::default()
    }
}

impl<P, F> IoTHubClientManager<P, F>
where
    P: ProvisioningConnector,
    F: DeviceClientFactory,
{
    /// Create a manager from its parts, skipping the builder's validation
    ///
    /// Zero intervals are still rejected by each registration.
    pub fn new(connector: P, factory: F, config: ManagerConfig) -> Self {
        Self {
            connector,
            factory,
            options: config.registration_options(),
            provisioning_endpoint: config.provisioning_endpoint,
        }
    }

    /// Hostname of the provisioning service
    pub fn provisioning_endpoint(&self) -> &str {
        &self.provisioning_endpoint
    }

    /// Pump interval and timeout used for each registration
    pub fn registration_options(&self) -> &RegistrationOptions {
        &self.options
    }

    /// Register the device in `scope_id` and create a client for the hub it was assigned to
    ///
    /// The client speaks `transport`; provisioning speaks the matching
    /// provisioning transport. [`DeviceTransport::Http`] has none and is rejected
    /// before anything goes on the network.
    ///
    /// # Example
    /// ```no_run
    /// use iothub_client_manager::provisioning::dps::DpsMqttConnector;
    /// use iothub_client_manager::{DeviceTransport, IoTHubClientManager, MqttDeviceClientFactory};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let manager = IoTHubClientManager::builder()
    ///         .connector(DpsMqttConnector::new("my-device", "TheDeviceKey"))
    ///         .device_client_factory(MqttDeviceClientFactory::new("TheDeviceKey"))
    ///         .build()?;
    ///
    ///     let client = manager
    ///         .create_device_client("0ne00000000", DeviceTransport::Mqtt)
    ///         .await?;
    ///     println!("Connected to {}", client.hub_name());
    ///     Ok(())
    /// }
    /// ```
    pub async fn create_device_client(
        &self,
        scope_id: &str,
        transport: DeviceTransport,
    ) -> crate::Result<F::Client> {
        if scope_id.is_empty() {
            return Err(ManagerError::InvalidArgument("scope_id"));
        }

        let provisioning_transport = transport
            .to_provisioning()
            .ok_or(ManagerError::UnsupportedTransport(transport))?;

        let assignment = register_device(
            &self.connector,
            &self.provisioning_endpoint,
            scope_id,
            provisioning_transport,
            &self.options,
        )
        .await?;

        debug!(
            "Creating {} client for {} on {}",
            transport, assignment.device_id, assignment.hub_uri
        );
        self.factory
            .create_from_identity(&assignment.hub_uri, &assignment.device_id, transport)
            .await
            .map_err(|err| ManagerError::ClientCreateFailed(Box::new(err)))
    }

    /// Not implemented, always fails after validating `scope_id`
    pub async fn create_client_async(
        &self,
        scope_id: &str,
        _transport: DeviceTransport,
    ) -> crate::Result<F::Client> {
        not_implemented("create_client_async", scope_id)
    }

    /// Not implemented, always fails after validating `scope_id`
    pub fn create_convenience_client(
        &self,
        scope_id: &str,
        _transport: DeviceTransport,
    ) -> crate::Result<F::Client> {
        not_implemented("create_convenience_client", scope_id)
    }

    /// Not implemented, always fails after validating `scope_id`
    pub async fn create_convenience_client_async(
        &self,
        scope_id: &str,
        _transport: DeviceTransport,
    ) -> crate::Result<F::Client> {
        not_implemented("create_convenience_client_async", scope_id)
    }
}

fn not_implemented<T>(name: &'static str, scope_id: &str) -> crate::Result<T> {
    if scope_id.is_empty() {
        return Err(ManagerError::InvalidArgument("scope_id"));
    }
    warn!("{} is not implemented, no client created", name);
    Err(ManagerError::NotImplemented(name))
}

/// Error related to building the manager
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ManagerBuilderError {
    /// Uninitialized field
    #[error("{0} must be initialized")]
    UninitializedField(&'static str),
    /// Custom validation error
    #[error("{0} failed to validate")]
    ValidationError(&'static str),
}

/// Builder object for [`IoTHubClientManager`]
#[derive(Debug)]
pub struct IoTHubClientManagerBuilder<P, F> {
    connector: Option<P>,
    factory: Option<F>,
    config: ManagerConfig,
    pump_interval: Option<Duration>,
    registration_timeout: Option<Duration>,
}

impl Default for IoTHubClientManagerBuilder<(), ()> {
    fn default() -> Self {
        Self {
            connector: None,
            factory: None,
            config: ManagerConfig::default(),
            pump_interval: None,
            registration_timeout: None,
        }
    }
}

impl<P, F> IoTHubClientManagerBuilder<P, F> {
    /// Set the connector used to open provisioning sessions
    pub fn connector<C>(self, connector: C) -> IoTHubClientManagerBuilder<C, F>
    where
        C: ProvisioningConnector,
    {
        IoTHubClientManagerBuilder {
            connector: Some(connector),
            factory: self.factory,
            config: self.config,
            pump_interval: self.pump_interval,
            registration_timeout: self.registration_timeout,
        }
    }

    /// Set the factory building clients for assigned devices
    pub fn device_client_factory<D>(self, factory: D) -> IoTHubClientManagerBuilder<P, D>
    where
        D: DeviceClientFactory,
    {
        IoTHubClientManagerBuilder {
            connector: self.connector,
            factory: Some(factory),
            config: self.config,
            pump_interval: self.pump_interval,
            registration_timeout: self.registration_timeout,
        }
    }

    /// Replace all settings at once, `pump_interval` and
    /// `registration_timeout` still take precedence
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Hostname of the provisioning service
    pub fn provisioning_endpoint<T>(mut self, endpoint: T) -> Self
    where
        T: ToString,
    {
        self.config.provisioning_endpoint = endpoint.to_string();
        self
    }

    /// Delay between two steps of the provisioning session
    pub fn pump_interval(mut self, interval: Duration) -> Self {
        self.pump_interval = Some(interval);
        self
    }

    /// How long to wait for the hub assignment
    pub fn registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = Some(timeout);
        self
    }
}

impl<P, F> IoTHubClientManagerBuilder<P, F>
where
    P: ProvisioningConnector,
    F: DeviceClientFactory,
{
    /// Build the client manager
    pub fn build(self) -> Result<IoTHubClientManager<P, F>, ManagerBuilderError> {
        let Some(connector) = self.connector else {
            return Err(ManagerBuilderError::UninitializedField("connector"));
        };

        let Some(factory) = self.factory else {
            return Err(ManagerBuilderError::UninitializedField(
                "device_client_factory",
            ));
        };

        if self.config.provisioning_endpoint.is_empty() {
            return Err(ManagerBuilderError::ValidationError("provisioning_endpoint"));
        }

        let defaults = self.config.registration_options();
        let options = RegistrationOptions {
            pump_interval: self.pump_interval.unwrap_or(defaults.pump_interval),
            timeout: self.registration_timeout.unwrap_or(defaults.timeout),
        };
        if let Err(ManagerError::InvalidArgument(field)) = options.validate() {
            return Err(ManagerBuilderError::ValidationError(field));
        }

        Ok(IoTHubClientManager {
            connector,
            factory,
            provisioning_endpoint: self.config.provisioning_endpoint,
            options,
        })
    }
}
