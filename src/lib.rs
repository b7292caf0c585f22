//! Provision Azure IoT devices through the Device Provisioning Service and
//! create their IoT Hub clients
//!
//! [`IoTHubClientManager`] registers a device in a provisioning scope, waits
//! for the hub assignment and hands the assigned hub and device id to a
//! [`DeviceClientFactory`]. The bundled backends speak MQTT over TLS:
//! [`DpsMqttConnector`](provisioning::dps::DpsMqttConnector) for provisioning
//! and [`MqttDeviceClientFactory`] for the hub connection.
//!
//! ## Feature flags
//!
//! - `c2d-messages`: Enables cloud to device messaging (default)
//!
//! # Examples
//!
//! ```no_run
//! use iothub_client_manager::provisioning::dps::DpsMqttConnector;
//! use iothub_client_manager::{
//!     DeviceTransport, IoTHubClientManager, Message, MqttDeviceClientFactory, SymmetricKey,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = SymmetricKey::Group("TheGroupKey".to_owned()).device_key("my-device")?;
//!
//!     let manager = IoTHubClientManager::builder()
//!         .connector(DpsMqttConnector::new("my-device", key.clone()))
//!         .device_client_factory(MqttDeviceClientFactory::new(key))
//!         .build()?;
//!
//!     let mut client = manager
//!         .create_device_client("0ne00000000", DeviceTransport::Mqtt)
//!         .await?;
//!
//!     client.send_message(Message::new(b"hello".to_vec())).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_debug_implementations, rust_2018_idioms, missing_docs)]

#[macro_use]
extern crate log;

/// Crate version
pub const SDK_VERSION: &str = std::env!("CARGO_PKG_VERSION");

/// The IoT Hub device client
pub mod client;
/// Manager settings
pub mod config;
pub(crate) mod connection;
/// Errors
pub mod error;
pub mod manager;
/// Message types for communicating with the IoT Hub
pub mod message;
pub mod provisioning;
/// SAS tokens and device keys
pub mod token;
/// Transport types
pub mod transport;

pub use crate::client::{IoTHubDeviceClient, MqttDeviceClientFactory};
pub use crate::config::ManagerConfig;
pub use crate::error::{ManagerError, RegistrationFailure, Result, TokenError, TransportError};
pub use crate::manager::{
    DeviceClientFactory, IoTHubClientManager, IoTHubClientManagerBuilder, ManagerBuilderError,
};
pub use crate::message::{Message, MessageBuilder, MessageType};
pub use crate::provisioning::{
    register_device, DeviceAssignment, ProvisioningConnector, ProvisioningSession,
    RegistrationNotifier, RegistrationOptions, RegistrationState,
};
pub use crate::token::{
    parse_connection_string, DeviceKeyTokenSource, SasTokenSource, SymmetricKey, TokenSource,
};
pub use crate::transport::{
    device_transport_to_provisioning, provisioning_transport_to_device, DeviceTransport,
    ProvisioningTransport,
};
