//! Transport selection
//!
//! The device client and the provisioning client each have their own list of
//! transports. Both are translated through one internal protocol list so
//! the pairs stay in step.

use std::fmt;
use std::str::FromStr;

/// Protocol families shared by the device and provisioning clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Protocol {
    Mqtt,
    MqttWebSocket,
    Amqp,
    AmqpWebSocket,
}

/// Transport used by a device client to talk to its IoT hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceTransport {
    /// MQTT over TLS
    Mqtt,
    /// MQTT over secure WebSockets
    MqttWebSocket,
    /// AMQP over TLS
    Amqp,
    /// AMQP over secure WebSockets
    AmqpWebSocket,
    /// HTTPS, not available for provisioning
    Http,
}

/// Transport used by a provisioning session to talk to DPS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisioningTransport {
    /// MQTT over TLS
    Mqtt,
    /// MQTT over secure WebSockets
    MqttWebSocket,
    /// AMQP over TLS
    Amqp,
    /// AMQP over secure WebSockets
    AmqpWebSocket,
}

impl DeviceTransport {
    fn protocol(self) -> Option<Protocol> {
        match self {
            DeviceTransport::Mqtt => Some(Protocol::Mqtt),
            DeviceTransport::MqttWebSocket => Some(Protocol::MqttWebSocket),
            DeviceTransport::Amqp => Some(Protocol::Amqp),
            DeviceTransport::AmqpWebSocket => Some(Protocol::AmqpWebSocket),
            DeviceTransport::Http => None,
        }
    }

    fn from_protocol(protocol: Protocol) -> DeviceTransport {
        match protocol {
            Protocol::Mqtt => DeviceTransport::Mqtt,
            Protocol::MqttWebSocket => DeviceTransport::MqttWebSocket,
            Protocol::Amqp => DeviceTransport::Amqp,
            Protocol::AmqpWebSocket => DeviceTransport::AmqpWebSocket,
        }
    }

    /// The provisioning transport for the same protocol family, `None` when
    /// provisioning has no counterpart (HTTP)
    pub fn to_provisioning(self) -> Option<ProvisioningTransport> {
        self.protocol().map(ProvisioningTransport::from_protocol)
    }

    /// Name used in configuration files
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceTransport::Mqtt => "mqtt",
            DeviceTransport::MqttWebSocket => "mqtt-ws",
            DeviceTransport::Amqp => "amqp",
            DeviceTransport::AmqpWebSocket => "amqp-ws",
            DeviceTransport::Http => "http",
        }
    }
}

impl ProvisioningTransport {
    fn protocol(self) -> Protocol {
        match self {
            ProvisioningTransport::Mqtt => Protocol::Mqtt,
            ProvisioningTransport::MqttWebSocket => Protocol::MqttWebSocket,
            ProvisioningTransport::Amqp => Protocol::Amqp,
            ProvisioningTransport::AmqpWebSocket => Protocol::AmqpWebSocket,
        }
    }

    fn from_protocol(protocol: Protocol) -> ProvisioningTransport {
        match protocol {
            Protocol::Mqtt => ProvisioningTransport::Mqtt,
            Protocol::MqttWebSocket => ProvisioningTransport::MqttWebSocket,
            Protocol::Amqp => ProvisioningTransport::Amqp,
            Protocol::AmqpWebSocket => ProvisioningTransport::AmqpWebSocket,
        }
    }

    /// The device transport for the same protocol family
    pub fn to_device(self) -> DeviceTransport {
        DeviceTransport::from_protocol(self.protocol())
    }

    /// Name used in configuration files
    pub fn as_str(self) -> &'static str {
        self.to_device().as_str()
    }
}

/// Map a device transport to its provisioning transport
pub fn device_transport_to_provisioning(
    transport: DeviceTransport,
) -> Option<ProvisioningTransport> {
    transport.to_provisioning()
}

/// Map a provisioning transport back to its device transport
pub fn provisioning_transport_to_device(transport: ProvisioningTransport) -> DeviceTransport {
    transport.to_device()
}

impl fmt::Display for DeviceTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ProvisioningTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a transport name is not recognised
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transport {0:?}")]
pub struct UnknownTransport(pub String);

impl FromStr for DeviceTransport {
    type Err = UnknownTransport;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_ascii_lowercase().as_str() {
            "mqtt" => Ok(DeviceTransport::Mqtt),
            "mqtt-ws" | "mqtt_ws" => Ok(DeviceTransport::MqttWebSocket),
            "amqp" => Ok(DeviceTransport::Amqp),
            "amqp-ws" | "amqp_ws" => Ok(DeviceTransport::AmqpWebSocket),
            "http" | "https" => Ok(DeviceTransport::Http),
            _ => Err(UnknownTransport(input.to_owned())),
        }
    }
}

impl FromStr for ProvisioningTransport {
    type Err = UnknownTransport;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        input
            .parse::<DeviceTransport>()?
            .to_provisioning()
            .ok_or_else(|| UnknownTransport(input.to_owned()))
    }
}
