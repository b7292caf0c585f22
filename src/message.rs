use std::collections::HashMap;

use crate::error::TransportError;

/// Something the hub pushed to the device
#[derive(Debug)]
pub enum MessageType {
    /// Cloud to device message
    #[cfg(feature = "c2d-messages")]
    C2DMessage(Message),
    /// The connection failed while waiting for messages
    ErrorReceive(TransportError),
}

/// Telemetry or cloud to device message
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Message {
    /// Raw body of the message
    pub body: Vec<u8>,
    pub(crate) properties: HashMap<String, String>,
    pub(crate) system_properties: HashMap<String, String>,
}

impl Message {
    /// Create with contents of body as message bytes
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            ..Default::default()
        }
    }

    /// Get a builder instance for building up a message
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// Application properties set by the sender
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// System properties keyed by wire id, e.g. `$.mid`
    pub fn system_properties(&self) -> &HashMap<String, String> {
        &self.system_properties
    }
}

/// Builder for constructing Message instances
#[derive(Debug, Default)]
pub struct MessageBuilder {
    body: Vec<u8>,
    properties: HashMap<String, String>,
    system_properties: HashMap<String, String>,
}

impl MessageBuilder {
    /// Set the message body
    pub fn set_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Set the identifier for this message
    pub fn set_message_id(self, message_id: String) -> Self {
        self.set_system_property("$.mid", message_id)
    }

    /// Set the id used to correlate this message with another one
    pub fn set_correlation_id(self, correlation_id: String) -> Self {
        self.set_system_property("$.cid", correlation_id)
    }

    /// Set the content-type for this message, such as `text/plain`.
    /// To allow routing query on the message body, this value should be set to `application/json`
    pub fn set_content_type(self, content_type: String) -> Self {
        self.set_system_property("$.ct", content_type)
    }

    /// Set the content-encoding for this message.
    /// If the content-type is set to `application/json`, allowed values are `UTF-8`, `UTF-16`, `UTF-32`.
    pub fn set_content_encoding(self, content_encoding: String) -> Self {
        self.set_system_property("$.ce", content_encoding)
    }

    /// Wire ids of settable system properties:
    /// https://docs.microsoft.com/azure/iot-hub/iot-hub-devguide-messages-construct#system-properties-of-d2c-iot-hub-messages
    fn set_system_property(mut self, property_name: &str, value: String) -> Self {
        self.system_properties
            .insert(property_name.to_owned(), value);
        self
    }

    /// Add a message property
    pub fn add_message_property(mut self, key: String, value: String) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Build into a message instance
    pub fn build(self) -> Message {
        Message {
            body: self.body,
            properties: self.properties,
            system_properties: self.system_properties,
        }
    }
}
