use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
#[cfg(feature = "c2d-messages")]
use tokio::sync::mpsc::{channel, Receiver};

#[cfg(feature = "c2d-messages")]
use crate::connection::Inbound;
use crate::connection::{ConnectOptions, MqttConnection, PacketWriter};
use crate::error::TransportError;
use crate::manager::DeviceClientFactory;
use crate::message::Message;
#[cfg(feature = "c2d-messages")]
use crate::message::MessageType;
use crate::token::{DeviceKeyTokenSource, TokenSource};
use crate::transport::DeviceTransport;

const KEEP_ALIVE: u16 = 10;
const HUB_API_VERSION: &str = "api-version=2018-06-30";

#[cfg(feature = "c2d-messages")]
fn device_bound_messages_topic_filter(device_id: &str) -> String {
    format!("devices/{}/messages/devicebound/#", device_id)
}
#[cfg(feature = "c2d-messages")]
fn device_bound_messages_topic_prefix(device_id: &str) -> String {
    format!("devices/{}/messages/devicebound/", device_id)
}
fn cloud_bound_messages_topic(device_id: &str) -> String {
    format!("devices/{}/messages/events/", device_id)
}

/// Client for communicating with IoT hub over MQTT
#[derive(Debug)]
pub struct IoTHubDeviceClient {
    hub_name: String,
    device_id: String,
    writer: PacketWriter,
    d2c_topic: String,
    connection: Option<MqttConnection>,
}

impl IoTHubDeviceClient {
    /// Connect to the hub as `device_id`
    ///
    /// # Arguments
    ///
    /// * `hub_name` - The IoT hub hostname
    /// * `device_id` - The registered device to connect as
    /// * `token_source` - The token source to provide authentication
    ///
    /// # Example
    /// ```no_run
    /// use iothub_client_manager::{DeviceKeyTokenSource, IoTHubDeviceClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> iothub_client_manager::Result<()> {
    ///     let hostname = "iothubname.azure-devices.net";
    ///     let token_source = DeviceKeyTokenSource::new(hostname, "MyDeviceId", "TheAccessKey")?;
    ///
    ///     let client = IoTHubDeviceClient::connect(hostname, "MyDeviceId", &token_source).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect<TS>(
        hub_name: &str,
        device_id: &str,
        token_source: &TS,
    ) -> crate::Result<IoTHubDeviceClient>
    where
        TS: TokenSource + ?Sized,
    {
        let expiry = Utc::now() + Duration::days(1);
        trace!("Generating token that will expire at {}", expiry);
        let token = token_source.get(&expiry)?;

        let connection = MqttConnection::connect(ConnectOptions {
            host: hub_name,
            client_id: device_id,
            user_name: format!("{}/{}/?{}", hub_name, device_id, HUB_API_VERSION),
            password: token,
            keep_alive: KEEP_ALIVE,
        })
        .await?;

        info!("Device {} connected to {}", device_id, hub_name);

        Ok(Self {
            hub_name: hub_name.to_owned(),
            device_id: device_id.to_owned(),
            writer: connection.writer.clone(),
            d2c_topic: cloud_bound_messages_topic(device_id),
            connection: Some(connection),
        })
    }

    /// Hostname of the hub this client is connected to
    pub fn hub_name(&self) -> &str {
        &self.hub_name
    }

    /// Device id this client is connected as
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Send a device to cloud message for this device to the IoT Hub
    pub async fn send_message(&mut self, message: Message) -> crate::Result<()> {
        let full_topic = build_topic_name(&self.d2c_topic, &message);
        trace!("Sending message {:?} to topic {:?}", message, full_topic);
        self.writer.publish(full_topic, message.body).await?;
        Ok(())
    }

    /// Subscribe to cloud to device messages
    ///
    /// Can be called once, the connection has a single reader.
    #[cfg(feature = "c2d-messages")]
    pub async fn get_receiver(&mut self) -> crate::Result<Receiver<MessageType>> {
        let mut connection = self.connection.take().ok_or_else(|| {
            TransportError::Protocol("receiver was already taken".to_owned())
        })?;

        let filters = [device_bound_messages_topic_filter(&self.device_id)];
        self.writer.subscribe(10, &filters).await?;

        let (handler_tx, handler_rx) = channel::<MessageType>(3);
        let rx_topic_prefix = device_bound_messages_topic_prefix(&self.device_id);
        let writer = self.writer.clone();

        let _ = tokio::spawn(async move {
            while let Some(inbound) = connection.incoming.recv().await {
                let message = match inbound {
                    Inbound::Publish { topic, payload } => {
                        match topic.strip_prefix(&rx_topic_prefix) {
                            Some(properties) => {
                                MessageType::C2DMessage(parse_c2d_message(properties, payload))
                            }
                            None => {
                                trace!("Ignoring publish on {}", topic);
                                continue;
                            }
                        }
                    }
                    Inbound::PingResponse => {
                        info!("Receiving PINGRESP from broker ..");
                        continue;
                    }
                    Inbound::Closed(reason) => {
                        MessageType::ErrorReceive(TransportError::Protocol(reason))
                    }
                };

                if handler_tx.send(message).await.is_err() {
                    break;
                }
            }

            // Receiver dropped, stop listening
            if let Err(err) = writer.unsubscribe(10, &filters).await {
                debug!("Unsubscribe after receiver dropped failed: {}", err);
            }
            connection.close().await;
        });

        Ok(handler_rx)
    }

    /// Keep the connection alive
    pub async fn ping(&mut self) -> crate::Result<()> {
        info!("Sending PINGREQ to broker");
        self.writer.ping().await?;
        Ok(())
    }

    /// Disconnect from the hub
    pub async fn disconnect(mut self) -> crate::Result<()> {
        info!("Disconnecting device {} from {}", self.device_id, self.hub_name);
        match self.connection.take() {
            Some(connection) => connection.close().await,
            None => self.writer.disconnect().await?,
        }
        Ok(())
    }
}

#[cfg(feature = "c2d-messages")]
fn parse_c2d_message(properties: &str, payload: Vec<u8>) -> Message {
    let mut message = Message::new(payload);

    let property_tuples =
        serde_urlencoded::from_str::<Vec<(String, String)>>(properties).unwrap_or_else(|err| {
            warn!("Could not decode message properties {:?}: {}", properties, err);
            Vec::new()
        });
    for (key, value) in property_tuples {
        if key.starts_with("$.") {
            message.system_properties.insert(key, value);
        } else {
            message.properties.insert(key, value);
        }
    }

    message
}

fn build_topic_name(base_topic: &str, message: &Message) -> String {
    let capacity = message.system_properties.len() + message.properties.len();
    let mut props = HashMap::with_capacity(capacity);
    props.extend(message.system_properties.iter());
    props.extend(message.properties.iter());

    // Serializing into base_topic would put an extra '&' before the pairs
    let encoded = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(props.iter())
        .finish();
    format!("{}{}", base_topic, encoded)
}

/// Builds [`IoTHubDeviceClient`]s for provisioned devices authenticating with a symmetric key
#[derive(Debug, Clone)]
pub struct MqttDeviceClientFactory {
    device_key: String,
}

impl MqttDeviceClientFactory {
    /// `device_key` is the key of the device, derived already for group enrollments
    pub fn new(device_key: impl Into<String>) -> Self {
        Self {
            device_key: device_key.into(),
        }
    }
}

#[async_trait]
impl DeviceClientFactory for MqttDeviceClientFactory {
    type Client = IoTHubDeviceClient;
    type Error = crate::ManagerError;

    async fn create_from_identity(
        &self,
        hub_uri: &str,
        device_id: &str,
        transport: DeviceTransport,
    ) -> crate::Result<IoTHubDeviceClient> {
        if transport != DeviceTransport::Mqtt {
            return Err(TransportError::UnsupportedDeviceTransport(transport).into());
        }

        let token_source = DeviceKeyTokenSource::new(hub_uri, device_id, &self.device_key)?;
        IoTHubDeviceClient::connect(hub_uri, device_id, &token_source).await
    }
}
