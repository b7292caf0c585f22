#[macro_use]
extern crate log;

use std::time::Duration;

use iothub_client_manager::provisioning::dps::DpsMqttConnector;
use iothub_client_manager::{
    DeviceTransport, IoTHubClientManager, ManagerConfig, Message, MessageType,
    MqttDeviceClientFactory, SymmetricKey,
};
use serde::Deserialize;
use tokio::time;

const MESSAGES_TO_SEND: usize = 2;
const TIME_BETWEEN_MESSAGES: Duration = Duration::from_secs(2);
// Below the client's 10 s MQTT keep-alive
const PING_INTERVAL: Duration = Duration::from_secs(5);

fn default_transport() -> String {
    "mqtt".to_owned()
}

#[derive(Debug, Deserialize)]
struct DeviceConfig {
    scope_id: String,
    registration_id: String,
    symmetric_key: String,
    #[serde(default)]
    group_enrollment: bool,
    #[serde(default = "default_transport")]
    transport: String,
}

impl DeviceConfig {
    fn from_env() -> Result<Self, config::ConfigError> {
        let mut cfg = config::Config::default();
        cfg.merge(config::File::with_name("demos/config").required(false))?;
        cfg.merge(config::Environment::with_prefix("DPS"))?;
        cfg.try_into()
    }
}

fn manager_config() -> Result<ManagerConfig, config::ConfigError> {
    let mut cfg = config::Config::default();
    cfg.merge(config::Environment::with_prefix("MANAGER"))?;
    cfg.try_into()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let DeviceConfig {
        scope_id,
        registration_id,
        symmetric_key,
        group_enrollment,
        transport,
    } = DeviceConfig::from_env()?;

    let transport: DeviceTransport = transport.parse()?;
    let key = if group_enrollment {
        SymmetricKey::Group(symmetric_key)
    } else {
        SymmetricKey::Individual(symmetric_key)
    };
    let device_key = key.device_key(&registration_id)?;

    let manager = IoTHubClientManager::builder()
        .connector(DpsMqttConnector::new(&registration_id, &device_key))
        .device_client_factory(MqttDeviceClientFactory::new(device_key))
        .config(manager_config()?)
        .build()?;

    let mut client = manager.create_device_client(&scope_id, transport).await?;
    info!(
        "Provisioned {} on {}",
        client.device_id(),
        client.hub_name()
    );

    let mut receiver = client.get_receiver().await?;
    let mut interval = time::interval(TIME_BETWEEN_MESSAGES);
    let mut keep_alive = time::interval_at(time::Instant::now() + PING_INTERVAL, PING_INTERVAL);
    let mut sent = 0;
    let mut stop = false;

    while !stop {
        tokio::select! {
            _ = interval.tick(), if sent < MESSAGES_TO_SEND => {
                let msg = Message::builder()
                    .set_body(format!("Message #{}", sent).into_bytes())
                    .set_message_id(format!("{}-{}", registration_id, sent))
                    .build();
                client.send_message(msg).await?;
                sent += 1;
                info!("Sent message {} of {}", sent, MESSAGES_TO_SEND);
            }
            _ = keep_alive.tick() => client.ping().await?,
            received = receiver.recv() => match received {
                Some(MessageType::C2DMessage(msg)) => {
                    info!("Received cloud to device message {:?}, stopping", msg);
                    stop = true;
                }
                Some(MessageType::ErrorReceive(err)) => {
                    warn!("Connection failed: {}", err);
                    stop = true;
                }
                None => stop = true,
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}
