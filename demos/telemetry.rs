use std::time::Duration;

use iothub_client_manager::{
    parse_connection_string, DeviceKeyTokenSource, IoTHubDeviceClient, Message,
};
use log::info;
use tokio::time;

const MESSAGE_COUNT: usize = 10;
const TIME_BETWEEN_MESSAGES: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> iothub_client_manager::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let connection_string = std::env::var("IOTHUB_DEVICE_CONNECTION_STRING").expect(
        "Set the device connection string in the IOTHUB_DEVICE_CONNECTION_STRING environment variable",
    );
    let (hub_name, device_id, key) = parse_connection_string(&connection_string)?;
    let token_source = DeviceKeyTokenSource::new(&hub_name, &device_id, &key)?;

    let mut client = IoTHubDeviceClient::connect(&hub_name, &device_id, &token_source).await?;
    info!("Initialized client for {}", client.device_id());

    let mut interval = time::interval(TIME_BETWEEN_MESSAGES);
    for count in 0..MESSAGE_COUNT {
        interval.tick().await;

        let msg = Message::builder()
            .set_body(b"test_message".to_vec())
            .set_message_id(count.to_string())
            .add_message_property("property_key".to_owned(), "property_value".to_owned())
            .build();

        client.send_message(msg).await?;
        info!("Sent message {}", count + 1);
    }

    client.disconnect().await
}
