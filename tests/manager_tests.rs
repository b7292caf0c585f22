mod common;

use std::time::Duration;

use common::{FakeConnector, FakeFactory, Outcome};
use iothub_client_manager::{
    register_device, DeviceAssignment, DeviceTransport, IoTHubClientManager, ManagerBuilderError,
    ManagerConfig, ManagerError, ProvisioningTransport, RegistrationFailure, RegistrationOptions,
};

const HUB: &str = "myhub.azure-devices.net";

fn manager(
    connector: &FakeConnector,
    factory: &FakeFactory,
) -> IoTHubClientManager<FakeConnector, FakeFactory> {
    IoTHubClientManager::builder()
        .connector(connector.clone())
        .device_client_factory(factory.clone())
        .registration_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[tokio::test]
async fn assigned_device_gets_a_client() {
    let connector = FakeConnector::new(Outcome::Assign(HUB, "dev1"));
    let factory = FakeFactory::default();

    let client = manager(&connector, &factory)
        .create_device_client("abc", DeviceTransport::Mqtt)
        .await
        .unwrap();

    assert_eq!(HUB, client.hub_uri);
    assert_eq!("dev1", client.device_id);
    assert_eq!(
        vec![(
            "global.azure-devices-provisioning.net".to_owned(),
            "abc".to_owned(),
            ProvisioningTransport::Mqtt
        )],
        connector.opened()
    );
    assert_eq!(
        vec![(HUB.to_owned(), "dev1".to_owned(), DeviceTransport::Mqtt)],
        factory.created()
    );
    assert_eq!(1, connector.destroyed());
}

#[tokio::test]
async fn provisioning_uses_the_matching_transport() {
    let connector = FakeConnector::new(Outcome::Assign(HUB, "dev1"));
    let factory = FakeFactory::default();

    let client = manager(&connector, &factory)
        .create_device_client("abc", DeviceTransport::AmqpWebSocket)
        .await
        .unwrap();

    assert_eq!(DeviceTransport::AmqpWebSocket, client.transport);
    assert_eq!(ProvisioningTransport::AmqpWebSocket, connector.opened()[0].2);
}

#[tokio::test]
async fn configured_endpoint_is_used() {
    let connector = FakeConnector::new(Outcome::Assign(HUB, "dev1"));
    let factory = FakeFactory::default();
    let manager = IoTHubClientManager::builder()
        .connector(connector.clone())
        .device_client_factory(factory)
        .provisioning_endpoint("dps.example.net")
        .build()
        .unwrap();

    manager
        .create_device_client("abc", DeviceTransport::Mqtt)
        .await
        .unwrap();

    assert_eq!("dps.example.net", connector.opened()[0].0);
}

#[tokio::test]
async fn error_state_destroys_session_once() {
    let failure = RegistrationFailure::Status {
        status: 401,
        message: "unauthorized".to_owned(),
    };
    let connector = FakeConnector::new(Outcome::Fail(failure.clone()));
    let factory = FakeFactory::default();

    let err = manager(&connector, &factory)
        .create_device_client("abc", DeviceTransport::Mqtt)
        .await
        .unwrap_err();

    assert!(matches!(err, ManagerError::RegistrationFailed(f) if f == failure));
    assert_eq!(1, connector.destroyed());
    assert!(factory.created().is_empty());
}

#[tokio::test]
async fn empty_scope_is_rejected_before_provisioning() {
    let connector = FakeConnector::new(Outcome::Assign(HUB, "dev1"));
    let factory = FakeFactory::default();

    let err = manager(&connector, &factory)
        .create_device_client("", DeviceTransport::Mqtt)
        .await
        .unwrap_err();

    assert!(matches!(err, ManagerError::InvalidArgument("scope_id")));
    assert!(connector.opened().is_empty());
    assert_eq!(0, connector.destroyed());
}

#[tokio::test]
async fn http_has_no_provisioning_transport() {
    let connector = FakeConnector::new(Outcome::Assign(HUB, "dev1"));
    let factory = FakeFactory::default();

    let err = manager(&connector, &factory)
        .create_device_client("abc", DeviceTransport::Http)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ManagerError::UnsupportedTransport(DeviceTransport::Http)
    ));
    assert!(connector.opened().is_empty());
}

#[tokio::test]
async fn incomplete_assignment_is_a_failure() {
    let connector = FakeConnector::new(Outcome::Assign("", "dev1"));
    let factory = FakeFactory::default();

    let err = manager(&connector, &factory)
        .create_device_client("abc", DeviceTransport::Mqtt)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ManagerError::RegistrationFailed(RegistrationFailure::IncompleteAssignment)
    ));
    assert_eq!(1, connector.destroyed());
    assert!(factory.created().is_empty());
}

#[tokio::test(start_paused = true)]
async fn silent_service_times_out() {
    let connector = FakeConnector::new(Outcome::Silent);
    let factory = FakeFactory::default();

    let err = manager(&connector, &factory)
        .create_device_client("abc", DeviceTransport::Mqtt)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ManagerError::RegistrationFailed(RegistrationFailure::TimedOut(timeout))
            if timeout == Duration::from_secs(5)
    ));
    assert_eq!(1, connector.destroyed());
    assert!(connector.work() > 3);
}

#[tokio::test]
async fn dropped_notifier_abandons_registration() {
    let connector = FakeConnector::new(Outcome::Abandon);
    let factory = FakeFactory::default();

    let err = manager(&connector, &factory)
        .create_device_client("abc", DeviceTransport::Mqtt)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ManagerError::RegistrationFailed(RegistrationFailure::Abandoned)
    ));
    assert_eq!(1, connector.destroyed());
}

#[tokio::test]
async fn rejected_register_call_destroys_session() {
    let connector = FakeConnector::new(Outcome::RejectRegister);
    let factory = FakeFactory::default();

    let err = manager(&connector, &factory)
        .create_device_client("abc", DeviceTransport::Mqtt)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ManagerError::RegistrationFailed(RegistrationFailure::Transport(ref reason))
            if reason == "register rejected"
    ));
    assert_eq!(1, connector.destroyed());
    assert_eq!(0, connector.work());
}

#[tokio::test]
async fn open_failure_is_reported_with_cause() {
    let connector = FakeConnector::refusing();
    let factory = FakeFactory::default();

    let err = manager(&connector, &factory)
        .create_device_client("abc", DeviceTransport::Mqtt)
        .await
        .unwrap_err();

    assert!(matches!(err, ManagerError::SessionCreateFailed(_)));
    assert_eq!(
        "failed to open provisioning session: endpoint unreachable",
        err.to_string()
    );
    assert_eq!(0, connector.destroyed());
}

#[tokio::test]
async fn factory_failure_is_reported_with_cause() {
    let connector = FakeConnector::new(Outcome::Assign(HUB, "dev1"));
    let factory = FakeFactory::refusing();

    let err = manager(&connector, &factory)
        .create_device_client("abc", DeviceTransport::Mqtt)
        .await
        .unwrap_err();

    assert!(matches!(err, ManagerError::ClientCreateFailed(_)));
    assert_eq!(1, factory.created().len());
    assert_eq!(1, connector.destroyed());
}

#[tokio::test]
async fn placeholders_are_not_implemented() {
    let connector = FakeConnector::new(Outcome::Assign(HUB, "dev1"));
    let factory = FakeFactory::default();
    let manager = manager(&connector, &factory);

    let err = manager
        .create_client_async("abc", DeviceTransport::Mqtt)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::NotImplemented("create_client_async")));

    let err = manager
        .create_convenience_client("abc", DeviceTransport::Mqtt)
        .unwrap_err();
    assert!(matches!(
        err,
        ManagerError::NotImplemented("create_convenience_client")
    ));

    let err = manager
        .create_convenience_client_async("", DeviceTransport::Mqtt)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::InvalidArgument("scope_id")));

    assert!(connector.opened().is_empty());
    assert!(factory.created().is_empty());
}

#[tokio::test]
async fn register_device_reports_assignment() {
    let connector = FakeConnector::new(Outcome::Assign(HUB, "dev1"));

    let assignment = register_device(
        &connector,
        "global.azure-devices-provisioning.net",
        "abc",
        ProvisioningTransport::Mqtt,
        &RegistrationOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(DeviceAssignment::new(HUB, "dev1"), assignment);
    assert_eq!(1, connector.destroyed());
}

#[test]
fn builder_validates_settings() {
    let build = |config: ManagerConfig| {
        IoTHubClientManager::builder()
            .connector(FakeConnector::new(Outcome::Silent))
            .device_client_factory(FakeFactory::default())
            .config(config)
            .build()
            .map(|_| ())
    };

    assert_eq!(Ok(()), build(ManagerConfig::default()));
    assert_eq!(
        Err(ManagerBuilderError::ValidationError("provisioning_endpoint")),
        build(ManagerConfig {
            provisioning_endpoint: String::new(),
            ..Default::default()
        })
    );
    assert_eq!(
        Err(ManagerBuilderError::ValidationError("pump_interval")),
        build(ManagerConfig {
            pump_interval_ms: 0,
            ..Default::default()
        })
    );
    assert_eq!(
        Err(ManagerBuilderError::ValidationError("registration_timeout")),
        build(ManagerConfig {
            registration_timeout_secs: 0,
            ..Default::default()
        })
    );
}

#[tokio::test]
async fn register_device_rejects_zero_pump_interval() {
    let connector = FakeConnector::new(Outcome::Assign(HUB, "dev1"));
    let options = RegistrationOptions {
        pump_interval: Duration::ZERO,
        timeout: Duration::from_secs(5),
    };

    let err = register_device(
        &connector,
        "global.azure-devices-provisioning.net",
        "abc",
        ProvisioningTransport::Mqtt,
        &options,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ManagerError::InvalidArgument("pump_interval")));
    assert!(connector.opened().is_empty());
    assert_eq!(0, connector.destroyed());
}

#[tokio::test]
async fn register_device_rejects_zero_timeout() {
    let connector = FakeConnector::new(Outcome::Assign(HUB, "dev1"));
    let options = RegistrationOptions {
        pump_interval: Duration::from_millis(10),
        timeout: Duration::ZERO,
    };

    let err = register_device(
        &connector,
        "global.azure-devices-provisioning.net",
        "abc",
        ProvisioningTransport::Mqtt,
        &options,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        ManagerError::InvalidArgument("registration_timeout")
    ));
    assert!(connector.opened().is_empty());
}

#[tokio::test]
async fn register_device_rejects_empty_scope() {
    let connector = FakeConnector::new(Outcome::Assign(HUB, "dev1"));

    let err = register_device(
        &connector,
        "global.azure-devices-provisioning.net",
        "",
        ProvisioningTransport::Mqtt,
        &RegistrationOptions::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ManagerError::InvalidArgument("scope_id")));
    assert!(connector.opened().is_empty());
    assert_eq!(0, connector.destroyed());
}

#[tokio::test]
async fn unvalidated_config_with_zero_interval_is_an_error() {
    let connector = FakeConnector::new(Outcome::Assign(HUB, "dev1"));
    let factory = FakeFactory::default();
    let config: ManagerConfig = serde_json::from_str(r#"{"pump_interval_ms": 0}"#).unwrap();
    let manager = IoTHubClientManager::new(connector.clone(), factory.clone(), config);

    let err = manager
        .create_device_client("abc", DeviceTransport::Mqtt)
        .await
        .unwrap_err();

    assert!(matches!(err, ManagerError::InvalidArgument("pump_interval")));
    assert!(connector.opened().is_empty());
    assert!(factory.created().is_empty());
}

#[test]
fn builder_keeps_sub_second_durations() {
    let manager = IoTHubClientManager::builder()
        .connector(FakeConnector::new(Outcome::Silent))
        .device_client_factory(FakeFactory::default())
        .pump_interval(Duration::from_micros(500))
        .registration_timeout(Duration::from_millis(1500))
        .build()
        .unwrap();

    assert_eq!(
        &RegistrationOptions {
            pump_interval: Duration::from_micros(500),
            timeout: Duration::from_millis(1500),
        },
        manager.registration_options()
    );

    let manager = IoTHubClientManager::builder()
        .connector(FakeConnector::new(Outcome::Silent))
        .device_client_factory(FakeFactory::default())
        .registration_timeout(Duration::from_millis(500))
        .config(ManagerConfig::default())
        .build()
        .unwrap();
    assert_eq!(
        Duration::from_millis(500),
        manager.registration_options().timeout
    );

    let zero = IoTHubClientManager::builder()
        .connector(FakeConnector::new(Outcome::Silent))
        .device_client_factory(FakeFactory::default())
        .registration_timeout(Duration::ZERO)
        .build()
        .map(|_| ());
    assert_eq!(
        Err(ManagerBuilderError::ValidationError("registration_timeout")),
        zero
    );
}

#[tokio::test(start_paused = true)]
async fn sub_second_timeout_is_honoured() {
    let connector = FakeConnector::new(Outcome::Silent);
    let manager = IoTHubClientManager::builder()
        .connector(connector.clone())
        .device_client_factory(FakeFactory::default())
        .registration_timeout(Duration::from_millis(250))
        .build()
        .unwrap();

    let err = manager
        .create_device_client("abc", DeviceTransport::Mqtt)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ManagerError::RegistrationFailed(RegistrationFailure::TimedOut(timeout))
            if timeout == Duration::from_millis(250)
    ));
    assert_eq!(1, connector.destroyed());
}
