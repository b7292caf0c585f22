//! In-memory provisioning service and client factory

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use iothub_client_manager::{
    DeviceClientFactory, DeviceTransport, ProvisioningConnector, ProvisioningSession,
    ProvisioningTransport, RegistrationFailure, RegistrationNotifier,
};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct FakeError(pub &'static str);

/// What the fake provisioning service does once registration starts
#[derive(Debug, Clone)]
pub enum Outcome {
    Assign(&'static str, &'static str),
    Fail(RegistrationFailure),
    /// Never reports, the driver has to time out
    Silent,
    /// Drops the notifier without reporting
    Abandon,
    RejectRegister,
}

#[derive(Debug, Default)]
pub struct Calls {
    pub opened: Vec<(String, String, ProvisioningTransport)>,
    pub work: usize,
    pub destroyed: usize,
}

#[derive(Debug, Clone)]
pub struct FakeConnector {
    outcome: Outcome,
    refuse_open: bool,
    pub calls: Arc<Mutex<Calls>>,
}

impl FakeConnector {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            refuse_open: false,
            calls: Default::default(),
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse_open: true,
            ..Self::new(Outcome::Silent)
        }
    }

    pub fn opened(&self) -> Vec<(String, String, ProvisioningTransport)> {
        self.calls.lock().unwrap().opened.clone()
    }

    pub fn destroyed(&self) -> usize {
        self.calls.lock().unwrap().destroyed
    }

    pub fn work(&self) -> usize {
        self.calls.lock().unwrap().work
    }
}

#[async_trait]
impl ProvisioningConnector for FakeConnector {
    type Session = FakeSession;
    type Error = FakeError;

    async fn open(
        &self,
        endpoint: &str,
        scope_id: &str,
        transport: ProvisioningTransport,
    ) -> Result<FakeSession, FakeError> {
        if self.refuse_open {
            return Err(FakeError("endpoint unreachable"));
        }
        self.calls.lock().unwrap().opened.push((
            endpoint.to_owned(),
            scope_id.to_owned(),
            transport,
        ));
        Ok(FakeSession {
            outcome: self.outcome.clone(),
            notifier: None,
            calls: self.calls.clone(),
        })
    }
}

#[derive(Debug)]
pub struct FakeSession {
    outcome: Outcome,
    notifier: Option<RegistrationNotifier>,
    calls: Arc<Mutex<Calls>>,
}

#[async_trait]
impl ProvisioningSession for FakeSession {
    type Error = FakeError;

    async fn register(&mut self, notifier: RegistrationNotifier) -> Result<(), FakeError> {
        if let Outcome::RejectRegister = self.outcome {
            return Err(FakeError("register rejected"));
        }
        self.notifier = Some(notifier);
        Ok(())
    }

    async fn do_work(&mut self) {
        let work = {
            let mut calls = self.calls.lock().unwrap();
            calls.work += 1;
            calls.work
        };
        // Answer on the third pump, like a service that needs a few round trips
        if work < 3 {
            return;
        }

        match &self.outcome {
            Outcome::Assign(hub, device) => {
                if let Some(notifier) = self.notifier.take() {
                    notifier.complete(*hub, *device);
                }
            }
            Outcome::Fail(failure) => {
                if let Some(notifier) = self.notifier.take() {
                    notifier.fail(failure.clone());
                }
            }
            Outcome::Abandon => self.notifier = None,
            Outcome::Silent | Outcome::RejectRegister => (),
        }
    }

    async fn destroy(self) {
        self.calls.lock().unwrap().destroyed += 1;
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct FakeClient {
    pub hub_uri: String,
    pub device_id: String,
    pub transport: DeviceTransport,
}

#[derive(Debug, Clone, Default)]
pub struct FakeFactory {
    refuse: bool,
    pub created: Arc<Mutex<Vec<(String, String, DeviceTransport)>>>,
}

impl FakeFactory {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Default::default()
        }
    }

    pub fn created(&self) -> Vec<(String, String, DeviceTransport)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceClientFactory for FakeFactory {
    type Client = FakeClient;
    type Error = FakeError;

    async fn create_from_identity(
        &self,
        hub_uri: &str,
        device_id: &str,
        transport: DeviceTransport,
    ) -> Result<FakeClient, FakeError> {
        self.created
            .lock()
            .unwrap()
            .push((hub_uri.to_owned(), device_id.to_owned(), transport));
        if self.refuse {
            return Err(FakeError("client library refused"));
        }
        Ok(FakeClient {
            hub_uri: hub_uri.to_owned(),
            device_id: device_id.to_owned(),
            transport,
        })
    }
}
