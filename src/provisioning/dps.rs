//! Device Provisioning Service over MQTT with symmetric key attestation

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::time::Instant;

use super::{ProvisioningConnector, ProvisioningSession, RegistrationNotifier, RegistrationState};
use crate::connection::{ConnectOptions, Inbound, MqttConnection};
use crate::error::{RegistrationFailure, TransportError};
use crate::token::generate_registration_sas;
use crate::transport::ProvisioningTransport;

const DPS_API_VERSION: &str = "api-version=2019-03-31";
const KEEP_ALIVE: u16 = 60;

const RESPONSE_TOPIC_FILTER: &str = "$dps/registrations/res/#";
const RESPONSE_TOPIC_PREFIX: &str = "$dps/registrations/res/";
const REQUEST_ID_PARAM: &str = "$rid";
const RETRY_AFTER_PARAM: &str = "retry-after";

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(3);

fn register_topic(request_id: u32) -> String {
    format!(
        "$dps/registrations/PUT/iotdps-register/?{}={}",
        REQUEST_ID_PARAM, request_id
    )
}

fn operation_status_topic(request_id: u32, operation_id: &str) -> String {
    format!(
        "$dps/registrations/GET/iotdps-get-operationstatus/?{}={}&operationId={}",
        REQUEST_ID_PARAM, request_id, operation_id
    )
}

/// Opens DPS sessions over MQTT for one registration id
#[derive(Debug, Clone)]
pub struct DpsMqttConnector {
    registration_id: String,
    device_key: String,
}

impl DpsMqttConnector {
    /// # Arguments
    ///
    /// * `registration_id` - The registration id of the enrollment
    /// * `device_key` - The device's symmetric key, see [`crate::SymmetricKey`]
    ///   for enrollment groups
    pub fn new(registration_id: impl Into<String>, device_key: impl Into<String>) -> Self {
        Self {
            registration_id: registration_id.into(),
            device_key: device_key.into(),
        }
    }
}

#[async_trait]
impl ProvisioningConnector for DpsMqttConnector {
    type Session = DpsMqttSession;
    type Error = TransportError;

    async fn open(
        &self,
        endpoint: &str,
        scope_id: &str,
        transport: ProvisioningTransport,
    ) -> Result<DpsMqttSession, TransportError> {
        if transport != ProvisioningTransport::Mqtt {
            return Err(TransportError::UnsupportedProvisioningTransport(transport));
        }

        let expiry = Utc::now() + chrono::Duration::days(1);
        let sas = generate_registration_sas(
            scope_id,
            &self.registration_id,
            &self.device_key,
            expiry.timestamp(),
        )?;

        let connection = MqttConnection::connect(ConnectOptions {
            host: endpoint,
            client_id: &self.registration_id,
            user_name: format!(
                "{}/registrations/{}/{}",
                scope_id, self.registration_id, DPS_API_VERSION
            ),
            password: sas,
            keep_alive: KEEP_ALIVE,
        })
        .await?;

        connection
            .writer
            .subscribe(1, &[RESPONSE_TOPIC_FILTER.to_owned()])
            .await?;

        Ok(DpsMqttSession {
            registration_id: self.registration_id.clone(),
            connection,
            progress: RegistrationProgress::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    /// A request is out, waiting for its response
    AwaitingResponse,
    /// Assignment in progress, ask again at `poll_at`
    Assigning {
        operation_id: String,
        poll_at: Instant,
    },
    Finished,
}

/// Registration state of a session, kept apart from the connection
#[derive(Debug)]
struct RegistrationProgress {
    notifier: Option<RegistrationNotifier>,
    phase: Phase,
    last_request_id: u32,
}

impl RegistrationProgress {
    fn new() -> Self {
        Self {
            notifier: None,
            phase: Phase::Idle,
            last_request_id: 0,
        }
    }

    fn next_request_id(&mut self) -> u32 {
        self.last_request_id = self.last_request_id.wrapping_add(1);
        self.last_request_id
    }

    /// The register request went out
    fn start(&mut self, notifier: RegistrationNotifier) {
        self.notifier = Some(notifier);
        self.phase = Phase::AwaitingResponse;
    }

    fn finish(&mut self, state: RegistrationState) {
        self.phase = Phase::Finished;
        if let Some(notifier) = self.notifier.take() {
            match state {
                RegistrationState::Complete(assignment) => {
                    notifier.complete(assignment.hub_uri, assignment.device_id)
                }
                RegistrationState::Error(failure) => notifier.fail(failure),
                RegistrationState::Registering => {}
            }
        }
    }

    fn handle_inbound(&mut self, inbound: Inbound, now: Instant) {
        match inbound {
            Inbound::Publish { topic, payload } => {
                let Some(response) = ResponseTopic::parse(&topic) else {
                    trace!("Ignoring publish on {}", topic);
                    return;
                };
                trace!("Provisioning response {:?}", response);
                if response.request_id.map_or(false, |rid| rid != self.last_request_id) {
                    debug!("Ignoring response to an earlier request {:?}", response);
                    return;
                }
                match interpret_response(&response, &payload) {
                    Step::Poll {
                        operation_id,
                        after,
                    } => {
                        debug!("Assignment in progress, polling again in {:?}", after);
                        self.phase = Phase::Assigning {
                            operation_id,
                            poll_at: now + after,
                        };
                    }
                    Step::Finished(state) => self.finish(state),
                }
            }
            Inbound::PingResponse => {}
            Inbound::Closed(reason) => {
                self.finish(RegistrationState::Error(RegistrationFailure::Transport(
                    reason,
                )));
            }
        }
    }

    /// Request id and operation to ask about, once the status poll is due
    fn take_due_poll(&mut self, now: Instant) -> Option<(u32, String)> {
        let operation_id = match &self.phase {
            Phase::Assigning {
                operation_id,
                poll_at,
            } if now >= *poll_at => operation_id.clone(),
            _ => return None,
        };
        self.phase = Phase::AwaitingResponse;
        Some((self.next_request_id(), operation_id))
    }
}

/// A registration in progress with the provisioning service
#[derive(Debug)]
pub struct DpsMqttSession {
    registration_id: String,
    connection: MqttConnection,
    progress: RegistrationProgress,
}

#[async_trait]
impl ProvisioningSession for DpsMqttSession {
    type Error = TransportError;

    async fn register(&mut self, notifier: RegistrationNotifier) -> Result<(), TransportError> {
        let body = serde_json::json!({ "registrationId": self.registration_id }).to_string();
        let request_id = self.progress.next_request_id();

        self.connection
            .writer
            .publish(register_topic(request_id), body.into_bytes())
            .await?;

        self.progress.start(notifier);
        Ok(())
    }

    async fn do_work(&mut self) {
        while let Ok(inbound) = self.connection.incoming.try_recv() {
            self.progress.handle_inbound(inbound, Instant::now());
        }

        if let Some((request_id, operation_id)) = self.progress.take_due_poll(Instant::now()) {
            let topic = operation_status_topic(request_id, &operation_id);
            if let Err(err) = self.connection.writer.publish(topic, Vec::new()).await {
                self.progress
                    .finish(RegistrationState::Error(RegistrationFailure::Transport(
                        err.to_string(),
                    )));
            }
        }
    }

    async fn destroy(self) {
        debug!("Closing provisioning session for {}", self.registration_id);
        self.connection.close().await;
    }
}

/// Status and parameters carried in a response topic,
/// e.g. `$dps/registrations/res/202/?$rid=1&retry-after=3`
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResponseTopic {
    status: u16,
    request_id: Option<u32>,
    retry_after: Option<Duration>,
}

impl ResponseTopic {
    fn parse(topic: &str) -> Option<ResponseTopic> {
        let details = topic.strip_prefix(RESPONSE_TOPIC_PREFIX)?;
        let (status, query) = match details.split_once('/') {
            Some((status, rest)) => (status, rest.trim_start_matches('?')),
            None => (details, ""),
        };
        let status = status.parse().ok()?;

        let params = serde_urlencoded::from_str::<Vec<(String, String)>>(query).ok()?;
        let mut request_id = None;
        let mut retry_after = None;
        for (key, value) in params {
            match key.as_str() {
                REQUEST_ID_PARAM => request_id = value.parse().ok(),
                RETRY_AFTER_PARAM => retry_after = value.parse().ok().map(Duration::from_secs),
                _ => (),
            }
        }

        Some(ResponseTopic {
            status,
            request_id,
            retry_after,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationStatus {
    operation_id: Option<String>,
    status: Option<String>,
    registration_state: Option<DeviceRegistrationResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceRegistrationResult {
    assigned_hub: Option<String>,
    device_id: Option<String>,
    status: Option<String>,
    error_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceError {
    message: Option<String>,
}

/// What a response means for the registration
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Poll {
        operation_id: String,
        after: Duration,
    },
    Finished(RegistrationState),
}

fn failed(failure: RegistrationFailure) -> Step {
    Step::Finished(RegistrationState::Error(failure))
}

fn interpret_response(response: &ResponseTopic, payload: &[u8]) -> Step {
    if response.status >= 300 {
        let error: ServiceError = serde_json::from_slice(payload).unwrap_or_default();
        return failed(RegistrationFailure::Status {
            status: response.status,
            message: error.message.unwrap_or_default(),
        });
    }

    let reply: OperationStatus = match serde_json::from_slice(payload) {
        Ok(reply) => reply,
        Err(err) => return failed(RegistrationFailure::MalformedResponse(err.to_string())),
    };

    // DPS reports the assignment status both at the top level and in registrationState
    let status = reply
        .status
        .clone()
        .or_else(|| {
            reply
                .registration_state
                .as_ref()
                .and_then(|state| state.status.clone())
        })
        .unwrap_or_default();

    match status.as_str() {
        "assigning" | "unassigned" => match reply.operation_id {
            Some(operation_id) => Step::Poll {
                operation_id,
                after: response.retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
            },
            None => failed(RegistrationFailure::MalformedResponse(
                "reply is missing operationId".to_owned(),
            )),
        },
        "assigned" => {
            let state = reply.registration_state.unwrap_or_default();
            Step::Finished(RegistrationState::Complete(super::DeviceAssignment::new(
                state.assigned_hub.unwrap_or_default(),
                state.device_id.unwrap_or_default(),
            )))
        }
        "failed" => failed(RegistrationFailure::AssignmentFailed(
            reply
                .registration_state
                .and_then(|state| state.error_message)
                .unwrap_or_default(),
        )),
        "disabled" => failed(RegistrationFailure::Disabled),
        other => failed(RegistrationFailure::MalformedResponse(format!(
            "unknown registration status {:?}",
            other
        ))),
    }
}
