//! Registering a device with the Device Provisioning Service
//!
//! [`register_device`] opens a session through a [`ProvisioningConnector`],
//! starts the registration and pumps the session until it reports a hub
//! assignment, reports a failure, or the timeout runs out. The session is
//! destroyed before returning, whatever the outcome.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::{self, MissedTickBehavior};

use crate::error::{ManagerError, RegistrationFailure};
use crate::transport::ProvisioningTransport;

pub mod dps;

/// Provisioning endpoint shared by all public-cloud DPS instances
pub const GLOBAL_PROVISIONING_ENDPOINT: &str = "global.azure-devices-provisioning.net";

/// Hub and identity the provisioning service assigned to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAssignment {
    /// Hostname of the assigned IoT hub
    pub hub_uri: String,
    /// Device id registered in that hub
    pub device_id: String,
}

impl DeviceAssignment {
    ///
    pub fn new(hub_uri: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            hub_uri: hub_uri.into(),
            device_id: device_id.into(),
        }
    }

    /// Both the hub and the device id are known
    pub fn is_complete(&self) -> bool {
        !self.hub_uri.is_empty() && !self.device_id.is_empty()
    }
}

/// Progress of one registration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    /// Waiting on the provisioning service
    Registering,
    /// The service assigned a hub
    Complete(DeviceAssignment),
    /// The registration failed
    Error(RegistrationFailure),
}

impl RegistrationState {
    /// Complete and Error are final
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RegistrationState::Registering)
    }

    /// The assignment if this state holds a complete one
    pub fn into_assignment(self) -> Result<DeviceAssignment, RegistrationFailure> {
        match self {
            RegistrationState::Complete(assignment) if assignment.is_complete() => Ok(assignment),
            RegistrationState::Complete(_) => Err(RegistrationFailure::IncompleteAssignment),
            RegistrationState::Error(failure) => Err(failure),
            RegistrationState::Registering => Err(RegistrationFailure::Abandoned),
        }
    }
}

/// Handed to a session when registration starts. The session reports the
/// outcome through it exactly once; dropping it unreported abandons the
/// registration.
#[derive(Debug)]
pub struct RegistrationNotifier {
    tx: oneshot::Sender<RegistrationState>,
}

impl RegistrationNotifier {
    pub(crate) fn channel() -> (RegistrationNotifier, oneshot::Receiver<RegistrationState>) {
        let (tx, rx) = oneshot::channel();
        (RegistrationNotifier { tx }, rx)
    }

    /// The service assigned `device_id` on `hub_uri`
    pub fn complete(self, hub_uri: impl Into<String>, device_id: impl Into<String>) {
        self.report(RegistrationState::Complete(DeviceAssignment::new(
            hub_uri, device_id,
        )));
    }

    /// The registration failed
    pub fn fail(self, failure: RegistrationFailure) {
        self.report(RegistrationState::Error(failure));
    }

    fn report(self, state: RegistrationState) {
        debug!("Registration reached state {:?}", state);
        // The driver may already have given up on the registration
        let _ = self.tx.send(state);
    }
}

/// Opens sessions against a provisioning service
#[async_trait]
pub trait ProvisioningConnector: Send + Sync {
    /// Session type this connector opens
    type Session: ProvisioningSession;
    /// Reason a session could not be opened
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a session for `scope_id` at `endpoint` speaking `transport`
    async fn open(
        &self,
        endpoint: &str,
        scope_id: &str,
        transport: ProvisioningTransport,
    ) -> Result<Self::Session, Self::Error>;
}

/// One registration conversation with the provisioning service
#[async_trait]
pub trait ProvisioningSession: Send {
    /// Reason the registration request could not be sent
    type Error: std::error::Error + Send + Sync + 'static;

    /// Start registering; the outcome is reported through `notifier`
    async fn register(&mut self, notifier: RegistrationNotifier) -> Result<(), Self::Error>;

    /// Make whatever progress is possible without waiting
    async fn do_work(&mut self);

    /// Release the session
    async fn destroy(self);
}

/// Timing of the registration loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationOptions {
    /// Delay between two `do_work` calls
    pub pump_interval: Duration,
    /// Give up if no terminal state is reached within this time
    pub timeout: Duration,
}

impl RegistrationOptions {
    /// Both durations must be non-zero
    pub fn validate(&self) -> crate::Result<()> {
        if self.pump_interval.is_zero() {
            return Err(ManagerError::InvalidArgument("pump_interval"));
        }
        if self.timeout.is_zero() {
            return Err(ManagerError::InvalidArgument("registration_timeout"));
        }
        Ok(())
    }
}

impl Default for RegistrationOptions {
    fn default() -> Self {
        Self {
            pump_interval: Duration::from_millis(10),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Register the device in `scope_id` and wait for its hub assignment
///
/// # Arguments
///
/// * `connector` - Opens the provisioning session
/// * `endpoint` - Provisioning service hostname, usually [`GLOBAL_PROVISIONING_ENDPOINT`]
/// * `scope_id` - The DPS scope id, must not be empty
/// * `transport` - Transport the session speaks
/// * `options` - Pump interval and timeout, both non-zero
pub async fn register_device<C>(
    connector: &C,
    endpoint: &str,
    scope_id: &str,
    transport: ProvisioningTransport,
    options: &RegistrationOptions,
) -> crate::Result<DeviceAssignment>
where
    C: ProvisioningConnector,
{
    if scope_id.is_empty() {
        return Err(ManagerError::InvalidArgument("scope_id"));
    }
    options.validate()?;

    debug!(
        "Opening provisioning session with {} for scope {} over {}",
        endpoint, scope_id, transport
    );
    let mut session = connector
        .open(endpoint, scope_id, transport)
        .await
        .map_err(|err| ManagerError::SessionCreateFailed(Box::new(err)))?;

    let outcome = drive_registration(&mut session, options).await;
    session.destroy().await;

    match outcome {
        Ok(assignment) => {
            info!(
                "Device {} assigned to {}",
                assignment.device_id, assignment.hub_uri
            );
            Ok(assignment)
        }
        Err(failure) => {
            warn!("Registration in scope {} failed: {}", scope_id, failure);
            Err(ManagerError::RegistrationFailed(failure))
        }
    }
}

async fn drive_registration<S>(
    session: &mut S,
    options: &RegistrationOptions,
) -> Result<DeviceAssignment, RegistrationFailure>
where
    S: ProvisioningSession,
{
    let (notifier, mut completion) = RegistrationNotifier::channel();
    session
        .register(notifier)
        .await
        .map_err(|err| RegistrationFailure::Transport(err.to_string()))?;

    let mut state = RegistrationState::Registering;
    let mut pump = time::interval(options.pump_interval);
    pump.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let deadline = time::sleep(options.timeout);
    tokio::pin!(deadline);

    while !state.is_terminal() {
        tokio::select! {
            biased;
            reported = &mut completion => {
                state = reported
                    .unwrap_or(RegistrationState::Error(RegistrationFailure::Abandoned));
            }
            _ = &mut deadline => {
                state = RegistrationState::Error(RegistrationFailure::TimedOut(options.timeout));
            }
            _ = pump.tick() => session.do_work().await,
        }
    }

    state.into_assignment()
}
