use std::time::Duration;

use thiserror::Error;

use crate::transport::{DeviceTransport, ProvisioningTransport};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while provisioning a device or creating its client
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManagerError {
    /// A required argument was empty
    #[error("{0} must not be empty")]
    InvalidArgument(&'static str),
    /// The device transport has no provisioning counterpart
    #[error("device transport {0} has no provisioning counterpart")]
    UnsupportedTransport(DeviceTransport),
    /// The provisioning session could not be opened
    #[error("failed to open provisioning session: {0}")]
    SessionCreateFailed(#[source] BoxError),
    /// Registration finished without a usable hub assignment
    #[error("device registration failed: {0}")]
    RegistrationFailed(#[source] RegistrationFailure),
    /// The device client library refused to build a client for the assignment
    #[error("failed to create device client: {0}")]
    ClientCreateFailed(#[source] BoxError),
    /// Entry point exists but does nothing yet
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
    /// Network or protocol failure on an established connection
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Credentials could not be turned into a token
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Why a registration did not reach a complete assignment
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationFailure {
    /// The provisioning service answered with a failing status code
    #[error("provisioning service returned status {status}: {message}")]
    Status {
        /// Status code of the response
        status: u16,
        /// Error message reported by the service, empty if none
        message: String,
    },
    /// The service accepted the request but could not assign a hub
    #[error("service could not assign the device: {0}")]
    AssignmentFailed(String),
    /// The enrollment for this device is disabled
    #[error("enrollment is disabled")]
    Disabled,
    /// The session failed to talk to the provisioning service
    #[error("transport failure: {0}")]
    Transport(String),
    /// A response could not be understood
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// Reported complete but the hub uri or device id was empty
    #[error("registration completed without a hub uri and device id")]
    IncompleteAssignment,
    /// The session dropped its completion signal without reporting
    #[error("registration was abandoned by the provisioning session")]
    Abandoned,
    /// No terminal state was reached in time
    #[error("registration did not complete within {0:?}")]
    TimedOut(Duration),
}

/// Failures of the bundled MQTT backends
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    ///
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    ///
    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),
    /// The broker answered CONNECT with a refusal
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    /// Packet could not be encoded, decoded or was unexpected
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The backend cannot speak this provisioning transport
    #[error("provisioning transport {0} is not supported by this backend")]
    UnsupportedProvisioningTransport(ProvisioningTransport),
    /// The backend cannot speak this device transport
    #[error("device transport {0} is not supported by this backend")]
    UnsupportedDeviceTransport(DeviceTransport),
    ///
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Errors building SAS tokens or reading connection strings
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The key is not valid base64
    #[error("access key is not valid base64")]
    InvalidKey,
    /// The connection string is missing a required component
    #[error("connection string is missing {0}")]
    MissingParameter(&'static str),
}

/// Result type used across the crate
pub type Result<T> = std::result::Result<T, ManagerError>;
