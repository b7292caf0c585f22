use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac, NewMac};
use sha2::Sha256;

use crate::error::TokenError;

const DEVICEID_KEY: &str = "DeviceId";
const HOSTNAME_KEY: &str = "HostName";
const SHAREDACCESSKEY_KEY: &str = "SharedAccessKey";

const FRAGMENT: &percent_encoding::AsciiSet = &percent_encoding::CONTROLS.add(b'/');

/// Produces the password presented when connecting to the hub
pub trait TokenSource {
    /// Token valid until `expiry`
    fn get(&self, expiry: &DateTime<Utc>) -> Result<String, TokenError>;
}

/// A shared access signature generated elsewhere
#[derive(Debug, Clone)]
pub struct SasTokenSource {
    sas: String,
}

impl SasTokenSource {
    ///
    pub fn new(sas: impl Into<String>) -> SasTokenSource {
        SasTokenSource { sas: sas.into() }
    }
}

impl TokenSource for SasTokenSource {
    fn get(&self, _: &DateTime<Utc>) -> Result<String, TokenError> {
        Ok(self.sas.clone())
    }
}

/// Signs hub tokens with the device's symmetric key
#[derive(Debug, Clone)]
pub struct DeviceKeyTokenSource {
    resource_uri: String,
    key: Vec<u8>,
}

impl DeviceKeyTokenSource {
    /// Fails if `key` is not base64
    pub fn new(hub: &str, device_id: &str, key: &str) -> Result<DeviceKeyTokenSource, TokenError> {
        Ok(DeviceKeyTokenSource {
            resource_uri: format!("{}/devices/{}", hub, device_id),
            key: decode_key(key)?,
        })
    }
}

impl TokenSource for DeviceKeyTokenSource {
    fn get(&self, expiry: &DateTime<Utc>) -> Result<String, TokenError> {
        let expiry_timestamp = expiry.timestamp();

        let resource_uri =
            percent_encoding::utf8_percent_encode(&self.resource_uri, FRAGMENT).to_string();
        let to_sign = format!("{}\n{}", resource_uri, expiry_timestamp);

        let sas = format!(
            "SharedAccessSignature sr={}&{}&se={}",
            resource_uri,
            sign(&self.key, &to_sign),
            expiry_timestamp
        );

        trace!("Using device key token: {}", sas);

        Ok(sas)
    }
}

/// Symmetric key attestation for a provisioning enrollment
#[derive(Debug, Clone)]
pub enum SymmetricKey {
    /// Key of an individual enrollment, used as is
    Individual(String),
    /// Key of an enrollment group, device keys are derived per registration id
    Group(String),
}

impl SymmetricKey {
    /// The key this device signs its tokens with
    pub fn device_key(&self, registration_id: &str) -> Result<String, TokenError> {
        match self {
            SymmetricKey::Individual(key) => Ok(key.clone()),
            SymmetricKey::Group(group_key) => derive_device_key(group_key, registration_id),
        }
    }
}

/// Device key for a member of an enrollment group
pub fn derive_device_key(group_key: &str, registration_id: &str) -> Result<String, TokenError> {
    let key = decode_key(group_key)?;
    Ok(base64::encode(hmac_sha256(&key, registration_id)))
}

/// Token the device presents to the provisioning service
pub fn generate_registration_sas(
    scope: &str,
    registration_id: &str,
    device_key: &str,
    expiry_timestamp: i64,
) -> Result<String, TokenError> {
    let key = decode_key(device_key)?;
    let to_sign = format!(
        "{scope}%2fregistrations%2f{registration_id}\n{expires}",
        scope = scope,
        registration_id = registration_id,
        expires = expiry_timestamp
    );

    Ok(format!(
        "SharedAccessSignature sr={scope}%2fregistrations%2f{registration_id}&{token}&se={expires}",
        scope = scope,
        registration_id = registration_id,
        token = sign(&key, &to_sign),
        expires = expiry_timestamp
    ))
}

/// Split a device connection string into hub hostname, device id and shared access key
pub fn parse_connection_string(
    connection_string: impl AsRef<str>,
) -> Result<(String, String, String), TokenError> {
    let mut key = None;
    let mut device_id = None;
    let mut hub = None;

    for part in connection_string.as_ref().split(';') {
        // Keys are base64 and may end in '='
        let (name, value) = match part.split_once('=') {
            Some(pair) => pair,
            None => continue,
        };
        match name {
            SHAREDACCESSKEY_KEY => key = Some(value),
            DEVICEID_KEY => device_id = Some(value),
            HOSTNAME_KEY => hub = Some(value),
            _ => (), // Ignore extraneous component in the connection string
        }
    }

    let hub = hub.ok_or(TokenError::MissingParameter(HOSTNAME_KEY))?;
    let device_id = device_id.ok_or(TokenError::MissingParameter(DEVICEID_KEY))?;
    let key = key.ok_or(TokenError::MissingParameter(SHAREDACCESSKEY_KEY))?;

    Ok((hub.to_owned(), device_id.to_owned(), key.to_owned()))
}

fn decode_key(key: &str) -> Result<Vec<u8>, TokenError> {
    base64::decode(key).map_err(|_| TokenError::InvalidKey)
}

fn hmac_sha256(key: &[u8], message: &str) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = Hmac::<Sha256>::new_varkey(key).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn sign(key: &[u8], message: &str) -> String {
    let signature = base64::encode(hmac_sha256(key, message));

    form_urlencoded::Serializer::new(String::new())
        .append_pair("sig", &signature)
        .finish()
}
