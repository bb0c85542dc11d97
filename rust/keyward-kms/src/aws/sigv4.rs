//! AWS Signature Version 4 request signing.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use keyward_common::hex_encode;
use sha2::{Digest, Sha256};
use std::fmt::{self, Write};

use crate::{HttpRequest, KmsError};

/// Signing algorithm identifier.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Timestamp format for the `x-amz-date` header.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Long-term or temporary AWS credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    /// Access key id (`AKIA…`/`ASIA…`)
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Session token accompanying temporary credentials
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Credentials from an access key pair.
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Attach a session token.
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Read `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN` from the environment.
    pub fn from_env() -> Result<Self, KmsError> {
        let read = |name: &str| {
            std::env::var(name)
                .map_err(|_| KmsError::Configuration(format!("{name} is not set")))
        };

        Ok(Self {
            access_key_id: read("AWS_ACCESS_KEY_ID")?,
            secret_access_key: read("AWS_SECRET_ACCESS_KEY")?,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Signs requests for one region/service pair.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: AwsCredentials,
    region: String,
    service: String,
}

impl RequestSigner {
    /// Create a signer.
    pub fn new(
        credentials: AwsCredentials,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            region: region.into(),
            service: service.into(),
        }
    }

    /// Add `host`, `x-amz-date`, the optional security token and an
    /// `authorization` header to `request`, signing every header present.
    pub fn sign(&self, request: &mut HttpRequest, time: DateTime<Utc>) -> Result<(), KmsError> {
        let timestamp = time.format(TIMESTAMP_FORMAT).to_string();
        let date = &timestamp[0..8];
        let scope = format!("{}/{}/{}/aws4_request", date, self.region, self.service);

        let hostname = request
            .url
            .host_str()
            .ok_or_else(|| KmsError::Configuration("KMS endpoint has no host".into()))?;
        let host = match request.url.port() {
            Some(port) => format!("{hostname}:{port}"),
            None => hostname.to_string(),
        };

        request
            .headers
            .retain(|(name, _)| !name.eq_ignore_ascii_case("authorization"));
        request.headers.push(("host".into(), host));
        request.headers.push(("x-amz-date".into(), timestamp.clone()));
        if let Some(token) = &self.credentials.session_token {
            request
                .headers
                .push(("x-amz-security-token".into(), token.clone()));
        }

        let mut headers: Vec<(String, String)> = request
            .headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
            .collect();
        headers.sort();

        let signed_headers = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers = headers
            .iter()
            .map(|(name, value)| format!("{name}:{value}"))
            .collect::<Vec<_>>()
            .join("\n");

        let mut query: Vec<(String, String)> = request
            .url
            .query_pairs()
            .map(|(key, value)| (percent_encode(&key), percent_encode(&value)))
            .collect();
        query.sort();
        let canonical_query = query
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n\n{}\n{}",
            request.method,
            percent_encode_path(request.url.path()),
            canonical_query,
            canonical_headers,
            signed_headers,
            hex_encode(&Sha256::digest(&request.body)),
        );

        let string_to_sign = format!(
            "{ALGORITHM}\n{}\n{}\n{}",
            timestamp,
            scope,
            hex_encode(&Sha256::digest(canonical_request.as_bytes()))
        );

        let key = SigningKey::derive(
            &self.credentials.secret_access_key,
            date,
            &self.region,
            &self.service,
        );
        let signature = hex_encode(&key.sign(string_to_sign.as_bytes()));

        request.headers.push((
            "authorization".into(),
            format!(
                "{ALGORITHM} Credential={}/{}, SignedHeaders={}, Signature={}",
                self.credentials.access_key_id, scope, signed_headers, signature
            ),
        ));

        Ok(())
    }
}

/// SigV4 signing key derived from the secret key and credential scope.
struct SigningKey(Hmac<Sha256>);

impl SigningKey {
    fn derive(secret_key: &str, date: &str, region: &str, service: &str) -> Self {
        let signing_key = derive_key_bytes(secret_key, date, region, service);
        Self(Hmac::new_from_slice(&signing_key).expect("HMAC can take key of any size"))
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        let mut mac = self.0.clone();
        mac.update(message);
        mac.finalize().into_bytes().to_vec()
    }
}

fn derive_key_bytes(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let region_key = hmac_sha256(&date_key, region.as_bytes());
    let service_key = hmac_sha256(&region_key, service.as_bytes());
    hmac_sha256(&service_key, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn percent_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                let _ = write!(result, "%{byte:02X}");
            }
        }
    }
    result
}

fn percent_encode_path(path: &str) -> String {
    path.split('/')
        .map(percent_encode)
        .collect::<Vec<_>>()
        .join("/")
}
