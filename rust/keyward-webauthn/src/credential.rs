//! Ceremony inputs: the `PublicKeyCredential` JSON a browser posts back, the
//! credential record a relying party keeps, and the challenge it issued.

use chrono::{DateTime, Utc};
use keyward_common::{Clock, base64url_encode, serde_base64url};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::CoseAlgorithm;

/// Bytes of randomness in a generated challenge.
pub const CHALLENGE_LEN: usize = 32;

/// How an authenticator can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticatorTransport {
    /// USB
    Usb,
    /// NFC
    Nfc,
    /// Bluetooth Low Energy
    Ble,
    /// Smart card
    SmartCard,
    /// Cross-device (caBLE / hybrid)
    Hybrid,
    /// Platform authenticator
    Internal,
    /// Anything newer than this list
    #[serde(other)]
    Unknown,
}

/// `AuthenticatorAssertionResponse` in its JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResponse {
    /// base64url `clientDataJSON`
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    /// base64url authenticator data
    pub authenticator_data: String,
    /// base64url signature
    pub signature: String,
    /// base64url user handle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<String>,
}

/// A `PublicKeyCredential` returned by `navigator.credentials.get()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationCredential {
    /// base64url credential id
    pub id: String,
    /// base64url credential id, as raw bytes on the client
    pub raw_id: String,
    /// The assertion
    pub response: AssertionResponse,
    /// Always `public-key`
    #[serde(rename = "type", default = "public_key_type")]
    pub ty: String,
}

/// `AuthenticatorAttestationResponse` in its JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationResponse {
    /// base64url `clientDataJSON`
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    /// base64url CBOR attestation object
    pub attestation_object: String,
    /// Transports the authenticator reported
    #[serde(default)]
    pub transports: Vec<AuthenticatorTransport>,
}

/// A `PublicKeyCredential` returned by `navigator.credentials.create()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationCredential {
    /// base64url credential id
    pub id: String,
    /// base64url credential id, as raw bytes on the client
    pub raw_id: String,
    /// The attestation
    pub response: AttestationResponse,
    /// Always `public-key`
    #[serde(rename = "type", default = "public_key_type")]
    pub ty: String,
}

fn public_key_type() -> String {
    "public-key".into()
}

/// What a relying party persists per registered credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredential {
    /// base64url credential id
    pub credential_id: String,
    /// Raw public key (see [`CoseKey::to_public_key_bytes`](crate::CoseKey::to_public_key_bytes))
    #[serde(with = "serde_base64url")]
    pub public_key: Vec<u8>,
    /// Signature algorithm of `public_key`
    pub algorithm: CoseAlgorithm,
    /// Last accepted signature counter
    pub counter: u32,
    /// Transports reported at registration
    #[serde(default)]
    pub transports: Vec<AuthenticatorTransport>,
}

impl std::fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCredential")
            .field("credential_id", &self.credential_id)
            .field("algorithm", &self.algorithm)
            .field("counter", &self.counter)
            .field("transports", &self.transports)
            .finish_non_exhaustive()
    }
}

/// A challenge issued for one ceremony.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// base64url random bytes
    pub challenge: String,
    /// Origin the ceremony must come from
    pub origin: String,
    /// Relying party id; the host of the expected origin when empty
    #[serde(default)]
    pub rp_id: String,
    /// After this instant the challenge is rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Challenge {
    /// Issue a fresh random challenge, valid for `ttl` when one is given.
    pub fn generate(
        origin: impl Into<String>,
        rp_id: impl Into<String>,
        ttl: Option<Duration>,
        clock: &dyn Clock,
    ) -> Self {
        let mut bytes = [0u8; CHALLENGE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);

        let expires_at = ttl.and_then(|ttl| {
            let ttl = chrono::Duration::from_std(ttl).ok()?;
            clock.now().checked_add_signed(ttl)
        });

        Self {
            challenge: base64url_encode(bytes),
            origin: origin.into(),
            rp_id: rp_id.into(),
            expires_at,
        }
    }

    /// Whether the challenge has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}
