//! Registration and authentication ceremony verification.
//!
//! Both ceremonies are pure functions of their inputs and the clock: nothing
//! is persisted here. Callers store the credential returned by a successful
//! registration and the counter returned by a successful authentication.
//! Checks run in a fixed order and stop at the first failure, so a request
//! with the wrong origin never reaches signature verification.

use keyward_common::{Clock, SystemClock, base64url_decode, base64url_encode};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::{
    Aaguid, AttestationObject, AuthenticationCredential, AuthenticatorData,
    AuthenticatorTransport, Challenge, CollectedClientData, CoseAlgorithm, CoseKey,
    RegistrationCredential, StoredCredential, VerificationError,
    client_data::{TYPE_CREATE, TYPE_GET},
};

/// Policy knobs shared by both ceremonies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifierOptions {
    /// Reject ceremonies without the user-verified flag
    pub require_user_verification: bool,
}

/// Outcome of [`WebAuthnVerifier::verify_authentication`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationVerification {
    /// Whether every check passed
    pub success: bool,
    /// Counter to persist on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_counter: Option<u32>,
    /// Why verification failed
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "display")]
    pub error: Option<VerificationError>,
}

impl AuthenticationVerification {
    fn passed(new_counter: u32) -> Self {
        Self {
            success: true,
            new_counter: Some(new_counter),
            error: None,
        }
    }

    fn failed(error: VerificationError) -> Self {
        Self {
            success: false,
            new_counter: None,
            error: Some(error),
        }
    }

    /// The new counter, or the reason verification failed.
    pub fn into_result(self) -> Result<u32, VerificationError> {
        match (self.new_counter, self.error) {
            (_, Some(error)) => Err(error),
            (Some(counter), None) => Ok(counter),
            (None, None) => Err(VerificationError::InvalidCounter),
        }
    }
}

/// Outcome of [`WebAuthnVerifier::verify_registration`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationVerification {
    /// Whether every check passed
    pub success: bool,
    /// base64url credential id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<String>,
    /// Raw public key to store
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "base64url")]
    pub public_key: Option<Vec<u8>>,
    /// Algorithm of `public_key`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<CoseAlgorithm>,
    /// Initial signature counter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter: Option<u32>,
    /// Authenticator model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aaguid: Option<Aaguid>,
    /// Attestation statement format, reported but not evaluated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation_format: Option<String>,
    /// Whether the credential is eligible for backup (synced passkey)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_eligible: Option<bool>,
    /// Transports reported by the client
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<AuthenticatorTransport>,
    /// Why verification failed
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "display")]
    pub error: Option<VerificationError>,
}

impl RegistrationVerification {
    fn failed(error: VerificationError) -> Self {
        Self {
            success: false,
            credential_id: None,
            public_key: None,
            algorithm: None,
            counter: None,
            aaguid: None,
            attestation_format: None,
            backup_eligible: None,
            transports: Vec::new(),
            error: Some(error),
        }
    }

    /// The record to persist for a successful registration.
    pub fn into_stored_credential(self) -> Result<StoredCredential, VerificationError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        match (self.credential_id, self.public_key, self.algorithm, self.counter) {
            (Some(credential_id), Some(public_key), Some(algorithm), Some(counter)) => {
                Ok(StoredCredential {
                    credential_id,
                    public_key,
                    algorithm,
                    counter,
                    transports: self.transports,
                })
            }
            _ => Err(VerificationError::MissingAttestedCredentialData),
        }
    }
}

fn display<S: serde::Serializer>(
    error: &Option<VerificationError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.collect_str(error),
        None => serializer.serialize_none(),
    }
}

fn base64url<S: serde::Serializer>(
    bytes: &Option<Vec<u8>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(bytes) => serializer.serialize_str(&base64url_encode(bytes)),
        None => serializer.serialize_none(),
    }
}

/// Verifies WebAuthn ceremonies for one relying party policy.
#[derive(Debug, Clone)]
pub struct WebAuthnVerifier {
    options: VerifierOptions,
    clock: Arc<dyn Clock>,
}

impl Default for WebAuthnVerifier {
    fn default() -> Self {
        Self::new(VerifierOptions::default())
    }
}

impl WebAuthnVerifier {
    /// A verifier reading the system clock.
    pub fn new(options: VerifierOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// A verifier reading `clock` for challenge expiry.
    pub fn with_clock(options: VerifierOptions, clock: Arc<dyn Clock>) -> Self {
        Self { options, clock }
    }

    /// The active policy.
    pub fn options(&self) -> VerifierOptions {
        self.options
    }

    /// Verify an authentication assertion against a stored credential.
    ///
    /// On success the returned counter must be persisted by the caller;
    /// later assertions are only accepted with a strictly greater counter.
    #[tracing::instrument(skip_all, fields(credential_id = %credential.id))]
    pub fn verify_authentication(
        &self,
        credential: &AuthenticationCredential,
        stored: &StoredCredential,
        challenge: &Challenge,
        expected_origin: &str,
    ) -> AuthenticationVerification {
        match self.check_authentication(credential, stored, challenge, expected_origin) {
            Ok(counter) => {
                tracing::debug!(counter, "Authentication verified");
                AuthenticationVerification::passed(counter)
            }
            Err(error) => {
                tracing::debug!(%error, "Authentication rejected");
                AuthenticationVerification::failed(error)
            }
        }
    }

    /// Verify a registration attestation and extract the credential to
    /// store.
    #[tracing::instrument(skip_all, fields(credential_id = %credential.id))]
    pub fn verify_registration(
        &self,
        credential: &RegistrationCredential,
        challenge: &Challenge,
        expected_origin: &str,
    ) -> RegistrationVerification {
        match self.check_registration(credential, challenge, expected_origin) {
            Ok(verification) => {
                tracing::debug!(
                    format = verification.attestation_format.as_deref(),
                    "Registration verified"
                );
                verification
            }
            Err(error) => {
                tracing::debug!(%error, "Registration rejected");
                RegistrationVerification::failed(error)
            }
        }
    }

    fn check_authentication(
        &self,
        credential: &AuthenticationCredential,
        stored: &StoredCredential,
        challenge: &Challenge,
        expected_origin: &str,
    ) -> Result<u32, VerificationError> {
        if credential.id != stored.credential_id {
            return Err(VerificationError::CredentialIdMismatch);
        }

        let response = &credential.response;
        let authenticator_data = decode(&response.authenticator_data, "authenticatorData")?;
        let client_data_json = decode(&response.client_data_json, "clientDataJSON")?;
        let signature = decode(&response.signature, "signature")?;

        self.check_client_data(&client_data_json, TYPE_GET, challenge, expected_origin)?;

        let data = AuthenticatorData::parse(&authenticator_data)?;
        self.check_authenticator_data(&data, challenge, expected_origin)?;

        if data.counter <= stored.counter {
            return Err(VerificationError::InvalidCounter);
        }

        let key = CoseKey::from_public_key_bytes(stored.algorithm, &stored.public_key)?;
        let mut signed = authenticator_data;
        signed.extend_from_slice(&Sha256::digest(&client_data_json));
        key.verify(&signed, &signature)?;

        Ok(data.counter)
    }

    fn check_registration(
        &self,
        credential: &RegistrationCredential,
        challenge: &Challenge,
        expected_origin: &str,
    ) -> Result<RegistrationVerification, VerificationError> {
        let response = &credential.response;
        let raw_id = decode(&credential.raw_id, "rawId")?;
        let client_data_json = decode(&response.client_data_json, "clientDataJSON")?;
        let attestation_object = decode(&response.attestation_object, "attestationObject")?;

        self.check_client_data(&client_data_json, TYPE_CREATE, challenge, expected_origin)?;

        let attestation = AttestationObject::from_cbor(&attestation_object)?;
        let data = AuthenticatorData::parse(&attestation.auth_data)?;
        self.check_authenticator_data(&data, challenge, expected_origin)?;

        let attested = data
            .attested_credential
            .ok_or(VerificationError::MissingAttestedCredentialData)?;
        if attested.credential_id != raw_id {
            return Err(VerificationError::CredentialIdMismatch);
        }

        Ok(RegistrationVerification {
            success: true,
            credential_id: Some(base64url_encode(&attested.credential_id)),
            public_key: Some(attested.public_key.to_public_key_bytes()?),
            algorithm: Some(attested.public_key.algorithm()),
            counter: Some(data.counter),
            aaguid: Some(attested.aaguid),
            attestation_format: Some(attestation.fmt),
            backup_eligible: Some(data.flags.backup_eligible()),
            transports: response.transports.clone(),
            error: None,
        })
    }

    fn check_client_data(
        &self,
        client_data_json: &[u8],
        expected_type: &'static str,
        challenge: &Challenge,
        expected_origin: &str,
    ) -> Result<(), VerificationError> {
        let client_data = CollectedClientData::from_json(client_data_json)?;
        client_data.check_type(expected_type)?;
        client_data.check_challenge(&challenge.challenge)?;
        if challenge.is_expired(self.clock.now()) {
            return Err(VerificationError::ChallengeExpired);
        }
        client_data.check_origin(expected_origin)
    }

    fn check_authenticator_data(
        &self,
        data: &AuthenticatorData,
        challenge: &Challenge,
        expected_origin: &str,
    ) -> Result<(), VerificationError> {
        let expected = rp_id_hash(challenge, expected_origin)?;
        if !bool::from(data.rp_id_hash.as_slice().ct_eq(expected.as_slice())) {
            return Err(VerificationError::RpIdHashMismatch);
        }
        if !data.flags.user_present() {
            return Err(VerificationError::UserNotPresent);
        }
        if self.options.require_user_verification && !data.flags.user_verified() {
            return Err(VerificationError::UserNotVerified);
        }
        Ok(())
    }
}

/// SHA-256 of the RP ID, falling back to the host of the expected origin.
fn rp_id_hash(challenge: &Challenge, expected_origin: &str) -> Result<[u8; 32], VerificationError> {
    let digest = if challenge.rp_id.is_empty() {
        let origin =
            url::Url::parse(expected_origin).map_err(|_| VerificationError::OriginMismatch)?;
        let host = origin.host_str().ok_or(VerificationError::OriginMismatch)?;
        Sha256::digest(host.as_bytes())
    } else {
        Sha256::digest(challenge.rp_id.as_bytes())
    };
    Ok(digest.into())
}

fn decode(value: &str, field: &'static str) -> Result<Vec<u8>, VerificationError> {
    base64url_decode(value).map_err(|_| VerificationError::Encoding { field })
}
