//! Error types for WebAuthn ceremony verification.

use thiserror::Error;

/// Why a registration or authentication ceremony was rejected.
///
/// Verification never returns these as `Err`; they are carried in the
/// `error` field of the verification outcome. The messages are precise and
/// meant for logs. What a relying party shows its users is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// The asserted credential id is not the stored one.
    #[error("Credential ID mismatch")]
    CredentialIdMismatch,

    /// A binary field is not valid base64url.
    #[error("Invalid {field} encoding")]
    Encoding {
        /// Name of the offending field
        field: &'static str,
    },

    /// `clientDataJSON` is not the expected JSON document.
    #[error("Invalid client data: {0}")]
    InvalidClientData(String),

    /// `clientDataJSON.type` is wrong for the ceremony.
    #[error("Invalid client data type: expected {expected}, got {actual}")]
    ClientDataType {
        /// The type this ceremony requires
        expected: &'static str,
        /// The type the client reported
        actual: String,
    },

    /// The signed challenge is not the one that was issued.
    #[error("Challenge mismatch")]
    ChallengeMismatch,

    /// The issued challenge is past its expiry.
    #[error("Challenge expired")]
    ChallengeExpired,

    /// The client reported a different origin.
    #[error("Origin mismatch")]
    OriginMismatch,

    /// `authenticatorData` could not be parsed.
    #[error("Invalid authenticator data: {0}")]
    InvalidAuthenticatorData(String),

    /// The authenticator signed for a different relying party.
    #[error("RP ID hash mismatch")]
    RpIdHashMismatch,

    /// The user-present flag is not set.
    #[error("User not present")]
    UserNotPresent,

    /// User verification was required but not performed.
    #[error("User not verified")]
    UserNotVerified,

    /// The signature counter did not advance past the stored value.
    #[error("Invalid counter value")]
    InvalidCounter,

    /// A registration response carried no attested credential data.
    #[error("Attested credential data missing")]
    MissingAttestedCredentialData,

    /// `attestationObject` is not a well-formed CBOR attestation.
    #[error("Invalid attestation object: {0}")]
    InvalidAttestationObject(String),

    /// The credential public key is not a usable COSE key.
    #[error("Invalid COSE key: {0}")]
    InvalidCoseKey(String),

    /// The COSE algorithm is not one we verify.
    #[error("Unsupported COSE algorithm: {0}")]
    UnsupportedAlgorithm(i64),

    /// A stored public key could not be loaded.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// The assertion signature does not verify.
    #[error("Invalid signature")]
    InvalidSignature,
}
