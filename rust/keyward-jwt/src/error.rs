use keyward_kms::KmsError;
use thiserror::Error;

/// Errors raised by a [`KeyMetadataStore`](crate::KeyMetadataStore).
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached or refused the operation.
    #[error("Key metadata store unavailable: {0}")]
    Unavailable(String),

    /// A record could not be encoded or decoded.
    #[error("Failed to serialize/deserialize key metadata: {0}")]
    Serialization(String),
}

/// Errors raised by the [`JwtKeyManager`](crate::JwtKeyManager).
#[derive(Error, Debug)]
pub enum KeyManagerError {
    /// The manager could not produce a usable signing key at startup.
    #[error("Key manager initialization failed: {0}")]
    Initialization(#[source] Box<KeyManagerError>),

    /// A KMS operation failed.
    #[error(transparent)]
    Kms(#[from] KmsError),

    /// Persisting or loading key metadata failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The configuration is invalid.
    #[error("Invalid key manager configuration: {0}")]
    Configuration(String),

    /// Key material could not be derived from a record.
    #[error("Failed to derive key material for {key_id}: {reason}")]
    KeyDerivation {
        /// Record whose material could not be derived
        key_id: String,
        /// What went wrong
        reason: String,
    },

    /// There is no current signing key (e.g. after `destroy`).
    #[error("No current signing key")]
    NoCurrentKey,
}

/// Errors raised when issuing or verifying compact JWTs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The token is not three base64url segments of JSON.
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// The `kid` does not name an active key.
    #[error("Unknown or inactive signing key: {0}")]
    UnknownKey(String),

    /// The header `alg` does not match the key's algorithm.
    #[error("Token algorithm {actual} does not match key algorithm {expected}")]
    AlgorithmMismatch {
        /// Algorithm of the signing key
        expected: String,
        /// Algorithm named in the header
        actual: String,
    },

    /// The signature does not verify.
    #[error("Invalid token signature")]
    InvalidSignature,

    /// `exp` is in the past.
    #[error("Token has expired")]
    Expired,

    /// `nbf` is in the future.
    #[error("Token is not yet valid")]
    NotYetValid,

    /// Claims could not be encoded.
    #[error("Failed to encode token: {0}")]
    Encoding(String),

    /// Signing failed.
    #[error("Failed to sign token: {0}")]
    Signing(String),
}
