use thiserror::Error;

use crate::{KmsBackend, KmsKeyId};

/// Errors surfaced by [`KmsProvider`](crate::KmsProvider) implementations.
#[derive(Error, Debug)]
pub enum KmsError {
    /// The referenced key does not exist (or was deleted).
    #[error("KMS key not found: {0}")]
    KeyNotFound(KmsKeyId),

    /// The key exists but is disabled, destroyed or pending deletion.
    #[error("KMS key is disabled: {0}")]
    KeyDisabled(KmsKeyId),

    /// No key id was given and the backend has no default key.
    #[error("No default KMS key is available")]
    NoDefaultKey,

    /// The key exists but its spec does not allow the requested operation.
    #[error("KMS key {key_id} cannot be used to {operation}")]
    KeyUsage {
        /// The key that was referenced
        key_id: KmsKeyId,
        /// The operation that was attempted
        operation: &'static str,
    },

    /// Ciphertext could not be decrypted under the referenced key.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// The backend has no decryption capability.
    #[error("The {backend} KMS backend does not support decryption")]
    DecryptUnsupported {
        /// The backend that was asked to decrypt
        backend: KmsBackend,
    },

    /// The backend could not be reached or asked us to back off.
    #[error("KMS unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the request for a reason not covered above.
    #[error("KMS request failed ({code}): {message}")]
    Backend {
        /// Backend-specific error code
        code: String,
        /// Backend-provided message
        message: String,
    },

    /// The backend replied with something we could not interpret.
    #[error("Invalid KMS response: {0}")]
    InvalidResponse(String),

    /// Provider configuration is missing or malformed.
    #[error("Invalid KMS configuration: {0}")]
    Configuration(String),
}

impl KmsError {
    /// Whether retrying the same request later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, KmsError::Unavailable(_))
    }

    /// Decryption reports a missing or unusable key as a decryption failure.
    pub(crate) fn on_decrypt(self) -> Self {
        match self {
            KmsError::KeyNotFound(key_id) => {
                KmsError::Decryption(format!("no usable key {key_id}"))
            }
            KmsError::KeyDisabled(key_id) => {
                KmsError::Decryption(format!("key {key_id} is disabled"))
            }
            other => other,
        }
    }
}

impl From<reqwest::Error> for KmsError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_connect() || error.is_timeout() {
            KmsError::Unavailable(error.to_string())
        } else if error.is_decode() {
            KmsError::InvalidResponse(error.to_string())
        } else {
            KmsError::Backend {
                code: "transport".into(),
                message: error.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for KmsError {
    fn from(error: serde_json::Error) -> Self {
        KmsError::InvalidResponse(error.to_string())
    }
}
