use keyward_common::serde_base64url;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier of a key held by a KMS backend.
///
/// The format is backend specific: `local-…`/`mem-…` for the in-process
/// backends, a key id or ARN for AWS, a crypto key id for GCP.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KmsKeyId(String);

impl KmsKeyId {
    /// Wrap an existing key identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh identifier of the form `{prefix}-{ulid}`.
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}-{}", Ulid::new().to_string().to_lowercase()))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KmsKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KmsKeyId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for KmsKeyId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for KmsKeyId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// What kind of key [`KmsProvider::generate_key`](crate::KmsProvider::generate_key)
/// should create.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeySpec {
    /// 256-bit symmetric encryption key.
    #[default]
    SymmetricDefault,
    /// HMAC-SHA-256 key.
    #[serde(rename = "HMAC_256")]
    Hmac256,
    /// HMAC-SHA-384 key.
    #[serde(rename = "HMAC_384")]
    Hmac384,
    /// HMAC-SHA-512 key.
    #[serde(rename = "HMAC_512")]
    Hmac512,
}

impl KeySpec {
    /// Whether keys of this spec can encrypt and decrypt.
    pub fn can_encrypt(&self) -> bool {
        matches!(self, KeySpec::SymmetricDefault)
    }
}

/// Result of generating a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsKeyHandle {
    /// The new key's identifier.
    pub key_id: KmsKeyId,
    /// Public half, for backends that create asymmetric keys.
    pub public_key: Option<Vec<u8>>,
}

/// Output of [`KmsProvider::encrypt`](crate::KmsProvider::encrypt).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedData {
    /// Backend-specific ciphertext.
    #[serde(with = "serde_base64url")]
    pub ciphertext: Vec<u8>,
    /// The key the ciphertext was produced under.
    pub key_id: KmsKeyId,
}

impl fmt::Debug for EncryptedData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedData")
            .field("ciphertext", &format_args!("{} bytes", self.ciphertext.len()))
            .field("key_id", &self.key_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_prefix_and_are_unique() {
        let a = KmsKeyId::generate("mem");
        let b = KmsKeyId::generate("mem");
        assert!(a.as_str().starts_with("mem-"));
        assert_ne!(a, b);
    }

    #[test]
    fn key_spec_uses_kms_names() {
        assert_eq!(
            serde_json::to_string(&KeySpec::SymmetricDefault).unwrap(),
            "\"SYMMETRIC_DEFAULT\""
        );
        assert_eq!(
            serde_json::to_string(&KeySpec::Hmac384).unwrap(),
            "\"HMAC_384\""
        );
    }

    #[test]
    fn encrypted_data_debug_hides_ciphertext() {
        let data = EncryptedData {
            ciphertext: vec![1, 2, 3],
            key_id: "k".into(),
        };
        let debug = format!("{data:?}");
        assert!(debug.contains("3 bytes"));
        assert!(!debug.contains("[1, 2, 3]"));
    }
}
