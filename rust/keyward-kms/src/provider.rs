use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

use crate::{EncryptedData, KeySpec, KmsError, KmsKeyHandle, KmsKeyId};

/// The KMS backends this crate can talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KmsBackend {
    /// AWS KMS
    Aws,
    /// Google Cloud KMS
    Gcp,
    /// Keys derived from a local master secret
    #[default]
    Local,
    /// Process-local AES-256-GCM keys
    Memory,
}

impl fmt::Display for KmsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KmsBackend::Aws => "aws",
            KmsBackend::Gcp => "gcp",
            KmsBackend::Local => "local",
            KmsBackend::Memory => "memory",
        })
    }
}

/// A key-management service.
///
/// Implementations must be safe to share across tasks; the key manager holds
/// one behind an `Arc` and calls it from both request handlers and the
/// rotation loop.
#[async_trait]
pub trait KmsProvider: Send + Sync + fmt::Debug {
    /// Which backend this is.
    fn backend(&self) -> KmsBackend;

    /// Protect `data` under `key_id`, or under the backend's default key when
    /// `key_id` is `None`.
    async fn encrypt(
        &self,
        data: &[u8],
        key_id: Option<&KmsKeyId>,
    ) -> Result<EncryptedData, KmsError>;

    /// Create a new key. `None` means [`KeySpec::SymmetricDefault`].
    async fn generate_key(&self, spec: Option<KeySpec>) -> Result<KmsKeyHandle, KmsError>;

    /// Remove a key (or schedule its removal). Later operations referencing
    /// it fail.
    async fn delete_key(&self, key_id: &KmsKeyId) -> Result<(), KmsError>;

    /// Identifiers of the keys this backend can see.
    async fn list_keys(&self) -> Result<Vec<KmsKeyId>, KmsError>;

    /// The decryption capability, for backends that have one.
    fn decrypter(&self) -> Option<&dyn KmsDecrypt> {
        None
    }
}

/// Decryption capability of a [`KmsProvider`].
#[async_trait]
pub trait KmsDecrypt: Send + Sync {
    /// Recover the plaintext that was encrypted under `key_id`.
    ///
    /// An unknown, deleted or disabled key fails with
    /// [`KmsError::Decryption`], like malformed ciphertext.
    async fn decrypt(
        &self,
        ciphertext: &[u8],
        key_id: &KmsKeyId,
    ) -> Result<Zeroizing<Vec<u8>>, KmsError>;
}

/// Decrypt `encrypted` with `provider`, failing with
/// [`KmsError::DecryptUnsupported`] when the backend cannot decrypt.
pub async fn decrypt(
    provider: &dyn KmsProvider,
    encrypted: &EncryptedData,
) -> Result<Zeroizing<Vec<u8>>, KmsError> {
    match provider.decrypter() {
        Some(decrypter) => {
            decrypter
                .decrypt(&encrypted.ciphertext, &encrypted.key_id)
                .await
        }
        None => Err(KmsError::DecryptUnsupported {
            backend: provider.backend(),
        }),
    }
}
