//! KMS backend whose keys are derived from a local master secret.

use async_trait::async_trait;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

use crate::{
    EncryptedData, KeySpec, KmsBackend, KmsError, KmsKeyHandle, KmsKeyId, KmsProvider,
};

const KEY_DERIVATION_SALT: &[u8] = b"keyward/local-kms/v1";

type HmacSha256 = Hmac<Sha256>;

/// Keys derived with HKDF-SHA-256 from a master secret.
///
/// "Encryption" is an HMAC-SHA-256 tag of the input under the key's derived
/// material. The output is deterministic and one-way, which is all the key
/// manager needs to turn a random seed into protected key material. As a
/// consequence this backend exposes no [`decrypter`](KmsProvider::decrypter).
pub struct LocalKmsProvider {
    master_key: Zeroizing<Vec<u8>>,
    keys: RwLock<Vec<KmsKeyId>>,
}

impl LocalKmsProvider {
    /// Create a provider over `master_key`. Without one a random secret is
    /// drawn, so protected material does not survive a restart.
    pub fn new(master_key: Option<&[u8]>) -> Self {
        tracing::warn!("The local KMS backend is for development only and must not be used in production");

        let master_key = match master_key {
            Some(key) if !key.is_empty() => key.to_vec(),
            _ => {
                tracing::warn!("No master key configured for the local KMS backend; using a random one");
                let mut key = vec![0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut key);
                key
            }
        };

        Self {
            master_key: Zeroizing::new(master_key),
            keys: RwLock::new(Vec::new()),
        }
    }

    fn key_material(&self, key_id: &KmsKeyId) -> Result<Zeroizing<[u8; 32]>, KmsError> {
        let mut material = Zeroizing::new([0u8; 32]);
        Hkdf::<Sha256>::new(Some(KEY_DERIVATION_SALT), &self.master_key)
            .expand(key_id.as_str().as_bytes(), material.as_mut())
            .map_err(|error| KmsError::Backend {
                code: "hkdf".into(),
                message: error.to_string(),
            })?;
        Ok(material)
    }

    fn resolve(&self, key_id: Option<&KmsKeyId>) -> Result<KmsKeyId, KmsError> {
        let keys = self.keys.read();
        match key_id {
            Some(key_id) if keys.contains(key_id) => Ok(key_id.clone()),
            Some(key_id) => Err(KmsError::KeyNotFound(key_id.clone())),
            None => keys.last().cloned().ok_or(KmsError::NoDefaultKey),
        }
    }
}

impl Default for LocalKmsProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

impl fmt::Debug for LocalKmsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKmsProvider")
            .field("keys", &self.keys.read().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KmsProvider for LocalKmsProvider {
    fn backend(&self) -> KmsBackend {
        KmsBackend::Local
    }

    async fn encrypt(
        &self,
        data: &[u8],
        key_id: Option<&KmsKeyId>,
    ) -> Result<EncryptedData, KmsError> {
        let key_id = self.resolve(key_id)?;
        let material = self.key_material(&key_id)?;

        let mut mac = HmacSha256::new_from_slice(material.as_ref()).map_err(|error| {
            KmsError::Backend {
                code: "hmac".into(),
                message: error.to_string(),
            }
        })?;
        mac.update(data);

        Ok(EncryptedData {
            ciphertext: mac.finalize().into_bytes().to_vec(),
            key_id,
        })
    }

    async fn generate_key(&self, spec: Option<KeySpec>) -> Result<KmsKeyHandle, KmsError> {
        let key_id = KmsKeyId::generate("local");
        self.keys.write().push(key_id.clone());

        tracing::debug!(key_id = %key_id, spec = ?spec.unwrap_or_default(), "Generated local KMS key");

        Ok(KmsKeyHandle {
            key_id,
            public_key: None,
        })
    }

    async fn delete_key(&self, key_id: &KmsKeyId) -> Result<(), KmsError> {
        let mut keys = self.keys.write();
        let before = keys.len();
        keys.retain(|existing| existing != key_id);

        if keys.len() == before {
            return Err(KmsError::KeyNotFound(key_id.clone()));
        }

        tracing::debug!(key_id = %key_id, "Deleted local KMS key");
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<KmsKeyId>, KmsError> {
        Ok(self.keys.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decrypt;

    #[tokio::test]
    async fn encryption_is_deterministic_per_key() {
        let kms = LocalKmsProvider::new(Some(b"master"));
        let key = kms.generate_key(None).await.unwrap().key_id;

        let a = kms.encrypt(b"seed", Some(&key)).await.unwrap();
        let b = kms.encrypt(b"seed", Some(&key)).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.ciphertext.len(), 32);
    }

    #[tokio::test]
    async fn different_master_keys_produce_different_output() {
        let first = LocalKmsProvider::new(Some(b"master-one"));
        let second = LocalKmsProvider::new(Some(b"master-two"));
        let key = KmsKeyId::new("local-shared");
        first.keys.write().push(key.clone());
        second.keys.write().push(key.clone());

        let a = first.encrypt(b"seed", Some(&key)).await.unwrap();
        let b = second.encrypt(b"seed", Some(&key)).await.unwrap();
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[tokio::test]
    async fn default_key_is_the_latest_generated() {
        let kms = LocalKmsProvider::default();
        assert!(matches!(
            kms.encrypt(b"x", None).await,
            Err(KmsError::NoDefaultKey)
        ));

        kms.generate_key(None).await.unwrap();
        let latest = kms.generate_key(None).await.unwrap().key_id;
        assert_eq!(kms.encrypt(b"x", None).await.unwrap().key_id, latest);
    }

    #[tokio::test]
    async fn decryption_is_reported_as_unsupported() {
        let kms = LocalKmsProvider::default();
        kms.generate_key(None).await.unwrap();
        let encrypted = kms.encrypt(b"x", None).await.unwrap();

        assert!(matches!(
            decrypt(&kms, &encrypted).await,
            Err(KmsError::DecryptUnsupported {
                backend: KmsBackend::Local
            })
        ));
    }
}
