//! Process-local KMS backend.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::RngCore;
use std::{collections::HashMap, fmt};
use zeroize::Zeroizing;

use crate::{
    EncryptedData, KeySpec, KmsBackend, KmsDecrypt, KmsError, KmsKeyHandle, KmsKeyId,
    KmsProvider,
};

const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

struct MemoryKey {
    spec: KeySpec,
    material: Zeroizing<[u8; 32]>,
}

#[derive(Default)]
struct KeyTable {
    keys: HashMap<KmsKeyId, MemoryKey>,
    /// Creation order; the last entry is the default key.
    order: Vec<KmsKeyId>,
}

/// AES-256-GCM keys that live only as long as the provider does.
///
/// Ciphertext is laid out as `nonce (12 bytes) || ciphertext || tag`, with
/// the key id bound in as associated data so a ciphertext cannot be replayed
/// under a different key.
#[derive(Default)]
pub struct MemoryKmsProvider {
    table: RwLock<KeyTable>,
}

impl MemoryKmsProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    fn cipher_for(
        &self,
        key_id: Option<&KmsKeyId>,
        operation: &'static str,
    ) -> Result<(KmsKeyId, Aes256Gcm), KmsError> {
        let table = self.table.read();
        let key_id = match key_id {
            Some(key_id) => key_id.clone(),
            None => table.order.last().cloned().ok_or(KmsError::NoDefaultKey)?,
        };
        let key = table
            .keys
            .get(&key_id)
            .ok_or_else(|| KmsError::KeyNotFound(key_id.clone()))?;

        if !key.spec.can_encrypt() {
            return Err(KmsError::KeyUsage { key_id, operation });
        }

        let cipher = Aes256Gcm::new_from_slice(key.material.as_ref()).map_err(|error| {
            KmsError::Backend {
                code: "aes-gcm".into(),
                message: error.to_string(),
            }
        })?;
        Ok((key_id, cipher))
    }
}

impl fmt::Debug for MemoryKmsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryKmsProvider")
            .field("keys", &self.table.read().order)
            .finish()
    }
}

#[async_trait]
impl KmsProvider for MemoryKmsProvider {
    fn backend(&self) -> KmsBackend {
        KmsBackend::Memory
    }

    async fn encrypt(
        &self,
        data: &[u8],
        key_id: Option<&KmsKeyId>,
    ) -> Result<EncryptedData, KmsError> {
        let (key_id, cipher) = self.cipher_for(key_id, "encrypt")?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let sealed = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: data,
                    aad: key_id.as_str().as_bytes(),
                },
            )
            .map_err(|_| KmsError::Backend {
                code: "aes-gcm".into(),
                message: "encryption failed".into(),
            })?;

        let mut ciphertext = Vec::with_capacity(NONCE_LENGTH + sealed.len());
        ciphertext.extend_from_slice(&nonce);
        ciphertext.extend_from_slice(&sealed);

        Ok(EncryptedData { ciphertext, key_id })
    }

    async fn generate_key(&self, spec: Option<KeySpec>) -> Result<KmsKeyHandle, KmsError> {
        let spec = spec.unwrap_or_default();
        let mut material = Zeroizing::new([0u8; 32]);
        rand::rngs::OsRng.fill_bytes(material.as_mut());

        let key_id = KmsKeyId::generate("mem");
        let mut table = self.table.write();
        table
            .keys
            .insert(key_id.clone(), MemoryKey { spec, material });
        table.order.push(key_id.clone());

        tracing::debug!(key_id = %key_id, ?spec, "Generated in-memory KMS key");

        Ok(KmsKeyHandle {
            key_id,
            public_key: None,
        })
    }

    async fn delete_key(&self, key_id: &KmsKeyId) -> Result<(), KmsError> {
        let mut table = self.table.write();
        if table.keys.remove(key_id).is_none() {
            return Err(KmsError::KeyNotFound(key_id.clone()));
        }
        table.order.retain(|existing| existing != key_id);

        tracing::debug!(key_id = %key_id, "Deleted in-memory KMS key");
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<KmsKeyId>, KmsError> {
        Ok(self.table.read().order.clone())
    }

    fn decrypter(&self) -> Option<&dyn KmsDecrypt> {
        Some(self)
    }
}

#[async_trait]
impl KmsDecrypt for MemoryKmsProvider {
    async fn decrypt(
        &self,
        ciphertext: &[u8],
        key_id: &KmsKeyId,
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let (key_id, cipher) = self
            .cipher_for(Some(key_id), "decrypt")
            .map_err(KmsError::on_decrypt)?;

        if ciphertext.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(KmsError::Decryption("ciphertext is too short".into()));
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_LENGTH);
        let nonce: [u8; NONCE_LENGTH] = nonce
            .try_into()
            .map_err(|_| KmsError::Decryption("malformed nonce".into()))?;

        cipher
            .decrypt(
                &Nonce::from(nonce),
                Payload {
                    msg: sealed,
                    aad: key_id.as_str().as_bytes(),
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| KmsError::Decryption("authentication failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decrypt;

    #[tokio::test]
    async fn it_round_trips_through_aes_gcm() {
        let kms = MemoryKmsProvider::new();
        kms.generate_key(None).await.unwrap();

        let encrypted = kms.encrypt(b"hello", None).await.unwrap();
        assert_eq!(encrypted.ciphertext.len(), NONCE_LENGTH + 5 + TAG_LENGTH);
        assert_eq!(&*decrypt(&kms, &encrypted).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn ciphertext_is_bound_to_its_key() {
        let kms = MemoryKmsProvider::new();
        let first = kms.generate_key(None).await.unwrap().key_id;
        let second = kms.generate_key(None).await.unwrap().key_id;

        let encrypted = kms.encrypt(b"hello", Some(&first)).await.unwrap();
        let result = kms.decrypt(&encrypted.ciphertext, &second).await;
        assert!(matches!(result, Err(KmsError::Decryption(_))));
    }

    #[tokio::test]
    async fn unknown_keys_fail_to_decrypt() {
        let kms = MemoryKmsProvider::new();
        kms.generate_key(None).await.unwrap();
        let encrypted = kms.encrypt(b"hello", None).await.unwrap();

        let result = kms
            .decrypt(&encrypted.ciphertext, &KmsKeyId::new("nope"))
            .await;
        assert!(matches!(result, Err(KmsError::Decryption(_))));
    }

    #[tokio::test]
    async fn hmac_keys_cannot_encrypt() {
        let kms = MemoryKmsProvider::new();
        let key = kms
            .generate_key(Some(KeySpec::Hmac256))
            .await
            .unwrap()
            .key_id;

        let result = kms.encrypt(b"hello", Some(&key)).await;
        assert!(matches!(
            result,
            Err(KmsError::KeyUsage {
                operation: "encrypt",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn short_ciphertext_is_rejected() {
        let kms = MemoryKmsProvider::new();
        let key = kms.generate_key(None).await.unwrap().key_id;

        let result = kms.decrypt(&[0u8; 8], &key).await;
        assert!(matches!(result, Err(KmsError::Decryption(_))));
    }
}
