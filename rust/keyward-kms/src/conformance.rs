//! Conformance suite for [`KmsProvider`] implementations.
//!
//! Each function exercises one part of the provider contract against a fresh
//! provider. Backends run the whole suite from their integration tests:
//!
//! ```no_run
//! use keyward_kms::{MemoryKmsProvider, conformance};
//!
//! #[tokio::test]
//! async fn memory_backend_conforms() {
//!     conformance::run_all(|| MemoryKmsProvider::new()).await;
//! }
//! ```

use std::collections::HashSet;

use crate::{KmsError, KmsKeyId, KmsProvider, decrypt};

const PLAINTEXT: &[u8] = b"conformance plaintext: 0123456789abcdef";

/// Every generated key gets a distinct id.
pub async fn generate_key_returns_unique_ids(provider: &dyn KmsProvider) {
    let mut seen = HashSet::new();
    for _ in 0..5 {
        let handle = provider.generate_key(None).await.expect("generate_key");
        assert!(!handle.key_id.as_str().is_empty(), "key id must not be empty");
        assert!(seen.insert(handle.key_id), "key ids must be unique");
    }
}

/// Generated keys show up in `list_keys`.
pub async fn list_keys_includes_generated_keys(provider: &dyn KmsProvider) {
    let first = provider.generate_key(None).await.expect("generate_key").key_id;
    let second = provider.generate_key(None).await.expect("generate_key").key_id;

    let listed = provider.list_keys().await.expect("list_keys");
    assert!(listed.contains(&first), "{first} missing from {listed:?}");
    assert!(listed.contains(&second), "{second} missing from {listed:?}");
}

/// The ciphertext never contains the plaintext verbatim.
pub async fn encrypt_does_not_leak_plaintext(provider: &dyn KmsProvider) {
    let key = provider.generate_key(None).await.expect("generate_key").key_id;
    let encrypted = provider.encrypt(PLAINTEXT, Some(&key)).await.expect("encrypt");

    assert!(!encrypted.ciphertext.is_empty(), "ciphertext must not be empty");
    assert!(
        !encrypted
            .ciphertext
            .windows(PLAINTEXT.len())
            .any(|window| window == PLAINTEXT),
        "ciphertext must not contain the plaintext"
    );
}

/// Encrypting without a key id succeeds once a key exists.
pub async fn encrypt_without_key_id_uses_a_default_key(provider: &dyn KmsProvider) {
    provider.generate_key(None).await.expect("generate_key");
    let encrypted = provider.encrypt(PLAINTEXT, None).await.expect("encrypt");
    assert!(!encrypted.key_id.as_str().is_empty());
}

/// Encrypting under a key that was never created fails with `KeyNotFound`.
pub async fn encrypt_with_unknown_key_fails(provider: &dyn KmsProvider) {
    let missing = KmsKeyId::new("conformance-missing-key");
    let result = provider.encrypt(PLAINTEXT, Some(&missing)).await;
    assert!(
        matches!(result, Err(KmsError::KeyNotFound(_))),
        "expected KeyNotFound, got {result:?}"
    );
}

/// A deleted key can no longer encrypt, and ciphertext produced under it
/// can no longer be decrypted.
pub async fn delete_key_disables_the_key(provider: &dyn KmsProvider) {
    let key = provider.generate_key(None).await.expect("generate_key").key_id;
    let encrypted = provider.encrypt(PLAINTEXT, Some(&key)).await.expect("encrypt");
    provider.delete_key(&key).await.expect("delete_key");

    let result = provider.encrypt(PLAINTEXT, Some(&key)).await;
    assert!(
        matches!(result, Err(KmsError::KeyNotFound(_) | KmsError::KeyDisabled(_))),
        "encrypt under a deleted key must fail, got {result:?}"
    );

    if let Some(decrypter) = provider.decrypter() {
        let result = decrypter.decrypt(&encrypted.ciphertext, &encrypted.key_id).await;
        assert!(
            matches!(result, Err(KmsError::Decryption(_))),
            "decrypt under a deleted key must fail with a decryption error, got {result:?}"
        );
    }
}

/// Decryption either round-trips or fails loudly with `DecryptUnsupported`.
pub async fn decrypt_round_trips_or_is_unsupported(provider: &dyn KmsProvider) {
    let key = provider.generate_key(None).await.expect("generate_key").key_id;
    let encrypted = provider.encrypt(PLAINTEXT, Some(&key)).await.expect("encrypt");

    match provider.decrypter() {
        Some(_) => {
            let plaintext = decrypt(provider, &encrypted).await.expect("decrypt");
            assert_eq!(&plaintext[..], PLAINTEXT);
        }
        None => {
            let result = decrypt(provider, &encrypted).await;
            assert!(
                matches!(result, Err(KmsError::DecryptUnsupported { .. })),
                "providers without a decrypter must say so, got {result:?}"
            );
        }
    }
}

/// Tampered ciphertext does not decrypt.
pub async fn decrypt_rejects_tampered_ciphertext(provider: &dyn KmsProvider) {
    let Some(decrypter) = provider.decrypter() else {
        return;
    };
    let key = provider.generate_key(None).await.expect("generate_key").key_id;
    let mut encrypted = provider.encrypt(PLAINTEXT, Some(&key)).await.expect("encrypt");
    if let Some(last) = encrypted.ciphertext.last_mut() {
        *last ^= 0x01;
    }

    let result = decrypter.decrypt(&encrypted.ciphertext, &encrypted.key_id).await;
    assert!(result.is_err(), "tampered ciphertext must not decrypt");
}

/// Run every conformance check, each against a fresh provider from `fresh`.
pub async fn run_all<P, F>(fresh: F)
where
    P: KmsProvider,
    F: Fn() -> P,
{
    generate_key_returns_unique_ids(&fresh()).await;
    list_keys_includes_generated_keys(&fresh()).await;
    encrypt_does_not_leak_plaintext(&fresh()).await;
    encrypt_without_key_id_uses_a_default_key(&fresh()).await;
    encrypt_with_unknown_key_fails(&fresh()).await;
    delete_key_disables_the_key(&fresh()).await;
    decrypt_round_trips_or_is_unsupported(&fresh()).await;
    decrypt_rejects_tampered_ciphertext(&fresh()).await;
}
