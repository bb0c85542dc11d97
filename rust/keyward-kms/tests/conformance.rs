//! Runs the provider conformance suite against the in-process backends.

use keyward_kms::{
    KeySpec, KmsBackend, KmsConfig, KmsProvider, LocalKmsProvider, MemoryKmsProvider, conformance,
    connect, decrypt,
};
use testresult::TestResult;

#[tokio::test]
async fn memory_backend_conforms() {
    conformance::run_all(MemoryKmsProvider::new).await;
}

#[tokio::test]
async fn local_backend_conforms() {
    conformance::run_all(|| LocalKmsProvider::new(Some(b"conformance-master-key"))).await;
}

#[tokio::test]
async fn deleted_keys_leave_the_listing() -> TestResult {
    for provider in [
        connect(KmsBackend::Memory, &KmsConfig::default())?,
        connect(KmsBackend::Local, &KmsConfig::default())?,
    ] {
        let kept = provider.generate_key(None).await?.key_id;
        let deleted = provider.generate_key(None).await?.key_id;
        provider.delete_key(&deleted).await?;

        assert_eq!(provider.list_keys().await?, vec![kept]);
    }
    Ok(())
}

#[tokio::test]
async fn memory_backend_protects_seed_material() -> TestResult {
    let provider = MemoryKmsProvider::new();
    provider.generate_key(Some(KeySpec::SymmetricDefault)).await?;

    let seed = [7u8; 64];
    let encrypted = provider.encrypt(&seed, None).await?;
    assert_ne!(&encrypted.ciphertext[..], &seed[..]);

    let recovered = decrypt(&provider, &encrypted).await?;
    assert_eq!(&recovered[..], &seed[..]);
    Ok(())
}
