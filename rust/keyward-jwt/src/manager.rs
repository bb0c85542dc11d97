use chrono::{DateTime, Utc};
use keyward_common::{Clock, serde_base64url};
use keyward_kms::KmsProvider;
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::{
    JwtKeyRecord, KeyManagerConfig, KeyManagerError, KeyMetadataStore, keying::SigningKey,
};

/// A signature together with the key that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPayload {
    /// HMAC over the signed data
    #[serde(with = "serde_base64url")]
    pub signature: Vec<u8>,
    /// Id of the signing key record
    pub key_id: String,
}

/// Snapshot of the key ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStats {
    /// Records known to the manager, active or not
    pub total_keys: usize,
    /// Records that still verify signatures
    pub active_keys: usize,
    /// The key new signatures are made with
    pub current_key_id: Option<String>,
    /// When the current key becomes due for rotation
    pub next_rotation: Option<DateTime<Utc>>,
}

/// What a rotation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    /// Another rotation was already running, so nothing was done
    pub skipped: bool,
    /// The key that became current
    pub created: Option<String>,
    /// The key it replaced as current (it stays active)
    pub superseded: Option<String>,
    /// Keys deactivated to respect the active-key bound, oldest first
    pub deactivated: Vec<String>,
}

impl RotationReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

pub(crate) struct KeyEntry {
    pub(crate) record: JwtKeyRecord,
    /// `None` once the record is deactivated
    pub(crate) key: Option<Arc<SigningKey>>,
}

/// In-memory view of every key record, oldest first.
#[derive(Default)]
pub(crate) struct KeyRing {
    pub(crate) entries: Vec<KeyEntry>,
    pub(crate) current: Option<String>,
}

impl KeyRing {
    pub(crate) fn current_entry(&self) -> Option<&KeyEntry> {
        let current = self.current.as_ref()?;
        self.entries.iter().find(|entry| &entry.record.id == current)
    }

    /// Signing key for an active record.
    pub(crate) fn active_key(&self, id: &str) -> Option<Arc<SigningKey>> {
        self.entries
            .iter()
            .find(|entry| entry.record.id == id && entry.record.is_active)
            .and_then(|entry| entry.key.clone())
    }

    fn active_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.record.is_active)
            .count()
    }
}

/// Manages the lifecycle of HMAC signing keys.
///
/// Construct one per process with [`initialize`](Self::initialize), share it
/// behind an [`Arc`], and call [`start_rotation`](Self::start_rotation) to
/// rotate on a timer. Signing and verification only read the in-memory key
/// ring and never wait on the KMS.
pub struct JwtKeyManager {
    pub(crate) config: KeyManagerConfig,
    kms: Arc<dyn KmsProvider>,
    store: Arc<dyn KeyMetadataStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ring: RwLock<KeyRing>,
    rotation: tokio::sync::Mutex<()>,
    pub(crate) cancellation: CancellationToken,
    pub(crate) scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for JwtKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeyManager")
            .field("algorithm", &self.config.algorithm)
            .field("kms", &self.kms.backend())
            .field("stats", &self.key_stats())
            .finish_non_exhaustive()
    }
}

impl JwtKeyManager {
    /// Load persisted keys, re-derive their signing material and make sure a
    /// current key exists.
    ///
    /// Any failure to end up with a usable current key is reported as
    /// [`KeyManagerError::Initialization`].
    #[tracing::instrument(skip_all, fields(algorithm = %config.algorithm, kms = %kms.backend()))]
    pub async fn initialize(
        config: KeyManagerConfig,
        kms: Arc<dyn KmsProvider>,
        store: Arc<dyn KeyMetadataStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, KeyManagerError> {
        config
            .validate()
            .map_err(|error| KeyManagerError::Initialization(Box::new(error)))?;

        let manager = Self {
            config,
            kms,
            store,
            clock,
            ring: RwLock::new(KeyRing::default()),
            rotation: tokio::sync::Mutex::new(()),
            cancellation: CancellationToken::new(),
            scheduler: Mutex::new(None),
        };

        if let Err(error) = manager.bootstrap().await {
            tracing::error!(%error, "Failed to initialize JWT key manager");
            return Err(KeyManagerError::Initialization(Box::new(error)));
        }

        let stats = manager.key_stats();
        tracing::info!(
            total_keys = stats.total_keys,
            active_keys = stats.active_keys,
            current_key_id = ?stats.current_key_id,
            "JWT key manager initialized"
        );
        Ok(manager)
    }

    /// Connect the KMS backend named by `config.kms_provider`, configured
    /// from `config.kms_config`, and [`initialize`](Self::initialize) on it.
    ///
    /// A backend that cannot be built is reported as
    /// [`KeyManagerError::Initialization`].
    pub async fn from_config(
        config: KeyManagerConfig,
        store: Arc<dyn KeyMetadataStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, KeyManagerError> {
        let kms = keyward_kms::connect(config.kms_provider, &config.kms_config).map_err(|error| {
            tracing::error!(
                backend = %config.kms_provider,
                %error,
                "Failed to connect KMS provider"
            );
            KeyManagerError::Initialization(Box::new(error.into()))
        })?;
        Self::initialize(config, kms, store, clock).await
    }

    async fn bootstrap(&self) -> Result<(), KeyManagerError> {
        let mut records = self.store.load_keys().await?;
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let key = if record.is_active {
                Some(Arc::new(SigningKey::derive(&record)?))
            } else {
                None
            };
            entries.push(KeyEntry { record, key });
        }

        let current = entries
            .iter()
            .rev()
            .find(|entry| entry.record.is_active)
            .map(|entry| entry.record.clone());

        {
            let mut ring = self.ring.write();
            ring.entries = entries;
            ring.current = current.as_ref().map(|record| record.id.clone());
        }

        match current {
            Some(record)
                if record.algorithm == self.config.algorithm
                    && record.key_size == self.config.key_size =>
            {
                tracing::debug!(key_id = %record.id, "Restored current signing key");
            }
            Some(record) => {
                tracing::info!(
                    key_id = %record.id,
                    from = %record.algorithm,
                    to = %self.config.algorithm,
                    from_key_size = record.key_size,
                    to_key_size = self.config.key_size,
                    "Signing parameters changed; generating a new current key"
                );
                self.install_new_key().await?;
            }
            None => {
                self.install_new_key().await?;
            }
        }

        self.prune(self.clock.now()).await?;
        Ok(())
    }

    /// Generate a key, persist it and make it current. Returns the new and
    /// the superseded key ids.
    async fn install_new_key(&self) -> Result<(String, Option<String>), KeyManagerError> {
        let (record, key) = self.generate_key().await?;
        let id = record.id.clone();

        let superseded = {
            let mut ring = self.ring.write();
            ring.entries.push(KeyEntry {
                record,
                key: Some(Arc::new(key)),
            });
            ring.current.replace(id.clone())
        };

        tracing::info!(key_id = %id, superseded = ?superseded, "Signing key is now current");
        Ok((id, superseded))
    }

    async fn generate_key(&self) -> Result<(JwtKeyRecord, SigningKey), KeyManagerError> {
        let handle = self.kms.generate_key(None).await?;

        let mut seed = Zeroizing::new(vec![0u8; self.config.key_size]);
        rand::rngs::OsRng.fill_bytes(&mut seed);

        let protected = match self.kms.encrypt(&seed, Some(&handle.key_id)).await {
            Ok(protected) => protected,
            Err(error) => {
                self.delete_kms_key(&handle.key_id).await;
                return Err(error.into());
            }
        };

        let record = JwtKeyRecord {
            id: JwtKeyRecord::generate_id(),
            kms_key_id: handle.key_id,
            created_at: self.clock.now(),
            expires_at: None,
            is_active: true,
            algorithm: self.config.algorithm,
            key_size: self.config.key_size,
            protected_material: protected.ciphertext,
        };
        let key = match SigningKey::derive(&record) {
            Ok(key) => key,
            Err(error) => {
                self.delete_kms_key(&record.kms_key_id).await;
                return Err(error);
            }
        };
        if let Err(error) = self.store.save_key(&record).await {
            self.delete_kms_key(&record.kms_key_id).await;
            return Err(error.into());
        }

        tracing::debug!(key_id = %record.id, kms_key_id = %record.kms_key_id, "Generated signing key");
        Ok((record, key))
    }

    async fn delete_kms_key(&self, kms_key_id: &keyward_kms::KmsKeyId) {
        if let Err(error) = self.kms.delete_key(kms_key_id).await {
            tracing::warn!(kms_key_id = %kms_key_id, %error, "Failed to delete KMS key");
        }
    }

    /// The current key's id and signing material, held past any concurrent
    /// rotation.
    pub(crate) fn current_signing_key(&self) -> Result<(String, Arc<SigningKey>), KeyManagerError> {
        let ring = self.ring.read();
        let entry = ring.current_entry().ok_or(KeyManagerError::NoCurrentKey)?;
        let key = entry.key.clone().ok_or(KeyManagerError::NoCurrentKey)?;
        Ok((entry.record.id.clone(), key))
    }

    /// Sign `data` with the current key.
    pub fn sign(&self, data: &[u8]) -> Result<SignedPayload, KeyManagerError> {
        let (key_id, key) = self.current_signing_key()?;

        let signature = key
            .sign(data)
            .map_err(|error| KeyManagerError::KeyDerivation {
                key_id: key_id.clone(),
                reason: error.to_string(),
            })?;
        Ok(SignedPayload { signature, key_id })
    }

    /// Check `signature` over `data` against the active key `key_id`.
    ///
    /// Unknown or deactivated keys and mismatching signatures all yield
    /// `false`.
    pub fn verify(&self, data: &[u8], signature: &[u8], key_id: &str) -> bool {
        let Some(key) = self.ring.read().active_key(key_id) else {
            tracing::debug!(key_id, "Verification against unknown or inactive key");
            return false;
        };
        key.verify(data, signature)
    }

    /// Rotate if the current key is at least `rotation_interval` old, then
    /// prune the active set.
    pub async fn rotate_keys(&self) -> Result<RotationReport, KeyManagerError> {
        self.rotate(false).await
    }

    /// Rotate now regardless of the current key's age.
    pub async fn force_rotation(&self) -> Result<RotationReport, KeyManagerError> {
        self.rotate(true).await
    }

    #[tracing::instrument(skip(self))]
    async fn rotate(&self, force: bool) -> Result<RotationReport, KeyManagerError> {
        let Ok(_guard) = self.rotation.try_lock() else {
            tracing::debug!("Rotation already in progress; skipping");
            return Ok(RotationReport::skipped());
        };
        if self.cancellation.is_cancelled() {
            return Ok(RotationReport::skipped());
        }

        let now = self.clock.now();
        let mut report = RotationReport::default();

        if force || self.rotation_due(now) {
            let (created, superseded) = self.install_new_key().await?;
            report.created = Some(created);
            report.superseded = superseded;
        }

        report.deactivated = self.prune(now).await?;

        if report.created.is_some() || !report.deactivated.is_empty() {
            tracing::info!(
                created = ?report.created,
                deactivated = report.deactivated.len(),
                forced = force,
                "Rotated signing keys"
            );
        }
        Ok(report)
    }

    fn rotation_due(&self, now: DateTime<Utc>) -> bool {
        let interval = chrono::Duration::from_std(self.config.rotation_interval)
            .unwrap_or(chrono::Duration::MAX);
        match self.ring.read().current_entry() {
            Some(entry) => entry.record.age(now) >= interval,
            None => true,
        }
    }

    /// Deactivate the oldest non-current keys until at most
    /// `max_active_keys` remain active. KMS deletion is best effort.
    async fn prune(&self, now: DateTime<Utc>) -> Result<Vec<String>, KeyManagerError> {
        let pruned: Vec<JwtKeyRecord> = {
            let mut ring = self.ring.write();
            let current = ring.current.clone();
            let mut active = ring.active_count();
            let mut pruned = Vec::new();

            for entry in ring.entries.iter_mut() {
                if active <= self.config.max_active_keys {
                    break;
                }
                if !entry.record.is_active || current.as_ref() == Some(&entry.record.id) {
                    continue;
                }
                entry.record.deactivate(now);
                entry.key = None;
                active -= 1;
                pruned.push(entry.record.clone());
            }
            pruned
        };

        let mut ids = Vec::with_capacity(pruned.len());
        for record in pruned {
            self.store.save_key(&record).await?;
            self.delete_kms_key(&record.kms_key_id).await;
            tracing::info!(key_id = %record.id, "Deactivated signing key");
            ids.push(record.id);
        }
        Ok(ids)
    }

    /// Counts and the current key id.
    pub fn key_stats(&self) -> KeyStats {
        let ring = self.ring.read();
        let current = ring.current_entry();
        let interval = chrono::Duration::from_std(self.config.rotation_interval).ok();

        KeyStats {
            total_keys: ring.entries.len(),
            active_keys: ring.active_count(),
            current_key_id: current.map(|entry| entry.record.id.clone()),
            next_rotation: current
                .zip(interval)
                .and_then(|(entry, interval)| entry.record.created_at.checked_add_signed(interval)),
        }
    }

    /// The record new signatures are made with.
    pub fn get_current_key(&self) -> Result<JwtKeyRecord, KeyManagerError> {
        self.ring
            .read()
            .current_entry()
            .map(|entry| entry.record.clone())
            .ok_or(KeyManagerError::NoCurrentKey)
    }

    /// Every known record, oldest first.
    pub fn keys(&self) -> Vec<JwtKeyRecord> {
        self.ring
            .read()
            .entries
            .iter()
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// The configuration the manager was initialized with.
    pub fn config(&self) -> &KeyManagerConfig {
        &self.config
    }

    /// Stop the rotation scheduler and best-effort delete every active key's
    /// KMS key. Afterwards the manager neither signs nor rotates.
    #[tracing::instrument(skip(self))]
    pub async fn destroy(&self) {
        self.cancellation.cancel();

        let handle = self.scheduler.lock().take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                tracing::warn!(%error, "Key rotation task panicked");
            }
        }

        // Wait out a rotation that was already running.
        let _guard = self.rotation.lock().await;

        let active: Vec<JwtKeyRecord> = {
            let mut ring = self.ring.write();
            ring.current = None;
            ring.entries
                .iter_mut()
                .filter(|entry| entry.record.is_active)
                .map(|entry| {
                    entry.key = None;
                    entry.record.clone()
                })
                .collect()
        };

        for record in &active {
            self.delete_kms_key(&record.kms_key_id).await;
        }
        tracing::info!(deleted = active.len(), "JWT key manager destroyed");
    }
}
