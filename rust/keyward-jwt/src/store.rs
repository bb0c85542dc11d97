use async_trait::async_trait;
use std::{collections::HashMap, fmt, sync::Arc};
use tokio::sync::RwLock;

use crate::{JwtKeyRecord, StoreError};

/// Persistence for [`JwtKeyRecord`]s.
///
/// The key manager loads every record once at startup and then writes
/// through on each change; it never reads back mid-flight.
#[async_trait]
pub trait KeyMetadataStore: Send + Sync + fmt::Debug {
    /// All persisted records, active or not.
    async fn load_keys(&self) -> Result<Vec<JwtKeyRecord>, StoreError>;

    /// Insert or replace the record with `record.id`.
    async fn save_key(&self, record: &JwtKeyRecord) -> Result<(), StoreError>;

    /// Remove the record with `id`. Removing an unknown id is a no-op.
    async fn delete_key(&self, id: &str) -> Result<(), StoreError>;
}

/// A trivial [`KeyMetadataStore`] backed by a [`HashMap`], where records
/// are kept in memory and never persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyMetadataStore {
    records: Arc<RwLock<HashMap<String, JwtKeyRecord>>>,
}

impl MemoryKeyMetadataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyMetadataStore for MemoryKeyMetadataStore {
    async fn load_keys(&self) -> Result<Vec<JwtKeyRecord>, StoreError> {
        let records = self.records.read().await;
        let mut keys: Vec<JwtKeyRecord> = records.values().cloned().collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(keys)
    }

    async fn save_key(&self, record: &JwtKeyRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete_key(&self, id: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.remove(id);
        Ok(())
    }
}
