//! In-memory storage implementation for testing and embedded use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::{EncryptedRecord, InstanceRecord, Storage, StorageError, StoredTokenSet};

/// In-memory storage backed by `HashMap`s under one mutex.
///
/// All state is wrapped in `Arc<Mutex<_>>` so clones share the same
/// underlying store, mirroring a process-wide database handle. Every
/// primitive takes the lock once, which trivially gives the atomic
/// set-update semantics the `Storage` contract requires.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    /// `(owner, instance, key)` -> encrypted record
    contexts: HashMap<(String, Uuid, String), EncryptedRecord>,

    /// `(owner, instance, element)` -> token set
    tokens: HashMap<(String, Uuid, Uuid), StoredTokenSet>,

    /// `(owner, process, instance)` -> lifecycle bookkeeping
    instances: HashMap<(String, Uuid, Uuid), InstanceRecord>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStorageInner>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Io("poisoned lock".to_string()))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put_context(
        &self,
        owner: &str,
        instance: Uuid,
        key: &str,
        record: &EncryptedRecord,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        inner.contexts.insert((owner.to_string(), instance, key.to_string()), record.clone());
        Ok(())
    }

    async fn get_context(
        &self,
        owner: &str,
        instance: Uuid,
        key: &str,
    ) -> Result<Option<EncryptedRecord>, StorageError> {
        let inner = self.lock()?;
        Ok(inner.contexts.get(&(owner.to_string(), instance, key.to_string())).cloned())
    }

    async fn list_context_keys(
        &self,
        owner: &str,
        instance: Uuid,
    ) -> Result<Vec<String>, StorageError> {
        let inner = self.lock()?;
        let mut keys: Vec<String> = inner
            .contexts
            .keys()
            .filter(|(o, i, _)| o == owner && *i == instance)
            .map(|(_, _, k)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_context(
        &self,
        owner: &str,
        instance: Uuid,
        key: &str,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        inner.contexts.remove(&(owner.to_string(), instance, key.to_string()));
        Ok(())
    }

    async fn add_token(
        &self,
        owner: &str,
        instance: Uuid,
        element: Uuid,
        token: &[u8],
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let set = inner.tokens.entry((owner.to_string(), instance, element)).or_default();
        set.tokens.insert(token.to_vec());
        set.last = Some(token.to_vec());
        Ok(())
    }

    async fn remove_token(
        &self,
        owner: &str,
        instance: Uuid,
        element: Uuid,
        token: &[u8],
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        if let Some(set) = inner.tokens.get_mut(&(owner.to_string(), instance, element)) {
            set.tokens.remove(token);
        }
        Ok(())
    }

    async fn get_tokens(
        &self,
        owner: &str,
        instance: Uuid,
        element: Uuid,
    ) -> Result<Option<StoredTokenSet>, StorageError> {
        let inner = self.lock()?;
        Ok(inner.tokens.get(&(owner.to_string(), instance, element)).cloned())
    }

    async fn create_instance(
        &self,
        owner: &str,
        process: Uuid,
        instance: Uuid,
        created_secs: u64,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        inner
            .instances
            .entry((owner.to_string(), process, instance))
            .or_insert(InstanceRecord { created_secs, completed_secs: None });
        Ok(())
    }

    async fn complete_instance(
        &self,
        owner: &str,
        process: Uuid,
        instance: Uuid,
        completed_secs: u64,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        inner
            .instances
            .entry((owner.to_string(), process, instance))
            .and_modify(|record| record.completed_secs = Some(completed_secs))
            .or_insert(InstanceRecord { created_secs: completed_secs, completed_secs: Some(completed_secs) });
        Ok(())
    }

    async fn get_instance(
        &self,
        owner: &str,
        process: Uuid,
        instance: Uuid,
    ) -> Result<Option<InstanceRecord>, StorageError> {
        let inner = self.lock()?;
        Ok(inner.instances.get(&(owner.to_string(), process, instance)).cloned())
    }
}
