//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with copy-on-write for crash safety. Three
//! tables mirror the logical layout: context records, token sets and
//! instance bookkeeping, all keyed by length-prefixed owner-scoped composite
//! byte keys. Row values are CBOR.
//!
//! Token set updates are read-modify-write inside a single write
//! transaction, which gives the atomic, convergent add/remove the `Storage`
//! contract requires.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use flowvault_core::{
    EncryptedRecord, InstanceRecord, Storage, StorageError, StoredTokenSet,
};
use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

/// Table: context records
/// Key: `[owner_len: u32 BE][owner][instance: 16][key bytes]`
/// Value: CBOR-encoded `EncryptedRecord`
const CONTEXT: TableDefinition<&[u8], &[u8]> = TableDefinition::new("context");

/// Table: token sets
/// Key: `[owner_len: u32 BE][owner][instance: 16][element: 16]`
/// Value: CBOR-encoded `StoredTokenSet`
const TOKENS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tokens");

/// Table: instance bookkeeping
/// Key: `[owner_len: u32 BE][owner][process: 16][instance: 16]`
/// Value: CBOR-encoded `InstanceRecord`
const INSTANCES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("instances");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc): all
/// clones share one database handle, matching the process-wide connection
/// model.
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

/// Composite key: length-prefixed owner, a 16-byte UUID scope, then a
/// variable suffix. The length prefix keeps `("ab", …)` and `("a", "b…")`
/// from colliding and makes prefix scans owner-exact.
fn encode_scoped_key(owner: &str, scope: Uuid, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + owner.len() + 16 + suffix.len());
    key.extend_from_slice(&(owner.len() as u32).to_be_bytes());
    key.extend_from_slice(owner.as_bytes());
    key.extend_from_slice(scope.as_bytes());
    key.extend_from_slice(suffix);
    key
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates the CONTEXT, TOKENS and INSTANCES tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or
    /// created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(CONTEXT).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(TOKENS).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(INSTANCES).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        tracing::debug!(path = %path.as_ref().display(), "opened flowvault database");

        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl Storage for RedbStorage {
    async fn put_context(
        &self,
        owner: &str,
        instance: Uuid,
        key: &str,
        record: &EncryptedRecord,
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut table =
                txn.open_table(CONTEXT).map_err(|e| StorageError::Io(e.to_string()))?;

            let mut bytes = Vec::new();
            ciborium::into_writer(record, &mut bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;

            let row_key = encode_scoped_key(owner, instance, key.as_bytes());
            table
                .insert(row_key.as_slice(), bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }

    async fn get_context(
        &self,
        owner: &str,
        instance: Uuid,
        key: &str,
    ) -> Result<Option<EncryptedRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(CONTEXT).map_err(|e| StorageError::Io(e.to_string()))?;

        let row_key = encode_scoped_key(owner, instance, key.as_bytes());
        match table.get(row_key.as_slice()).map_err(|e| StorageError::Io(e.to_string()))? {
            Some(value) => {
                let record: EncryptedRecord = ciborium::from_reader(value.value())
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(record))
            },
            None => Ok(None),
        }
    }

    async fn list_context_keys(
        &self,
        owner: &str,
        instance: Uuid,
    ) -> Result<Vec<String>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(CONTEXT).map_err(|e| StorageError::Io(e.to_string()))?;

        let prefix = encode_scoped_key(owner, instance, &[]);
        let results = table
            .range(prefix.as_slice()..)
            .map_err(|e| StorageError::Io(e.to_string()))?;

        let mut keys = Vec::new();
        for result in results {
            let (row_key, _) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            let row_key = row_key.value();

            // Keys sort by prefix; the first non-matching row ends the scan.
            if !row_key.starts_with(&prefix) {
                break;
            }

            let suffix = &row_key[prefix.len()..];
            let key = std::str::from_utf8(suffix)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            keys.push(key.to_string());
        }

        Ok(keys)
    }

    async fn delete_context(
        &self,
        owner: &str,
        instance: Uuid,
        key: &str,
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut table =
                txn.open_table(CONTEXT).map_err(|e| StorageError::Io(e.to_string()))?;

            let row_key = encode_scoped_key(owner, instance, key.as_bytes());
            table.remove(row_key.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?;
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }

    async fn add_token(
        &self,
        owner: &str,
        instance: Uuid,
        element: Uuid,
        token: &[u8],
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut table = txn.open_table(TOKENS).map_err(|e| StorageError::Io(e.to_string()))?;
            let row_key = encode_scoped_key(owner, instance, element.as_bytes());

            let mut set = match table
                .get(row_key.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?
            {
                Some(value) => ciborium::from_reader(value.value())
                    .map_err(|e| StorageError::Serialization(e.to_string()))?,
                None => StoredTokenSet::default(),
            };

            set.tokens.insert(token.to_vec());
            set.last = Some(token.to_vec());

            let mut bytes = Vec::new();
            ciborium::into_writer(&set, &mut bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            table
                .insert(row_key.as_slice(), bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }

    async fn remove_token(
        &self,
        owner: &str,
        instance: Uuid,
        element: Uuid,
        token: &[u8],
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut table = txn.open_table(TOKENS).map_err(|e| StorageError::Io(e.to_string()))?;
            let row_key = encode_scoped_key(owner, instance, element.as_bytes());

            let existing: Option<StoredTokenSet> = match table
                .get(row_key.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?
            {
                Some(value) => Some(
                    ciborium::from_reader(value.value())
                        .map_err(|e| StorageError::Serialization(e.to_string()))?,
                ),
                None => None,
            };

            // Absent row: removing is a no-op.
            if let Some(mut set) = existing {
                set.tokens.remove(token);

                let mut bytes = Vec::new();
                ciborium::into_writer(&set, &mut bytes)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                table
                    .insert(row_key.as_slice(), bytes.as_slice())
                    .map_err(|e| StorageError::Io(e.to_string()))?;
            }
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }

    async fn get_tokens(
        &self,
        owner: &str,
        instance: Uuid,
        element: Uuid,
    ) -> Result<Option<StoredTokenSet>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(TOKENS).map_err(|e| StorageError::Io(e.to_string()))?;

        let row_key = encode_scoped_key(owner, instance, element.as_bytes());
        match table.get(row_key.as_slice()).map_err(|e| StorageError::Io(e.to_string()))? {
            Some(value) => {
                let set: StoredTokenSet = ciborium::from_reader(value.value())
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(set))
            },
            None => Ok(None),
        }
    }

    async fn create_instance(
        &self,
        owner: &str,
        process: Uuid,
        instance: Uuid,
        created_secs: u64,
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut table =
                txn.open_table(INSTANCES).map_err(|e| StorageError::Io(e.to_string()))?;
            let row_key = encode_scoped_key(owner, process, instance.as_bytes());

            // Idempotent: an existing row keeps its original timestamps.
            let exists = table
                .get(row_key.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?
                .is_some();

            if !exists {
                let record = InstanceRecord { created_secs, completed_secs: None };
                let mut bytes = Vec::new();
                ciborium::into_writer(&record, &mut bytes)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                table
                    .insert(row_key.as_slice(), bytes.as_slice())
                    .map_err(|e| StorageError::Io(e.to_string()))?;
            }
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }

    async fn complete_instance(
        &self,
        owner: &str,
        process: Uuid,
        instance: Uuid,
        completed_secs: u64,
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut table =
                txn.open_table(INSTANCES).map_err(|e| StorageError::Io(e.to_string()))?;
            let row_key = encode_scoped_key(owner, process, instance.as_bytes());

            let mut record = match table
                .get(row_key.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?
            {
                Some(value) => ciborium::from_reader(value.value())
                    .map_err(|e| StorageError::Serialization(e.to_string()))?,
                // Row written by an older service version or lost create:
                // stamp created = completed.
                None => InstanceRecord { created_secs: completed_secs, completed_secs: None },
            };
            record.completed_secs = Some(completed_secs);

            let mut bytes = Vec::new();
            ciborium::into_writer(&record, &mut bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            table
                .insert(row_key.as_slice(), bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }

    async fn get_instance(
        &self,
        owner: &str,
        process: Uuid,
        instance: Uuid,
    ) -> Result<Option<InstanceRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(INSTANCES).map_err(|e| StorageError::Io(e.to_string()))?;

        let row_key = encode_scoped_key(owner, process, instance.as_bytes());
        match table.get(row_key.as_slice()).map_err(|e| StorageError::Io(e.to_string()))? {
            Some(value) => {
                let record: InstanceRecord = ciborium::from_reader(value.value())
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(record))
            },
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(byte: u8) -> EncryptedRecord {
        EncryptedRecord { ciphertext: vec![byte; 48], key_id: Uuid::new_v4(), iv: [byte; 16] }
    }

    fn open_temp() -> (RedbStorage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("flowvault.redb")).unwrap();
        (storage, dir)
    }

    #[tokio::test]
    async fn context_round_trip() {
        let (storage, _dir) = open_temp();
        let instance = Uuid::new_v4();
        let stored = record(7);

        storage.put_context("owner-a", instance, "a1", &stored).await.unwrap();
        let loaded = storage.get_context("owner-a", instance, "a1").await.unwrap().unwrap();

        assert_eq!(loaded, stored);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowvault.redb");
        let instance = Uuid::new_v4();
        let element = Uuid::new_v4();
        let stored = record(9);

        {
            let storage = RedbStorage::open(&path).unwrap();
            storage.put_context("owner-a", instance, "a1", &stored).await.unwrap();
            storage.add_token("owner-a", instance, element, b"t1").await.unwrap();
        }

        let storage = RedbStorage::open(&path).unwrap();
        let loaded = storage.get_context("owner-a", instance, "a1").await.unwrap().unwrap();
        assert_eq!(loaded, stored);

        let set = storage.get_tokens("owner-a", instance, element).await.unwrap().unwrap();
        assert!(set.tokens.contains(b"t1".as_slice()));
        assert_eq!(set.last.as_deref(), Some(b"t1".as_slice()));
    }

    #[tokio::test]
    async fn list_keys_scans_only_the_instance_prefix() {
        let (storage, _dir) = open_temp();
        let instance_a = Uuid::new_v4();
        let instance_b = Uuid::new_v4();

        storage.put_context("owner-a", instance_a, "k2", &record(1)).await.unwrap();
        storage.put_context("owner-a", instance_a, "k1", &record(2)).await.unwrap();
        storage.put_context("owner-a", instance_b, "other", &record(3)).await.unwrap();
        storage.put_context("owner-ab", instance_a, "trap", &record(4)).await.unwrap();

        let keys = storage.list_context_keys("owner-a", instance_a).await.unwrap();
        assert_eq!(keys, vec!["k1".to_string(), "k2".to_string()]);
    }

    #[tokio::test]
    async fn owner_length_prefix_prevents_collisions() {
        let (storage, _dir) = open_temp();
        let instance = Uuid::new_v4();

        storage.put_context("ab", instance, "k", &record(1)).await.unwrap();

        // "a" + anything must never alias "ab".
        assert!(storage.get_context("a", instance, "k").await.unwrap().is_none());
        let keys = storage.list_context_keys("a", instance).await.unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (storage, _dir) = open_temp();
        let instance = Uuid::new_v4();

        storage.put_context("owner-a", instance, "a1", &record(5)).await.unwrap();
        storage.delete_context("owner-a", instance, "a1").await.unwrap();
        storage.delete_context("owner-a", instance, "a1").await.unwrap();

        assert!(storage.get_context("owner-a", instance, "a1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn token_set_union_and_difference() {
        let (storage, _dir) = open_temp();
        let instance = Uuid::new_v4();
        let element = Uuid::new_v4();

        storage.add_token("owner-a", instance, element, b"t1").await.unwrap();
        storage.add_token("owner-a", instance, element, b"t2").await.unwrap();
        storage.add_token("owner-a", instance, element, b"t1").await.unwrap();

        let set = storage.get_tokens("owner-a", instance, element).await.unwrap().unwrap();
        assert_eq!(set.tokens.len(), 2);
        assert_eq!(set.last.as_deref(), Some(b"t1".as_slice()));

        storage.remove_token("owner-a", instance, element, b"t2").await.unwrap();
        storage.remove_token("owner-a", instance, element, b"absent").await.unwrap();
        storage.remove_token("owner-a", Uuid::new_v4(), element, b"t1").await.unwrap();

        let set = storage.get_tokens("owner-a", instance, element).await.unwrap().unwrap();
        assert_eq!(set.tokens.len(), 1);
        assert!(set.tokens.contains(b"t1".as_slice()));
        assert_eq!(set.last.as_deref(), Some(b"t1".as_slice()));
    }

    #[tokio::test]
    async fn instance_bookkeeping_round_trip() {
        let (storage, _dir) = open_temp();
        let (process, instance) = (Uuid::new_v4(), Uuid::new_v4());

        storage.create_instance("owner-a", process, instance, 100).await.unwrap();
        storage.create_instance("owner-a", process, instance, 555).await.unwrap();
        storage.complete_instance("owner-a", process, instance, 200).await.unwrap();

        let record = storage.get_instance("owner-a", process, instance).await.unwrap().unwrap();
        assert_eq!(record.created_secs, 100);
        assert_eq!(record.completed_secs, Some(200));
    }

    #[tokio::test]
    async fn complete_without_create_upserts() {
        let (storage, _dir) = open_temp();
        let (process, instance) = (Uuid::new_v4(), Uuid::new_v4());

        storage.complete_instance("owner-a", process, instance, 300).await.unwrap();

        let record = storage.get_instance("owner-a", process, instance).await.unwrap().unwrap();
        assert_eq!(record.created_secs, 300);
        assert_eq!(record.completed_secs, Some(300));
    }
}
