//! Context store: encrypted CRUD over `(owner, instance, key)` payloads.
//!
//! Orchestrates serializer, key resolver and envelope cipher around the
//! storage capability. Every payload is encrypted before it reaches storage
//! and decrypted with the OEK version recorded on the record, so key
//! rotation never invalidates existing data.
//!
//! The PBKDF2 derivation is CPU-bound, so both encrypt and decrypt run on
//! the blocking pool rather than stalling the async executor.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::auth::CallerContext;
use crate::env::Environment;
use crate::envelope::{self, EnvelopeError, IV_LENGTH};
use crate::error::ContextError;
use crate::keys::{KeyResolver, KeyService};
use crate::storage::{ContextKeyRef, EncryptedRecord, Storage};
use crate::value::{self, Value};

/// Result of a `get_keys` batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextSelection {
    /// Decrypted values for the requested keys; missing keys are simply
    /// absent
    Values(BTreeMap<String, Value>),
    /// All key identities present for the instance (metadata listing, no
    /// decryption)
    Keys(Vec<ContextKeyRef>),
}

/// Encrypted context store over a storage capability.
///
/// Stateless beyond its injected collaborators; safe to share across
/// concurrent operations.
#[derive(Debug, Clone)]
pub struct ContextStore<S, K, E> {
    storage: S,
    resolver: KeyResolver<K>,
    env: E,
}

impl<S: Storage, K: KeyService, E: Environment> ContextStore<S, K, E> {
    /// Build a store over the shared storage handle, key service and
    /// environment.
    pub fn new(storage: S, keys: K, env: E) -> Self {
        Self { storage, resolver: KeyResolver::new(keys), env }
    }

    /// Write (upsert) a payload under `(owner, instance, key)`.
    ///
    /// Serializes, fetches the current OEK, generates a fresh IV, encrypts,
    /// then writes. Key-resolution, serialization and encryption failures
    /// abort before any storage mutation and propagate. A storage write
    /// failure is logged and reported as `Ok(false)`; retry policy belongs
    /// to the storage capability, not this layer.
    pub async fn add(
        &self,
        ctx: &CallerContext,
        instance: Uuid,
        key: &str,
        value: &Value,
    ) -> Result<bool, ContextError> {
        let plaintext = value::to_canonical_bytes(value)?;
        let oek = self.resolver.current_key(ctx).await?;

        let iv = self.env.random_iv();
        let ciphertext = offload_encrypt(plaintext, oek.material, iv).await?;

        let record = EncryptedRecord { ciphertext, key_id: oek.id, iv };
        match self.storage.put_context(&ctx.owner_id, instance, key, &record).await {
            Ok(()) => Ok(true),
            Err(err) => {
                tracing::error!(
                    owner = %ctx.owner_id,
                    %instance,
                    key,
                    error = %err,
                    "context insert failed"
                );
                Ok(false)
            },
        }
    }

    /// Read and decrypt the payload at `(owner, instance, key)`.
    ///
    /// Absence is `Ok(None)`, never an error. The OEK is resolved by the
    /// key id stored on the record, not the current one. Key-resolution and
    /// decryption failures propagate, distinct from absence.
    pub async fn get(
        &self,
        ctx: &CallerContext,
        instance: Uuid,
        key: &str,
    ) -> Result<Option<Value>, ContextError> {
        let Some(record) = self.storage.get_context(&ctx.owner_id, instance, key).await? else {
            return Ok(None);
        };

        let oek = match self.resolver.key_by_id(ctx, record.key_id).await {
            Ok(oek) => oek,
            Err(err) => {
                tracing::error!(
                    owner = %ctx.owner_id,
                    key_id = %record.key_id,
                    "failed to retrieve owner encryption key"
                );
                return Err(err.into());
            },
        };

        let plaintext = offload_decrypt(record.ciphertext, oek.material, record.iv).await?;
        Ok(Some(value::from_canonical_bytes(&plaintext)?))
    }

    /// Batch read.
    ///
    /// With a non-empty `keys` list, fans out to [`ContextStore::get`] per
    /// key and assembles a mapping: missing keys are absent from the result
    /// and per-key failures are logged and swallowed so one bad key never
    /// fails its siblings. With an empty list, returns the identities of all
    /// keys stored for the instance without decrypting anything.
    pub async fn get_keys(
        &self,
        ctx: &CallerContext,
        instance: Uuid,
        keys: &[String],
    ) -> Result<ContextSelection, ContextError> {
        if keys.is_empty() {
            let listed = self.storage.list_context_keys(&ctx.owner_id, instance).await?;
            let refs = listed
                .into_iter()
                .map(|key| ContextKeyRef {
                    owner_id: ctx.owner_id.clone(),
                    instance_id: instance,
                    key,
                })
                .collect();
            return Ok(ContextSelection::Keys(refs));
        }

        let mut values = BTreeMap::new();
        for key in keys {
            match self.get(ctx, instance, key).await {
                Ok(Some(value)) => {
                    values.insert(key.clone(), value);
                },
                Ok(None) => {},
                Err(err) => {
                    tracing::warn!(
                        owner = %ctx.owner_id,
                        %instance,
                        key,
                        error = %err,
                        "skipping failed key in batch get"
                    );
                },
            }
        }
        Ok(ContextSelection::Values(values))
    }

    /// Hard-delete the record at `(owner, instance, key)`.
    ///
    /// Prior absence is not an error. A storage failure is logged and
    /// reported as `Ok(false)`.
    pub async fn remove(
        &self,
        ctx: &CallerContext,
        instance: Uuid,
        key: &str,
    ) -> Result<bool, ContextError> {
        match self.storage.delete_context(&ctx.owner_id, instance, key).await {
            Ok(()) => Ok(true),
            Err(err) => {
                tracing::error!(
                    owner = %ctx.owner_id,
                    %instance,
                    key,
                    error = %err,
                    "context delete failed"
                );
                Ok(false)
            },
        }
    }
}

/// Run derive+encrypt on the blocking pool.
async fn offload_encrypt(
    plaintext: Vec<u8>,
    material: Vec<u8>,
    iv: [u8; IV_LENGTH],
) -> Result<Vec<u8>, ContextError> {
    let handle =
        tokio::task::spawn_blocking(move || envelope::encrypt(&plaintext, &material, &iv));
    match handle.await {
        Ok(result) => Ok(result?),
        Err(join) => Err(EnvelopeError::EncryptionFailed {
            reason: format!("blocking task failed: {join}"),
        }
        .into()),
    }
}

/// Run derive+decrypt on the blocking pool.
async fn offload_decrypt(
    ciphertext: Vec<u8>,
    material: Vec<u8>,
    iv: [u8; IV_LENGTH],
) -> Result<Vec<u8>, ContextError> {
    let handle =
        tokio::task::spawn_blocking(move || envelope::decrypt(&ciphertext, &material, &iv));
    match handle.await {
        Ok(result) => Ok(result?),
        Err(join) => Err(EnvelopeError::DecryptionFailed {
            reason: format!("blocking task failed: {join}"),
        }
        .into()),
    }
}
