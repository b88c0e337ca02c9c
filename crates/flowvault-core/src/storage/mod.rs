//! Storage capability for context records, token sets and instances.
//!
//! Trait-based abstraction over the persistent column store. Three logical
//! tables, all keyed by owner-scoped composite keys:
//!
//! - context records: `(owner, instance, key)` -> encrypted payload
//! - token sets: `(owner, instance, element)` -> `last` + token multiset
//! - instances: `(owner, process, instance)` -> created/completed timestamps
//!
//! The trait is async because every call is I/O against an external engine.
//! Connection management, retries and backoff belong to the implementation;
//! the core only issues prepared-statement-style primitives.

mod error;
mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
pub use error::StorageError;
pub use memory::MemoryStorage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::IV_LENGTH;

/// An encrypted context payload at rest.
///
/// Always fully encrypted; plaintext never reaches storage. The key id pins
/// which OEK version wrote the record so rotation never strands it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    /// AES-256-CBC ciphertext of the canonical payload encoding
    pub ciphertext: Vec<u8>,
    /// OEK version the record was encrypted under
    pub key_id: Uuid,
    /// Per-write random IV, also the PBKDF2 salt
    pub iv: [u8; IV_LENGTH],
}

/// Stored token state for one `(owner, instance, element)` scope.
///
/// `tokens` is a true set over serialized token bytes: the `BTreeSet` makes
/// re-adding a member a no-op and keeps iteration order stable. `last` tracks
/// the most recently emitted token independent of membership.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoredTokenSet {
    /// Most recently emitted token, untouched by removals
    pub last: Option<Vec<u8>>,
    /// Currently active tokens, deduplicated by serialized representation
    pub tokens: BTreeSet<Vec<u8>>,
}

/// Lifecycle bookkeeping row for a process instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Unix seconds when the instance was registered
    pub created_secs: u64,
    /// Unix seconds when the instance completed, if it has
    pub completed_secs: Option<u64>,
}

/// Identity of a context record, returned by key listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextKeyRef {
    /// Owning tenant
    pub owner_id: String,
    /// Process instance
    pub instance_id: Uuid,
    /// Context key
    pub key: String,
}

/// Storage capability for the context store, token ledger and instance
/// registry.
///
/// Must be Clone (one process-wide handle shared across components; clones
/// share the underlying connection), Send + Sync, and is consumed through
/// async methods since every call is I/O.
///
/// # Concurrency
///
/// `add_token`/`remove_token` must be commutative and associative under
/// concurrent application: concurrent adds and removes from different
/// callers converge without the core serializing them. Both provided
/// implementations apply them atomically (lock or write transaction).
/// Context writes are last-write-wins per key.
#[async_trait]
pub trait Storage: Clone + Send + Sync + 'static {
    /// Upsert a context record. Overwrites any record at the same identity.
    async fn put_context(
        &self,
        owner: &str,
        instance: Uuid,
        key: &str,
        record: &EncryptedRecord,
    ) -> Result<(), StorageError>;

    /// Read a context record. `None` if absent.
    async fn get_context(
        &self,
        owner: &str,
        instance: Uuid,
        key: &str,
    ) -> Result<Option<EncryptedRecord>, StorageError>;

    /// List all context keys stored for an instance. Metadata only, no
    /// payloads.
    async fn list_context_keys(
        &self,
        owner: &str,
        instance: Uuid,
    ) -> Result<Vec<String>, StorageError>;

    /// Hard-delete a context record. Deleting an absent record is a no-op.
    async fn delete_context(
        &self,
        owner: &str,
        instance: Uuid,
        key: &str,
    ) -> Result<(), StorageError>;

    /// Add a token to the element's set and record it as `last`.
    ///
    /// Set-union: adding a member that is already present leaves the set's
    /// cardinality unchanged (but still updates `last`).
    async fn add_token(
        &self,
        owner: &str,
        instance: Uuid,
        element: Uuid,
        token: &[u8],
    ) -> Result<(), StorageError>;

    /// Remove a token from the element's set. `last` is untouched.
    ///
    /// Set-difference: removing a non-member (or from an absent row) is a
    /// no-op.
    async fn remove_token(
        &self,
        owner: &str,
        instance: Uuid,
        element: Uuid,
        token: &[u8],
    ) -> Result<(), StorageError>;

    /// Read the token set for an element. `None` if no ledger row exists.
    async fn get_tokens(
        &self,
        owner: &str,
        instance: Uuid,
        element: Uuid,
    ) -> Result<Option<StoredTokenSet>, StorageError>;

    /// Register an instance. Idempotent: an existing row keeps its original
    /// `created_secs`.
    async fn create_instance(
        &self,
        owner: &str,
        process: Uuid,
        instance: Uuid,
        created_secs: u64,
    ) -> Result<(), StorageError>;

    /// Mark an instance completed. Upserts: a row missing its create (e.g.
    /// written by an older service version) is stamped with
    /// `created_secs = completed_secs`.
    async fn complete_instance(
        &self,
        owner: &str,
        process: Uuid,
        instance: Uuid,
        completed_secs: u64,
    ) -> Result<(), StorageError>;

    /// Read instance bookkeeping. `None` if never registered.
    async fn get_instance(
        &self,
        owner: &str,
        process: Uuid,
        instance: Uuid,
    ) -> Result<Option<InstanceRecord>, StorageError>;
}
