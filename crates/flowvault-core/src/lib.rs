//! Flowvault core: encrypted workflow context store and token ledger.
//!
//! Persists owner-scoped payloads ("context") for running process instances
//! and tracks a per-instance/per-element set of workflow tokens recording
//! execution position. Every payload at rest is individually encrypted with
//! a key derived from an owner master key (OEK) fetched from an external
//! key-management collaborator; the key version is recorded alongside the
//! ciphertext so key rotation never invalidates existing records.
//!
//! # Architecture
//!
//! ```text
//! inbound call
//!      │
//!      ▼
//! authorization gate (external capability, consumed as bool)
//!      │
//!      ├────────────► TokenLedger ──────────► Storage
//!      │                                        ▲
//!      ▼                                        │
//! ContextStore ─► KeyResolver ─► EnvelopeCipher ┘
//!                      │               │
//!                      ▼               ▼
//!              key-management    canonical Value
//!                capability        serializer
//! ```
//!
//! External collaborators are consumed as capability traits: [`Storage`]
//! (persistent column store), [`KeyService`] (key management),
//! [`Authorizer`] (access decisions) and [`Environment`] (randomness and
//! clock). Production implementations of the storage and environment live in
//! the `flowvault-store` crate; this crate ships in-memory implementations
//! for testing and embedded use.
//!
//! # Concurrency
//!
//! Operations execute independently, bounded only by the storage
//! capability's own connection pool; there is no global lock and no
//! cross-record transaction. Context writes are last-write-wins per key.
//! Token set updates rely on the storage capability applying add/remove
//! atomically, so concurrent emit/consume converge. The CPU-bound PBKDF2
//! derivation runs on the blocking pool so it cannot stall the executor.

#![forbid(unsafe_code)]

pub mod auth;
pub mod context;
pub mod env;
pub mod envelope;
mod error;
pub mod instances;
pub mod keys;
pub mod service;
pub mod storage;
#[cfg(test)]
mod test_support;
pub mod tokens;
pub mod value;

pub use auth::{AccessError, Action, AllowAll, Authorizer, CallerContext, Resource};
pub use context::{ContextSelection, ContextStore};
pub use env::Environment;
pub use envelope::{EnvelopeError, IV_LENGTH, KEY_LENGTH, PBKDF2_ITERATIONS};
pub use error::ContextError;
pub use instances::InstanceRegistry;
pub use keys::{KeyError, KeyResolver, KeyService, MemoryKeyService, OwnerKey};
pub use service::ContextService;
pub use storage::{
    ContextKeyRef, EncryptedRecord, InstanceRecord, MemoryStorage, Storage, StorageError,
    StoredTokenSet,
};
pub use tokens::{TokenLedger, TokenState};
pub use value::{Value, ValueError, from_canonical_bytes, to_canonical_bytes};
