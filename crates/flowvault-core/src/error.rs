//! Unified error taxonomy for context and token operations.
//!
//! Propagation policy:
//!
//! - Key-resolution, serialization and encryption failures abort a write
//!   before any storage mutation and propagate — a context write must never
//!   silently "succeed" unencrypted.
//! - Storage failures on mutating operations are caught at the store/ledger
//!   layer, logged with full query context, and reported as `Ok(false)`.
//!   Callers treat `false` as "not guaranteed persisted".
//! - Decryption failure on read propagates as an error, distinct from record
//!   absence, which is `Ok(None)`.
//! - Per-key failures inside a `get_keys` batch are isolated and never fail
//!   sibling keys.

use thiserror::Error;

use crate::auth::AccessError;
use crate::envelope::EnvelopeError;
use crate::keys::KeyError;
use crate::storage::StorageError;
use crate::value::ValueError;

/// Errors surfaced by context, token and instance operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// Authorization capability denied the operation
    #[error(transparent)]
    Denied(#[from] AccessError),

    /// Owner encryption key could not be resolved
    #[error(transparent)]
    KeyResolution(#[from] KeyError),

    /// Envelope cipher failed (encryption on write, decryption on read)
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Payload/token could not be (de)serialized
    #[error(transparent)]
    Serialization(#[from] ValueError),

    /// Storage read failed (write failures are reported as `false` instead)
    #[error(transparent)]
    Storage(#[from] StorageError),
}
