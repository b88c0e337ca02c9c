//! Owner encryption key (OEK) resolution.
//!
//! Keys live in an external key-management collaborator. The resolver fetches
//! either the current OEK (for writes) or a historical OEK by id (for reads
//! of records written before a rotation) and validates the response shape.
//! Key material is held only for the duration of the call; the core never
//! persists it.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::CallerContext;

/// An owner encryption key as returned by the key-management collaborator.
///
/// A `keyId` once used to encrypt a record must remain resolvable forever:
/// rotation adds new ids, it never removes old ones. That contract belongs
/// to the collaborator; the core records the id with every ciphertext and
/// resolves by it on read.
#[derive(Clone, PartialEq, Eq)]
pub struct OwnerKey {
    /// Key version id, persisted next to every ciphertext written under it
    pub id: Uuid,
    /// Raw key material; used as the PBKDF2 password, never as a cipher key
    pub material: Vec<u8>,
}

// Manual Debug: key material must not end up in logs.
impl std::fmt::Debug for OwnerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerKey").field("id", &self.id).field("material", &"<redacted>").finish()
    }
}

/// Errors from key resolution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Key-management collaborator unreachable or refused the request
    #[error("key service call failed for owner {owner}: {reason}")]
    Unavailable {
        /// Owner the key was requested for
        owner: String,
        /// Collaborator-reported failure
        reason: String,
    },

    /// Collaborator answered with an empty id or empty key material
    #[error("key service returned a malformed key for owner {owner}")]
    Malformed {
        /// Owner the key was requested for
        owner: String,
    },

    /// No key exists for the requested id
    #[error("no key {key_id} for owner {owner}")]
    UnknownKeyId {
        /// Owner the key was requested for
        owner: String,
        /// Requested historical key id
        key_id: Uuid,
    },
}

/// Key-management capability.
///
/// `key_id = None` requests the current OEK; `Some(id)` requests that exact
/// historical version. The caller context is passed through so the
/// collaborator can apply its own per-owner key isolation.
#[async_trait]
pub trait KeyService: Send + Sync + 'static {
    /// Fetch an owner encryption key.
    async fn owner_key(
        &self,
        ctx: &CallerContext,
        key_id: Option<Uuid>,
    ) -> Result<OwnerKey, KeyError>;
}

/// Validating front over a [`KeyService`].
///
/// Holds no mutable state and caches nothing: every call goes to the
/// collaborator, and key material lives only in the returned value.
#[derive(Debug, Clone)]
pub struct KeyResolver<K> {
    service: K,
}

impl<K: KeyService> KeyResolver<K> {
    /// Wrap a key service.
    pub fn new(service: K) -> Self {
        Self { service }
    }

    /// Current OEK for the calling owner. Used for every context write.
    pub async fn current_key(&self, ctx: &CallerContext) -> Result<OwnerKey, KeyError> {
        let key = self.service.owner_key(ctx, None).await?;
        Self::validate(ctx, key)
    }

    /// Historical OEK by id. Used on read, pinned to the key id stored on
    /// the record, which is what makes rotation safe.
    pub async fn key_by_id(&self, ctx: &CallerContext, id: Uuid) -> Result<OwnerKey, KeyError> {
        let key = self.service.owner_key(ctx, Some(id)).await?;
        Self::validate(ctx, key)
    }

    fn validate(ctx: &CallerContext, key: OwnerKey) -> Result<OwnerKey, KeyError> {
        if key.id.is_nil() || key.material.is_empty() {
            tracing::error!(owner = %ctx.owner_id, "key service returned malformed key");
            return Err(KeyError::Malformed { owner: ctx.owner_id.clone() });
        }
        Ok(key)
    }
}

/// In-memory key service with rotation, for tests and embedded use.
///
/// Keeps every generated key resolvable by id after rotation, matching the
/// contract required of a real key-management collaborator.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyService {
    inner: std::sync::Arc<std::sync::Mutex<MemoryKeyServiceInner>>,
}

#[derive(Debug, Default)]
struct MemoryKeyServiceInner {
    /// Per owner: all key versions ever issued, current one last
    keys: std::collections::HashMap<String, Vec<OwnerKey>>,
}

impl MemoryKeyService {
    /// Create an empty key service; owners get keys on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rotate the owner's current key, returning the new key id.
    ///
    /// Previously issued ids stay resolvable.
    pub fn rotate(&self, owner: &str, material: impl Into<Vec<u8>>) -> Result<Uuid, KeyError> {
        let mut inner = self.lock(owner)?;
        let key = OwnerKey { id: Uuid::new_v4(), material: material.into() };
        let id = key.id;
        inner.keys.entry(owner.to_string()).or_default().push(key);
        Ok(id)
    }

    fn lock(
        &self,
        owner: &str,
    ) -> Result<std::sync::MutexGuard<'_, MemoryKeyServiceInner>, KeyError> {
        self.inner.lock().map_err(|_| KeyError::Unavailable {
            owner: owner.to_string(),
            reason: "poisoned lock".to_string(),
        })
    }
}

#[async_trait]
impl KeyService for MemoryKeyService {
    async fn owner_key(
        &self,
        ctx: &CallerContext,
        key_id: Option<Uuid>,
    ) -> Result<OwnerKey, KeyError> {
        let mut inner = self.lock(&ctx.owner_id)?;
        let versions = inner.keys.entry(ctx.owner_id.clone()).or_insert_with(|| {
            // First touch: issue an initial key for the owner.
            let mut material = vec![0u8; 32];
            for (i, byte) in material.iter_mut().enumerate() {
                *byte = (i as u8) ^ ctx.owner_id.len() as u8;
            }
            vec![OwnerKey { id: Uuid::new_v4(), material }]
        });

        match key_id {
            None => versions.last().cloned().ok_or_else(|| KeyError::Malformed {
                owner: ctx.owner_id.clone(),
            }),
            Some(id) => versions.iter().find(|k| k.id == id).cloned().ok_or(
                KeyError::UnknownKeyId { owner: ctx.owner_id.clone(), key_id: id },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn current_key_is_issued_on_first_use() {
        let service = MemoryKeyService::new();
        let resolver = KeyResolver::new(service);
        let ctx = CallerContext::new("owner-a");

        let key = resolver.current_key(&ctx).await.unwrap();
        assert!(!key.id.is_nil());
        assert!(!key.material.is_empty());
    }

    #[tokio::test]
    async fn rotation_changes_current_but_keeps_old_resolvable() {
        let service = MemoryKeyService::new();
        let ctx = CallerContext::new("owner-a");
        let resolver = KeyResolver::new(service.clone());

        let first = resolver.current_key(&ctx).await.unwrap();
        let rotated_id = service.rotate("owner-a", b"fresh material".to_vec()).unwrap();

        let current = resolver.current_key(&ctx).await.unwrap();
        assert_eq!(current.id, rotated_id);
        assert_ne!(current.id, first.id);

        let historical = resolver.key_by_id(&ctx, first.id).await.unwrap();
        assert_eq!(historical, first);
    }

    #[tokio::test]
    async fn unknown_key_id_is_an_error() {
        let resolver = KeyResolver::new(MemoryKeyService::new());
        let ctx = CallerContext::new("owner-a");

        // Materialize the owner first so the id lookup is the failing part.
        resolver.current_key(&ctx).await.unwrap();

        let result = resolver.key_by_id(&ctx, Uuid::new_v4()).await;
        assert!(matches!(result, Err(KeyError::UnknownKeyId { .. })));
    }

    #[tokio::test]
    async fn owners_get_isolated_keys() {
        let resolver = KeyResolver::new(MemoryKeyService::new());

        let a = resolver.current_key(&CallerContext::new("owner-a")).await.unwrap();
        let b = resolver.current_key(&CallerContext::new("owner-b")).await.unwrap();

        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn malformed_keys_are_rejected() {
        struct BrokenService;

        #[async_trait]
        impl KeyService for BrokenService {
            async fn owner_key(
                &self,
                _ctx: &CallerContext,
                _key_id: Option<Uuid>,
            ) -> Result<OwnerKey, KeyError> {
                Ok(OwnerKey { id: Uuid::nil(), material: vec![] })
            }
        }

        let resolver = KeyResolver::new(BrokenService);
        let result = resolver.current_key(&CallerContext::new("owner-a")).await;

        assert!(matches!(result, Err(KeyError::Malformed { .. })));
    }

    #[test]
    fn debug_redacts_material() {
        let key = OwnerKey { id: Uuid::new_v4(), material: b"super secret".to_vec() };
        let rendered = format!("{key:?}");

        assert!(!rendered.contains("super secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
