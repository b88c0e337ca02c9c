//! Token ledger: per-element multiset of workflow tokens.
//!
//! Tokens record execution position: membership in the set means "currently
//! active at this element". Membership is decided by the token's canonical
//! byte encoding, which is why the serializer must be deterministic for
//! structurally equal values — two equal tokens that encoded differently
//! would silently break deduplication.
//!
//! Tokens are not encrypted; they carry engine position markers, not user
//! payloads. Payload data belongs in the context store.

use uuid::Uuid;

use crate::auth::CallerContext;
use crate::error::ContextError;
use crate::storage::Storage;
use crate::value::{self, Value};

/// Current token state for one `(owner, instance, element)` scope.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TokenState {
    /// Most recently emitted token, independent of set membership
    pub last: Option<Value>,
    /// Currently active tokens, in canonical-encoding order
    pub tokens: Vec<Value>,
}

/// Token ledger over a storage capability.
///
/// The element id defaults to the instance id when absent (root scope).
/// Convergence under concurrent emit/consume comes from the storage
/// capability's atomic set update, not from any locking here.
#[derive(Debug, Clone)]
pub struct TokenLedger<S> {
    storage: S,
}

impl<S: Storage> TokenLedger<S> {
    /// Build a ledger over the shared storage handle.
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Emit a token: set-union into the element's set and record as `last`.
    ///
    /// Idempotent on membership; re-emitting an identical token leaves the
    /// set's cardinality unchanged. A storage failure is logged and reported
    /// as `Ok(false)`.
    pub async fn save_token(
        &self,
        ctx: &CallerContext,
        instance: Uuid,
        element: Option<Uuid>,
        token: &Value,
    ) -> Result<bool, ContextError> {
        let element = element.unwrap_or(instance);
        let encoded = value::to_canonical_bytes(token)?;

        match self.storage.add_token(&ctx.owner_id, instance, element, &encoded).await {
            Ok(()) => Ok(true),
            Err(err) => {
                tracing::error!(
                    owner = %ctx.owner_id,
                    %instance,
                    %element,
                    error = %err,
                    "token emit failed"
                );
                Ok(false)
            },
        }
    }

    /// Consume a token: set-difference from the element's set.
    ///
    /// Removing a non-member is a no-op, not an error; `last` is untouched.
    /// A storage failure is logged and reported as `Ok(false)`.
    pub async fn remove_token(
        &self,
        ctx: &CallerContext,
        instance: Uuid,
        element: Option<Uuid>,
        token: &Value,
    ) -> Result<bool, ContextError> {
        let element = element.unwrap_or(instance);
        let encoded = value::to_canonical_bytes(token)?;

        match self.storage.remove_token(&ctx.owner_id, instance, element, &encoded).await {
            Ok(()) => Ok(true),
            Err(err) => {
                tracing::error!(
                    owner = %ctx.owner_id,
                    %instance,
                    %element,
                    error = %err,
                    "token consume failed"
                );
                Ok(false)
            },
        }
    }

    /// Read the full token state for an element.
    ///
    /// An absent ledger row is an empty state, never an error.
    pub async fn get_token(
        &self,
        ctx: &CallerContext,
        instance: Uuid,
        element: Option<Uuid>,
    ) -> Result<TokenState, ContextError> {
        let element = element.unwrap_or(instance);

        let Some(stored) = self.storage.get_tokens(&ctx.owner_id, instance, element).await? else {
            return Ok(TokenState::default());
        };

        let last = stored.last.as_deref().map(value::from_canonical_bytes).transpose()?;
        let tokens = stored
            .tokens
            .iter()
            .map(|bytes| value::from_canonical_bytes(bytes))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TokenState { last, tokens })
    }
}
