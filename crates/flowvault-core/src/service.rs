//! Service facade: the full public operation surface.
//!
//! Wires the authorization gate in front of the context store, token ledger
//! and instance registry, all sharing one cloned storage handle. Every
//! operation checks the capability before touching anything; a denial
//! produces no side effect.

use uuid::Uuid;

use crate::auth::{AccessError, Action, Authorizer, CallerContext, Resource};
use crate::context::{ContextSelection, ContextStore};
use crate::env::Environment;
use crate::error::ContextError;
use crate::instances::InstanceRegistry;
use crate::keys::KeyService;
use crate::storage::{InstanceRecord, Storage};
use crate::tokens::{TokenLedger, TokenState};
use crate::value::Value;

/// The encrypted context and token service.
///
/// Generic over the four injected capabilities: storage handle, key service,
/// authorizer and environment.
#[derive(Debug, Clone)]
pub struct ContextService<S, K, A, E> {
    authorizer: A,
    context: ContextStore<S, K, E>,
    tokens: TokenLedger<S>,
    instances: InstanceRegistry<S, E>,
}

impl<S, K, A, E> ContextService<S, K, A, E>
where
    S: Storage,
    K: KeyService,
    A: Authorizer,
    E: Environment,
{
    /// Assemble the service from its collaborators.
    ///
    /// The storage handle is cloned into each component; clones share the
    /// same underlying connection, so there is one process-wide handle.
    pub fn new(storage: S, keys: K, authorizer: A, env: E) -> Self {
        Self {
            context: ContextStore::new(storage.clone(), keys, env.clone()),
            tokens: TokenLedger::new(storage.clone()),
            instances: InstanceRegistry::new(storage, env),
            authorizer,
        }
    }

    async fn authorize(
        &self,
        ctx: &CallerContext,
        instance: Uuid,
        action: Action,
    ) -> Result<(), ContextError> {
        let resource = Resource::Instance(instance);
        if self.authorizer.is_authorized(ctx, &resource, action).await {
            Ok(())
        } else {
            tracing::debug!(owner = %ctx.owner_id, %instance, %action, "authorization denied");
            Err(AccessError::Denied { action, instance }.into())
        }
    }

    /// Write a payload into the instance context. See [`ContextStore::add`].
    pub async fn add(
        &self,
        ctx: &CallerContext,
        instance: Uuid,
        key: &str,
        value: &Value,
    ) -> Result<bool, ContextError> {
        self.authorize(ctx, instance, Action::Add).await?;
        self.context.add(ctx, instance, key, value).await
    }

    /// Read a payload from the instance context. See [`ContextStore::get`].
    pub async fn get(
        &self,
        ctx: &CallerContext,
        instance: Uuid,
        key: &str,
    ) -> Result<Option<Value>, ContextError> {
        self.authorize(ctx, instance, Action::Get).await?;
        self.context.get(ctx, instance, key).await
    }

    /// Batch read, or list all keys when `keys` is empty. See
    /// [`ContextStore::get_keys`].
    pub async fn get_keys(
        &self,
        ctx: &CallerContext,
        instance: Uuid,
        keys: &[String],
    ) -> Result<ContextSelection, ContextError> {
        self.authorize(ctx, instance, Action::Get).await?;
        self.context.get_keys(ctx, instance, keys).await
    }

    /// Delete a payload from the instance context. See
    /// [`ContextStore::remove`].
    pub async fn remove(
        &self,
        ctx: &CallerContext,
        instance: Uuid,
        key: &str,
    ) -> Result<bool, ContextError> {
        self.authorize(ctx, instance, Action::Remove).await?;
        self.context.remove(ctx, instance, key).await
    }

    /// Emit a workflow token. See [`TokenLedger::save_token`].
    pub async fn save_token(
        &self,
        ctx: &CallerContext,
        process: Uuid,
        instance: Uuid,
        element: Option<Uuid>,
        token: &Value,
    ) -> Result<bool, ContextError> {
        self.authorize(ctx, instance, Action::SaveToken).await?;
        tracing::debug!(owner = %ctx.owner_id, %process, %instance, "token emit");
        self.tokens.save_token(ctx, instance, element, token).await
    }

    /// Consume a workflow token. See [`TokenLedger::remove_token`].
    pub async fn remove_token(
        &self,
        ctx: &CallerContext,
        process: Uuid,
        instance: Uuid,
        element: Option<Uuid>,
        token: &Value,
    ) -> Result<bool, ContextError> {
        self.authorize(ctx, instance, Action::RemoveToken).await?;
        tracing::debug!(owner = %ctx.owner_id, %process, %instance, "token consume");
        self.tokens.remove_token(ctx, instance, element, token).await
    }

    /// Read the token state for an element. See [`TokenLedger::get_token`].
    pub async fn get_token(
        &self,
        ctx: &CallerContext,
        process: Uuid,
        instance: Uuid,
        element: Option<Uuid>,
    ) -> Result<TokenState, ContextError> {
        self.authorize(ctx, instance, Action::GetToken).await?;
        tracing::debug!(owner = %ctx.owner_id, %process, %instance, "token read");
        self.tokens.get_token(ctx, instance, element).await
    }

    /// Register a process instance. See
    /// [`InstanceRegistry::create_instance`].
    pub async fn create_instance(
        &self,
        ctx: &CallerContext,
        process: Uuid,
        instance: Uuid,
    ) -> Result<bool, ContextError> {
        self.authorize(ctx, instance, Action::CreateInstance).await?;
        self.instances.create_instance(ctx, process, instance).await
    }

    /// Mark a process instance completed. See
    /// [`InstanceRegistry::complete_instance`].
    pub async fn complete_instance(
        &self,
        ctx: &CallerContext,
        process: Uuid,
        instance: Uuid,
    ) -> Result<bool, ContextError> {
        self.authorize(ctx, instance, Action::CompleteInstance).await?;
        self.instances.complete_instance(ctx, process, instance).await
    }

    /// Read instance bookkeeping. See [`InstanceRegistry::get_instance`].
    pub async fn get_instance(
        &self,
        ctx: &CallerContext,
        process: Uuid,
        instance: Uuid,
    ) -> Result<Option<InstanceRecord>, ContextError> {
        self.authorize(ctx, instance, Action::Get).await?;
        self.instances.get_instance(ctx, process, instance).await
    }
}
