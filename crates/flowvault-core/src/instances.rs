//! Instance lifecycle bookkeeping.
//!
//! Thin registry over the instances table: created/completed timestamps
//! keyed by `(owner, process, instance)`. Garbage collection of finished
//! instances is an external concern.

use uuid::Uuid;

use crate::auth::CallerContext;
use crate::env::Environment;
use crate::error::ContextError;
use crate::storage::{InstanceRecord, Storage};

/// Registry for process instance lifecycle rows.
#[derive(Debug, Clone)]
pub struct InstanceRegistry<S, E> {
    storage: S,
    env: E,
}

impl<S: Storage, E: Environment> InstanceRegistry<S, E> {
    /// Build a registry over the shared storage handle.
    pub fn new(storage: S, env: E) -> Self {
        Self { storage, env }
    }

    /// Register an instance, stamping its creation time.
    ///
    /// Idempotent: re-registering keeps the original timestamp. A storage
    /// failure is logged and reported as `Ok(false)`.
    pub async fn create_instance(
        &self,
        ctx: &CallerContext,
        process: Uuid,
        instance: Uuid,
    ) -> Result<bool, ContextError> {
        let created = self.env.wall_clock_secs();
        match self.storage.create_instance(&ctx.owner_id, process, instance, created).await {
            Ok(()) => Ok(true),
            Err(err) => {
                tracing::error!(
                    owner = %ctx.owner_id,
                    %process,
                    %instance,
                    error = %err,
                    "instance insert failed"
                );
                Ok(false)
            },
        }
    }

    /// Mark an instance completed, stamping the completion time.
    pub async fn complete_instance(
        &self,
        ctx: &CallerContext,
        process: Uuid,
        instance: Uuid,
    ) -> Result<bool, ContextError> {
        let completed = self.env.wall_clock_secs();
        match self.storage.complete_instance(&ctx.owner_id, process, instance, completed).await {
            Ok(()) => Ok(true),
            Err(err) => {
                tracing::error!(
                    owner = %ctx.owner_id,
                    %process,
                    %instance,
                    error = %err,
                    "instance update failed"
                );
                Ok(false)
            },
        }
    }

    /// Read the bookkeeping row for an instance. `None` if never registered.
    pub async fn get_instance(
        &self,
        ctx: &CallerContext,
        process: Uuid,
        instance: Uuid,
    ) -> Result<Option<InstanceRecord>, ContextError> {
        Ok(self.storage.get_instance(&ctx.owner_id, process, instance).await?)
    }
}
