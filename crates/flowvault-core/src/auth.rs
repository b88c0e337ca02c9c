//! Caller context and the authorization gate.
//!
//! The authorization decision itself is external: the service only consumes
//! a boolean capability check keyed by (caller, resource, action). The gate
//! runs as an explicit stage before every core operation; the core never
//! re-implements authorization logic.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Identity metadata attached to every inbound call.
///
/// The owner (tenant) is resolved upstream from the caller's credentials and
/// arrives here as an opaque id; the core scopes every record by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    /// Owner/tenant id, already resolved upstream
    pub owner_id: String,
    /// Acting user, if known (logging only)
    pub user_id: Option<String>,
}

impl CallerContext {
    /// Context for the given owner with no user attribution.
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self { owner_id: owner_id.into(), user_id: None }
    }
}

/// A resource an operation acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// A running process instance
    Instance(Uuid),
}

/// Operations subject to the capability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Write a context payload
    Add,
    /// Read a context payload
    Get,
    /// Delete a context payload
    Remove,
    /// Emit a workflow token
    SaveToken,
    /// Consume a workflow token
    RemoveToken,
    /// Read the token set
    GetToken,
    /// Register a process instance
    CreateInstance,
    /// Mark a process instance completed
    CompleteInstance,
}

impl Action {
    /// Stable name used in logs and denial errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Get => "get",
            Action::Remove => "remove",
            Action::SaveToken => "saveToken",
            Action::RemoveToken => "removeToken",
            Action::GetToken => "getToken",
            Action::CreateInstance => "createInstance",
            Action::CompleteInstance => "completeInstance",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorization failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Capability check returned false
    #[error("not authorized: {action} on instance {instance}")]
    Denied {
        /// Attempted operation
        action: Action,
        /// Target instance
        instance: Uuid,
    },
}

/// Authorization capability: decides whether a caller may act on a resource.
///
/// Implemented by the surrounding service platform; the core only consumes
/// the outcome.
#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    /// True if the caller may perform `action` on `resource`.
    async fn is_authorized(
        &self,
        ctx: &CallerContext,
        resource: &Resource,
        action: Action,
    ) -> bool;
}

/// Permissive authorizer for tests and single-tenant embedding.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn is_authorized(
        &self,
        _ctx: &CallerContext,
        _resource: &Resource,
        _action: Action,
    ) -> bool {
        true
    }
}
