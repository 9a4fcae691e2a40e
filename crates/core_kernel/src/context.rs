//! Tenant-scoped request context
//!
//! Every billing operation receives a [`RequestContext`] explicitly. It carries
//! the resolved tenant, the acting principal used for audit stamping and a
//! cancellation token. There is no ambient per-request state.

use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::identifiers::TenantId;
use crate::ports::PortError;

/// Actor recorded on automated (scheduled) writes
pub const SYSTEM_ACTOR: &str = "system";

/// Entities that belong to exactly one tenant
pub trait TenantScoped {
    /// The owning tenant
    fn tenant_id(&self) -> TenantId;
}

/// Context passed into every core operation
#[derive(Debug, Clone)]
pub struct RequestContext {
    tenant_id: TenantId,
    actor: String,
    cancellation: CancellationToken,
}

impl RequestContext {
    /// Builds a context from the tenant resolver and identity outputs
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Unauthorized` when no tenant was resolved or the
    /// resolved tenant is the nil identifier.
    pub fn resolve(tenant_id: Option<TenantId>, actor: Option<&str>) -> Result<Self, CoreError> {
        let tenant_id = tenant_id
            .filter(|t| !t.is_nil())
            .ok_or_else(|| CoreError::unauthorized("request has no resolved tenant"))?;

        let actor = actor
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(SYSTEM_ACTOR);

        Ok(Self {
            tenant_id,
            actor: actor.to_string(),
            cancellation: CancellationToken::new(),
        })
    }

    /// Creates a context for a known tenant and actor
    pub fn new(tenant_id: TenantId, actor: impl AsRef<str>) -> Result<Self, CoreError> {
        Self::resolve(Some(tenant_id), Some(actor.as_ref()))
    }

    /// Creates a context for automated paths, stamped with the system actor
    pub fn system(tenant_id: TenantId) -> Result<Self, CoreError> {
        Self::resolve(Some(tenant_id), None)
    }

    /// Attaches an external cancellation signal
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The tenant every read and write is scoped to
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// The principal stamped into audit fields
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// The cancellation token for this request
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns true once the caller has requested cancellation
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fails with `PortError::Cancelled` if cancellation was requested
    pub fn check_cancelled(&self) -> Result<(), PortError> {
        if self.is_cancelled() {
            return Err(PortError::Cancelled);
        }
        Ok(())
    }

    /// Returns true when the entity belongs to this context's tenant
    pub fn owns<T: TenantScoped>(&self, entity: &T) -> bool {
        entity.tenant_id() == self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tenant_is_unauthorized() {
        let result = RequestContext::resolve(None, Some("alice"));
        assert!(matches!(result, Err(CoreError::Unauthorized(_))));
    }

    #[test]
    fn test_blank_actor_defaults_to_system() {
        let ctx = RequestContext::resolve(Some(TenantId::new()), Some("  ")).unwrap();
        assert_eq!(ctx.actor(), SYSTEM_ACTOR);
    }

    #[test]
    fn test_cancellation_is_observed() {
        let token = CancellationToken::new();
        let ctx = RequestContext::system(TenantId::new())
            .unwrap()
            .with_cancellation(token.clone());

        assert!(ctx.check_cancelled().is_ok());
        token.cancel();
        assert!(matches!(ctx.check_cancelled(), Err(PortError::Cancelled)));
    }
}
