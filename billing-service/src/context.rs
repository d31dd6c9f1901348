//! Explicit tenant scoping for every engine call.
//!
//! No ambient session state: the scope is a value threaded through each
//! `LifecycleService` operation. Every query it issues predicates on
//! `tenant_id`, and anything outside the scope surfaces as `NotFound`.

use uuid::Uuid;

/// Tenant scope plus the acting user, used for `payments.created_by`
/// attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub actor_id: Uuid,
}

impl TenantContext {
    pub fn new(tenant_id: Uuid, actor_id: Uuid) -> Self {
        Self {
            tenant_id,
            actor_id,
        }
    }
}
