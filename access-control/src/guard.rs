//! The access guard: organization matching, scope narrowing, operation
//! validation, and alert sanitization

use crate::context::{Permission, UserContext};
use crate::error::AccessError;
use audit_relay_contracts::{Alert, ResourceScope};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome of an operation check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum AccessDecision {
    Allow,
    Deny { reason: String },
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }

    fn deny(reason: &str) -> Self {
        AccessDecision::Deny {
            reason: reason.to_string(),
        }
    }
}

/// Stateless permission and scope gate
///
/// Scope checks follow strict narrowing: a context carrying a department
/// can only see resources in that department or resources that carry no
/// department at all, and likewise for teams.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessGuard;

impl AccessGuard {
    pub fn new() -> Self {
        Self
    }

    pub fn has_permission(&self, ctx: &UserContext, permission: Permission) -> bool {
        ctx.has_permission(permission)
    }

    /// Strict organization equality. No wildcards.
    pub fn can_access_organization(&self, ctx: &UserContext, organization_id: &str) -> bool {
        ctx.organization_id == organization_id
    }

    pub fn can_access_resource(&self, ctx: &UserContext, resource: &ResourceScope) -> bool {
        if ctx.organization_id != resource.organization_id {
            return false;
        }
        if !narrows(ctx.department_id.as_deref(), resource.department_id.as_deref()) {
            return false;
        }
        narrows(ctx.team_id.as_deref(), resource.team_id.as_deref())
    }

    pub fn can_access_alert(&self, ctx: &UserContext, alert: &Alert) -> bool {
        self.can_access_resource(ctx, &alert.scope())
    }

    /// Validate a named operation against the context and optional target
    /// scope. Unknown operations are denied before permission checks run.
    pub fn validate_operation(
        &self,
        ctx: &UserContext,
        operation: &str,
        resource: Option<&ResourceScope>,
    ) -> AccessDecision {
        let Some(required) = required_permission(operation) else {
            debug!(operation, user = %ctx.user_id, "rejected unknown operation");
            return AccessDecision::deny("Invalid operation");
        };

        if !ctx.has_permission(required) {
            return AccessDecision::deny("Insufficient permissions");
        }

        if let Some(scope) = resource {
            if !self.can_access_resource(ctx, scope) {
                return AccessDecision::deny("Access denied to resource");
            }
        }

        AccessDecision::Allow
    }

    /// Strip operator-only fields from an alert unless the context holds
    /// the configure-thresholds permission. Organization mismatch yields
    /// `None` even though callers should have checked already.
    pub fn sanitize_alert(&self, ctx: &UserContext, alert: &Alert) -> Option<Alert> {
        if ctx.organization_id != alert.organization_id {
            return None;
        }
        let mut sanitized = alert.clone();
        if !ctx.has_permission(Permission::ConfigureThresholds) {
            sanitized.internal_metadata = None;
            sanitized.system_details = None;
        }
        Some(sanitized)
    }

    /// Hard gate used on every mutating path.
    pub fn ensure_same_organization(
        &self,
        ctx: &UserContext,
        organization_id: &str,
    ) -> Result<(), AccessError> {
        if ctx.organization_id == organization_id {
            Ok(())
        } else {
            Err(AccessError::CrossOrgAccessDenied {
                context_org: ctx.organization_id.clone(),
                resource_org: organization_id.to_string(),
            })
        }
    }
}

/// True when the context side may see the resource side under strict
/// narrowing: either side unset, or both equal.
fn narrows(context: Option<&str>, resource: Option<&str>) -> bool {
    match (context, resource) {
        (Some(c), Some(r)) => c == r,
        _ => true,
    }
}

fn required_permission(operation: &str) -> Option<Permission> {
    let permission = match operation {
        "view_alerts" | "view_destinations" | "view_archives" => Permission::View,
        "acknowledge_alert" => Permission::Acknowledge,
        "resolve_alert" => Permission::Resolve,
        "configure_thresholds" => Permission::ConfigureThresholds,
        // Archival lifecycle operations are admin-tier.
        "manage_archives" | "purge_audit_records" => Permission::ConfigureThresholds,
        "manage_maintenance_windows" => Permission::ManageMaintenanceWindows,
        "suppress_alert" => Permission::Suppress,
        "escalate_alert" => Permission::Escalate,
        _ => return None,
    };
    Some(permission)
}
