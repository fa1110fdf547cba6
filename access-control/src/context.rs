//! User contexts, roles, and permissions

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Fine-grained permissions on alerting and lifecycle operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    View,
    Acknowledge,
    Resolve,
    ConfigureThresholds,
    ManageMaintenanceWindows,
    Suppress,
    Escalate,
}

/// Tenant roles, each a strict superset of the one below it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
    Owner,
}

impl Role {
    /// Base permission set for the role. Custom grants extend this set;
    /// nothing ever removes from it.
    pub fn base_permissions(&self) -> HashSet<Permission> {
        let mut perms = HashSet::new();
        perms.insert(Permission::View);
        if matches!(self, Role::Operator | Role::Admin | Role::Owner) {
            perms.insert(Permission::Acknowledge);
        }
        if matches!(self, Role::Admin | Role::Owner) {
            perms.insert(Permission::Resolve);
            perms.insert(Permission::ConfigureThresholds);
            perms.insert(Permission::ManageMaintenanceWindows);
            perms.insert(Permission::Suppress);
        }
        if matches!(self, Role::Owner) {
            perms.insert(Permission::Escalate);
        }
        perms
    }
}

/// The caller identity every guarded operation receives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub organization_id: String,
    pub role: Role,
    /// Custom grants on top of the role base.
    #[serde(default)]
    pub permissions: HashSet<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

impl UserContext {
    pub fn new(
        user_id: impl Into<String>,
        organization_id: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
            role,
            permissions: HashSet::new(),
            department_id: None,
            team_id: None,
        }
    }

    /// Effective permissions: role base union custom grants.
    pub fn effective_permissions(&self) -> HashSet<Permission> {
        let mut perms = self.role.base_permissions();
        perms.extend(self.permissions.iter().copied());
        perms
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.effective_permissions().contains(&permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_accumulate_permissions() {
        assert_eq!(Role::Viewer.base_permissions().len(), 1);
        assert_eq!(Role::Operator.base_permissions().len(), 2);
        assert_eq!(Role::Admin.base_permissions().len(), 6);
        assert_eq!(Role::Owner.base_permissions().len(), 7);
        assert!(Role::Owner.base_permissions().contains(&Permission::Escalate));
        assert!(!Role::Admin.base_permissions().contains(&Permission::Escalate));
    }

    #[test]
    fn custom_permissions_extend_but_never_reduce() {
        let mut ctx = UserContext::new("u1", "org-A", Role::Viewer);
        ctx.permissions.insert(Permission::Escalate);
        // Extended with a permission far above the role base.
        assert!(ctx.has_permission(Permission::Escalate));
        // Base is still intact.
        assert!(ctx.has_permission(Permission::View));
    }
}
