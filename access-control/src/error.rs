//! Typed access-control failures
//!
//! These errors are surfaced to callers with an explanatory reason and are
//! never logged together with the resource payload.

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("cross-organization access denied: context organization '{context_org}' cannot touch resources of '{resource_org}'")]
    CrossOrgAccessDenied {
        context_org: String,
        resource_org: String,
    },

    #[error("insufficient permissions for operation '{operation}'")]
    InsufficientPermissions { operation: String },

    #[error("invalid operation '{operation}'")]
    InvalidOperation { operation: String },

    #[error("access denied to resource")]
    ResourceScopeDenied,
}
