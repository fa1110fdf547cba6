//! Alert resources and the scope view access control evaluates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    High,
    Critical,
}

/// The organization/department/team coordinates of any guarded resource
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceScope {
    pub organization_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

impl ResourceScope {
    pub fn organization(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            department_id: None,
            team_id: None,
        }
    }
}

/// An operational alert raised against a tenant's destinations or queues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub organization_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    /// Operator-only diagnostic detail, stripped for contexts without the
    /// configure-thresholds permission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn scope(&self) -> ResourceScope {
        ResourceScope {
            organization_id: self.organization_id.clone(),
            department_id: self.department_id.clone(),
            team_id: self.team_id.clone(),
        }
    }
}
