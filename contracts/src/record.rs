//! Audit record model shared by the live store, the DLQ, and archives

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Data classification governing retention and access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataClassification {
    #[serde(rename = "PUBLIC")]
    Public,
    #[serde(rename = "INTERNAL")]
    Internal,
    #[serde(rename = "CONFIDENTIAL")]
    Confidential,
    #[serde(rename = "PHI")]
    Phi,
}

impl fmt::Display for DataClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataClassification::Public => "PUBLIC",
            DataClassification::Internal => "INTERNAL",
            DataClassification::Confidential => "CONFIDENTIAL",
            DataClassification::Phi => "PHI",
        };
        f.write_str(s)
    }
}

impl FromStr for DataClassification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PUBLIC" => Ok(DataClassification::Public),
            "INTERNAL" => Ok(DataClassification::Internal),
            "CONFIDENTIAL" => Ok(DataClassification::Confidential),
            "PHI" => Ok(DataClassification::Phi),
            other => Err(format!("unknown data classification: {other}")),
        }
    }
}

/// A single audit event as stored in the live audit log
///
/// Unknown producer fields are preserved in `extras` so forward-compat
/// payloads survive an archive/retrieve round trip byte-for-byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub principal_id: String,
    pub organization_id: String,
    pub action: String,
    pub data_classification: DataClassification,
    pub retention_policy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extras: HashMap<String, serde_json::Value>,
}

impl AuditRecord {
    pub fn new(
        principal_id: impl Into<String>,
        organization_id: impl Into<String>,
        action: impl Into<String>,
        data_classification: DataClassification,
        retention_policy: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            principal_id: principal_id.into(),
            organization_id: organization_id.into(),
            action: action.into(),
            data_classification,
            retention_policy: retention_policy.into(),
            archived_at: None,
            extras: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_serializes_screaming_case() {
        let json = serde_json::to_string(&DataClassification::Phi).unwrap();
        assert_eq!(json, "\"PHI\"");
        let back: DataClassification = serde_json::from_str("\"CONFIDENTIAL\"").unwrap();
        assert_eq!(back, DataClassification::Confidential);
    }

    #[test]
    fn extras_round_trip_through_flatten() {
        let mut record = AuditRecord::new(
            "user-1",
            "org-A",
            "document.read",
            DataClassification::Internal,
            "standard",
            Utc::now(),
        );
        record
            .extras
            .insert("sourceIp".to_string(), serde_json::json!("10.0.0.8"));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["sourceIp"], "10.0.0.8");

        let back: AuditRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
