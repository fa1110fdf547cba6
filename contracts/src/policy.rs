//! Retention policies mapping a data classification to archive/delete ages

use crate::record::DataClassification;
use serde::{Deserialize, Serialize};

/// Rejected policy shapes
#[derive(Debug, thiserror::Error)]
pub enum PolicyValidationError {
    #[error("retention policy '{policy}': archive_after_days must be >= 0, got {days}")]
    NegativeArchiveWindow { policy: String, days: i64 },

    #[error(
        "retention policy '{policy}': delete_after_days ({delete_after_days}) must be >= archive_after_days ({archive_after_days})"
    )]
    DeleteBeforeArchive {
        policy: String,
        archive_after_days: i64,
        delete_after_days: i64,
    },
}

/// A named rule governing when records of a classification are archived
/// and, optionally, when they are deleted outright
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub policy_name: String,
    pub data_classification: DataClassification,
    pub archive_after_days: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after_days: Option<i64>,
    pub is_active: bool,
}

impl RetentionPolicy {
    /// Build a validated policy. A delete window shorter than the archive
    /// window would let records be purged before they were ever archived,
    /// so that combination is refused here rather than detected later.
    pub fn new(
        policy_name: impl Into<String>,
        data_classification: DataClassification,
        archive_after_days: i64,
        delete_after_days: Option<i64>,
    ) -> Result<Self, PolicyValidationError> {
        let policy_name = policy_name.into();
        if archive_after_days < 0 {
            return Err(PolicyValidationError::NegativeArchiveWindow {
                policy: policy_name,
                days: archive_after_days,
            });
        }
        if let Some(delete_after) = delete_after_days {
            if delete_after < archive_after_days {
                return Err(PolicyValidationError::DeleteBeforeArchive {
                    policy: policy_name,
                    archive_after_days,
                    delete_after_days: delete_after,
                });
            }
        }
        Ok(Self {
            policy_name,
            data_classification,
            archive_after_days,
            delete_after_days,
            is_active: true,
        })
    }

    /// Re-run the construction checks on a policy loaded from storage.
    pub fn validate(&self) -> Result<(), PolicyValidationError> {
        Self::new(
            self.policy_name.clone(),
            self.data_classification,
            self.archive_after_days,
            self.delete_after_days,
        )
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_delete_window_at_or_past_archive_window() {
        assert!(RetentionPolicy::new("p", DataClassification::Phi, 30, Some(30)).is_ok());
        assert!(RetentionPolicy::new("p", DataClassification::Phi, 30, Some(90)).is_ok());
        assert!(RetentionPolicy::new("p", DataClassification::Phi, 30, None).is_ok());
    }

    #[test]
    fn rejects_delete_before_archive() {
        let err = RetentionPolicy::new("p", DataClassification::Phi, 30, Some(7)).unwrap_err();
        assert!(matches!(
            err,
            PolicyValidationError::DeleteBeforeArchive { .. }
        ));
    }

    #[test]
    fn rejects_negative_archive_window() {
        let err = RetentionPolicy::new("p", DataClassification::Public, -1, None).unwrap_err();
        assert!(matches!(
            err,
            PolicyValidationError::NegativeArchiveWindow { .. }
        ));
    }
}
