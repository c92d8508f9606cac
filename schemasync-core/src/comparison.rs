//! Comparison results and the differences they carry.

use crate::{
    new_entity_id, ComparisonId, ComparisonStatus, DifferenceType, ObjectIdentifier,
    SubscriptionId, Timestamp,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How much of the schema a comparison run covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonScope {
    /// Fresh database capture diffed against the whole project
    Full,
    /// Cached snapshot diffed against the whole project
    Incremental,
    /// Only the named objects were resolved and diffed
    Targeted,
}

impl fmt::Display for ComparisonScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ComparisonScope::Full => "Full",
            ComparisonScope::Incremental => "Incremental",
            ComparisonScope::Targeted => "Targeted",
        };
        write!(f, "{}", value)
    }
}

/// One object whose database and project definitions disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDifference {
    pub object: ObjectIdentifier,
    pub difference_type: DifferenceType,
    pub database_definition: Option<String>,
    pub file_definition: Option<String>,
}

/// An object seen during comparison whose type is not diffed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsupportedObject {
    pub object: ObjectIdentifier,
    pub reason: String,
}

/// Counts derived from a comparison's differences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub objects_compared: usize,
    pub total_differences: usize,
    pub additions: usize,
    pub modifications: usize,
    pub deletions: usize,
    pub unsupported: usize,
}

impl ComparisonSummary {
    pub fn from_differences(
        objects_compared: usize,
        differences: &[SchemaDifference],
        unsupported: usize,
    ) -> Self {
        let count = |kind: DifferenceType| {
            differences
                .iter()
                .filter(|d| d.difference_type == kind)
                .count()
        };
        Self {
            objects_compared,
            total_differences: differences.len(),
            additions: count(DifferenceType::Add),
            modifications: count(DifferenceType::Modify),
            deletions: count(DifferenceType::Delete),
            unsupported,
        }
    }
}

/// Append-only history entry for one comparison run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub id: ComparisonId,
    pub subscription_id: SubscriptionId,
    pub compared_at: Timestamp,
    pub duration: Duration,
    pub status: ComparisonStatus,
    pub scope: ComparisonScope,
    pub trigger: String,
    pub differences: Vec<SchemaDifference>,
    pub summary: ComparisonSummary,
    pub unsupported_objects: Vec<UnsupportedObject>,
    pub error_message: Option<String>,
}

impl ComparisonResult {
    /// Result of a run that reached the diff stage.
    pub fn completed(
        subscription_id: SubscriptionId,
        scope: ComparisonScope,
        trigger: impl Into<String>,
        objects_compared: usize,
        differences: Vec<SchemaDifference>,
        unsupported_objects: Vec<UnsupportedObject>,
        duration: Duration,
    ) -> Self {
        let summary = ComparisonSummary::from_differences(
            objects_compared,
            &differences,
            unsupported_objects.len(),
        );
        Self {
            id: new_entity_id(),
            subscription_id,
            compared_at: Utc::now(),
            duration,
            status: derive_status(&differences, &unsupported_objects),
            scope,
            trigger: trigger.into(),
            differences,
            summary,
            unsupported_objects,
            error_message: None,
        }
    }

    /// Result of a run that failed before producing differences.
    pub fn failed(
        subscription_id: SubscriptionId,
        scope: ComparisonScope,
        trigger: impl Into<String>,
        reason: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            id: new_entity_id(),
            subscription_id,
            compared_at: Utc::now(),
            duration,
            status: ComparisonStatus::Error,
            scope,
            trigger: trigger.into(),
            differences: Vec::new(),
            summary: ComparisonSummary::default(),
            unsupported_objects: Vec::new(),
            error_message: Some(reason.into()),
        }
    }

    pub fn has_differences(&self) -> bool {
        !self.differences.is_empty()
    }
}

/// Differences win over unsupported objects; unsupported objects alone make
/// a run partial.
pub fn derive_status(
    differences: &[SchemaDifference],
    unsupported: &[UnsupportedObject],
) -> ComparisonStatus {
    if !differences.is_empty() {
        ComparisonStatus::HasDifferences
    } else if !unsupported.is_empty() {
        ComparisonStatus::Partial
    } else {
        ComparisonStatus::Synchronized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqlObjectType;
    use uuid::Uuid;

    fn difference(kind: DifferenceType) -> SchemaDifference {
        SchemaDifference {
            object: ObjectIdentifier::new("dbo", "Foo", SqlObjectType::Table),
            difference_type: kind,
            database_definition: None,
            file_definition: None,
        }
    }

    fn unsupported() -> UnsupportedObject {
        UnsupportedObject {
            object: ObjectIdentifier::new("dbo", "app_login", SqlObjectType::Login),
            reason: "Login objects are not compared".to_string(),
        }
    }

    #[test]
    fn test_derive_status() {
        assert_eq!(derive_status(&[], &[]), ComparisonStatus::Synchronized);
        assert_eq!(derive_status(&[], &[unsupported()]), ComparisonStatus::Partial);
        assert_eq!(
            derive_status(&[difference(DifferenceType::Add)], &[unsupported()]),
            ComparisonStatus::HasDifferences
        );
    }

    #[test]
    fn test_summary_counts() {
        let diffs = vec![
            difference(DifferenceType::Add),
            difference(DifferenceType::Modify),
            difference(DifferenceType::Modify),
            difference(DifferenceType::Delete),
        ];
        let summary = ComparisonSummary::from_differences(10, &diffs, 1);
        assert_eq!(summary.objects_compared, 10);
        assert_eq!(summary.total_differences, 4);
        assert_eq!(summary.additions, 1);
        assert_eq!(summary.modifications, 2);
        assert_eq!(summary.deletions, 1);
        assert_eq!(summary.unsupported, 1);
    }

    #[test]
    fn test_failed_result_has_error_status() {
        let result = ComparisonResult::failed(
            Uuid::now_v7(),
            ComparisonScope::Full,
            "manual",
            "connection refused",
            Duration::from_millis(12),
        );
        assert_eq!(result.status, ComparisonStatus::Error);
        assert_eq!(result.error_message.as_deref(), Some("connection refused"));
        assert!(!result.has_differences());
    }
}
