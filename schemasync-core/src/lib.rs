//! SchemaSync Core - Entity Types
//!
//! Data model shared by the change-detection pipeline: identifiers, change
//! events and batches, snapshots, comparison results, subscriptions, errors
//! and health reporting. No I/O lives here.

mod change;
mod comparison;
mod enums;
mod error;
mod health;
mod identity;
mod object;
mod snapshot;
mod subscription;

pub use change::{ChangeEvent, DetectedChange, PendingChangeBatch};
pub use comparison::{
    derive_status, ComparisonResult, ComparisonScope, ComparisonSummary, SchemaDifference,
    UnsupportedObject,
};
pub use enums::{
    ChangeKind, ChangeSource, ComparisonStatus, DifferenceType, EntityType, SqlObjectType,
    SubscriptionState,
};
pub use error::{ConfigError, SourceError, StorageError, SyncError, SyncResult, ValidationError};
pub use health::{assess_subscription, HealthCheck, HealthStatus};
pub use identity::{
    compute_content_hash, content_hash_hex, new_entity_id, ChangeId, ComparisonId, ContentHash,
    EntityId, SnapshotId, SubscriptionId, Timestamp,
};
pub use object::{ObjectIdentifier, DEFAULT_SCHEMA};
pub use snapshot::{compute_snapshot_hash, SchemaObjectSummary, SchemaSnapshot};
pub use subscription::{Subscription, SubscriptionOptions};

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_kind() -> impl Strategy<Value = ChangeKind> {
        prop_oneof![
            Just(ChangeKind::Created),
            Just(ChangeKind::Modified),
            Just(ChangeKind::Deleted),
            Just(ChangeKind::Renamed),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// A trailing deletion always survives coalescing.
        #[test]
        fn prop_coalesce_keeps_trailing_delete(kinds in prop::collection::vec(arb_kind(), 1..8)) {
            let mut kinds = kinds;
            kinds.push(ChangeKind::Deleted);
            let resolved = kinds
                .iter()
                .skip(1)
                .fold(kinds[0], |acc, next| acc.coalesce(*next));
            prop_assert_eq!(resolved, ChangeKind::Deleted);
        }

        /// Once an object has been seen deleted, later events never resolve
        /// back to `Created`.
        #[test]
        fn prop_coalesce_never_recreates(kinds in prop::collection::vec(arb_kind(), 1..8)) {
            let mut acc = kinds[0];
            let mut seen_deleted = acc == ChangeKind::Deleted;
            for next in kinds.iter().skip(1) {
                acc = acc.coalesce(*next);
                seen_deleted |= *next == ChangeKind::Deleted;
                if seen_deleted {
                    prop_assert_ne!(acc, ChangeKind::Created);
                }
            }
        }

        /// Canonical keys ignore case but keep type identity.
        #[test]
        fn prop_canonical_key_is_case_insensitive(
            schema in "[A-Za-z][A-Za-z0-9_]{0,12}",
            name in "[A-Za-z][A-Za-z0-9_]{0,20}",
        ) {
            let upper = ObjectIdentifier::parse(
                &format!("{}.{}", schema.to_ascii_uppercase(), name.to_ascii_uppercase()),
                SqlObjectType::Table,
            ).expect("valid identifier");
            let lower = ObjectIdentifier::parse(
                &format!("[{}].[{}]", schema.to_ascii_lowercase(), name.to_ascii_lowercase()),
                SqlObjectType::Table,
            ).expect("valid identifier");
            prop_assert_eq!(upper.canonical_key(), lower.canonical_key());
            prop_assert_eq!(upper, lower);
        }
    }
}
