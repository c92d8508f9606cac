//! Change events, debounced batches and their persisted form.

use crate::{
    new_entity_id, ChangeId, ChangeKind, ChangeSource, ObjectIdentifier, SqlObjectType,
    SubscriptionId, Timestamp, ValidationError,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A single raw change reported by a producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub subscription_id: SubscriptionId,
    /// Qualified name as reported by the producer (`schema.object`).
    pub object_identifier: String,
    pub source: ChangeSource,
    pub kind: ChangeKind,
    pub object_type: Option<SqlObjectType>,
    pub detected_at: Timestamp,
}

impl ChangeEvent {
    /// Create an event stamped with the current time.
    pub fn new(
        subscription_id: SubscriptionId,
        object_identifier: impl Into<String>,
        source: ChangeSource,
        kind: ChangeKind,
        object_type: Option<SqlObjectType>,
    ) -> Self {
        Self {
            subscription_id,
            object_identifier: object_identifier.into(),
            source,
            kind,
            object_type,
            detected_at: Utc::now(),
        }
    }

    /// Whether this change can be narrowed to a single database object.
    pub fn is_targetable(&self) -> bool {
        self.source == ChangeSource::Database && self.object_type.is_some()
    }

    /// Resolve the typed identifier, if the object type is known.
    pub fn to_object_identifier(&self) -> Option<Result<ObjectIdentifier, ValidationError>> {
        self.object_type
            .map(|object_type| ObjectIdentifier::parse(&self.object_identifier, object_type))
    }
}

/// Changes accumulated for one subscription during one debounce window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChangeBatch {
    pub subscription_id: SubscriptionId,
    /// One entry per object, in order of first observation.
    pub changes: Vec<ChangeEvent>,
    pub batch_started_at: Timestamp,
    pub batch_completed_at: Timestamp,
}

impl PendingChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn has_file_changes(&self) -> bool {
        self.changes
            .iter()
            .any(|c| c.source == ChangeSource::FileSystem)
    }

    pub fn has_database_changes(&self) -> bool {
        self.changes
            .iter()
            .any(|c| c.source == ChangeSource::Database)
    }
}

/// Persisted record of a change, tracked until a comparison covers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedChange {
    pub id: ChangeId,
    pub subscription_id: SubscriptionId,
    pub object_identifier: String,
    pub source: ChangeSource,
    pub kind: ChangeKind,
    pub object_type: Option<SqlObjectType>,
    pub detected_at: Timestamp,
    pub is_processed: bool,
    pub processed_at: Option<Timestamp>,
}

impl DetectedChange {
    /// Create an unprocessed record from a batch entry.
    pub fn from_event(event: &ChangeEvent) -> Self {
        Self {
            id: new_entity_id(),
            subscription_id: event.subscription_id,
            object_identifier: event.object_identifier.clone(),
            source: event.source,
            kind: event.kind,
            object_type: event.object_type,
            detected_at: event.detected_at,
            is_processed: false,
            processed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event(source: ChangeSource, object_type: Option<SqlObjectType>) -> ChangeEvent {
        ChangeEvent::new(
            Uuid::now_v7(),
            "dbo.Foo",
            source,
            ChangeKind::Modified,
            object_type,
        )
    }

    #[test]
    fn test_targetable_requires_database_source_and_type() {
        assert!(event(ChangeSource::Database, Some(SqlObjectType::Table)).is_targetable());
        assert!(!event(ChangeSource::Database, None).is_targetable());
        assert!(!event(ChangeSource::FileSystem, Some(SqlObjectType::Table)).is_targetable());
    }

    #[test]
    fn test_to_object_identifier() {
        let typed = event(ChangeSource::Database, Some(SqlObjectType::View));
        let id = typed
            .to_object_identifier()
            .expect("typed")
            .expect("valid name");
        assert_eq!(id.canonical_key(), "view:dbo.foo");

        assert!(event(ChangeSource::Database, None)
            .to_object_identifier()
            .is_none());
    }

    #[test]
    fn test_batch_source_flags() {
        let now = Utc::now();
        let batch = PendingChangeBatch {
            subscription_id: Uuid::now_v7(),
            changes: vec![event(ChangeSource::FileSystem, None)],
            batch_started_at: now,
            batch_completed_at: now,
        };
        assert!(batch.has_file_changes());
        assert!(!batch.has_database_changes());
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_detected_change_starts_unprocessed() {
        let source = event(ChangeSource::Database, Some(SqlObjectType::Table));
        let record = DetectedChange::from_event(&source);
        assert!(!record.is_processed);
        assert!(record.processed_at.is_none());
        assert_eq!(record.object_identifier, source.object_identifier);
        assert_eq!(record.detected_at, source.detected_at);
    }
}
