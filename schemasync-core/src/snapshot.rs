//! Cached schema snapshots.

use crate::{
    content_hash_hex, new_entity_id, ObjectIdentifier, SnapshotId, SqlObjectType,
    SubscriptionId, Timestamp, ValidationError,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Summary of one object's definition inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaObjectSummary {
    pub schema_name: String,
    pub object_name: String,
    pub object_type: SqlObjectType,
    pub modified_date: Option<Timestamp>,
    pub definition_hash: String,
    pub definition_script: String,
}

impl SchemaObjectSummary {
    /// Build a summary, hashing the definition script.
    pub fn new(identifier: &ObjectIdentifier, definition_script: impl Into<String>) -> Self {
        let definition_script = definition_script.into();
        Self {
            schema_name: identifier.schema_name.clone(),
            object_name: identifier.object_name.clone(),
            object_type: identifier.object_type,
            modified_date: None,
            definition_hash: content_hash_hex(definition_script.as_bytes()),
            definition_script,
        }
    }

    pub fn with_modified_date(mut self, modified_date: Timestamp) -> Self {
        self.modified_date = Some(modified_date);
        self
    }

    pub fn identifier(&self) -> ObjectIdentifier {
        ObjectIdentifier::new(
            self.schema_name.clone(),
            self.object_name.clone(),
            self.object_type,
        )
    }

    pub fn canonical_key(&self) -> String {
        self.identifier().canonical_key()
    }
}

/// Point-in-time capture of the database side of a subscription.
///
/// Objects are keyed by canonical key, which enforces uniqueness per
/// (schema, name, type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub id: SnapshotId,
    pub subscription_id: SubscriptionId,
    /// When the whole database was last captured. Targeted updates leave it
    /// untouched, so it bounds how fresh every entry is.
    pub captured_at: Timestamp,
    /// When named entries were last refreshed by a targeted update.
    #[serde(default)]
    pub refreshed_at: Option<Timestamp>,
    pub normalization_version: u32,
    pub hash: String,
    pub objects: BTreeMap<String, SchemaObjectSummary>,
}

impl SchemaSnapshot {
    /// Build a new snapshot from captured objects.
    ///
    /// Fails if two objects share the same identity.
    pub fn capture(
        subscription_id: SubscriptionId,
        normalization_version: u32,
        objects: Vec<SchemaObjectSummary>,
    ) -> Result<Self, ValidationError> {
        let mut keyed = BTreeMap::new();
        for object in objects {
            let key = object.canonical_key();
            if keyed.contains_key(&key) {
                return Err(ValidationError::DuplicateObject { key });
            }
            keyed.insert(key, object);
        }

        let mut snapshot = Self {
            id: new_entity_id(),
            subscription_id,
            captured_at: Utc::now(),
            refreshed_at: None,
            normalization_version,
            hash: String::new(),
            objects: keyed,
        };
        snapshot.refresh_hash();
        Ok(snapshot)
    }

    pub fn get(&self, identifier: &ObjectIdentifier) -> Option<&SchemaObjectSummary> {
        self.objects.get(&identifier.canonical_key())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Replace the entries of `requested` objects with what was fetched.
    ///
    /// Requested objects absent from `fetched` no longer exist in the database
    /// and are removed. Returns the number of entries that changed.
    pub fn apply_targeted_update(
        &mut self,
        requested: &[ObjectIdentifier],
        fetched: Vec<SchemaObjectSummary>,
    ) -> usize {
        let mut fetched: BTreeMap<String, SchemaObjectSummary> = fetched
            .into_iter()
            .map(|object| (object.canonical_key(), object))
            .collect();

        let mut changed = 0;
        for identifier in requested {
            let key = identifier.canonical_key();
            match fetched.remove(&key) {
                Some(object) => {
                    let differs = self
                        .objects
                        .get(&key)
                        .map(|existing| existing.definition_hash != object.definition_hash)
                        .unwrap_or(true);
                    if differs {
                        changed += 1;
                    }
                    self.objects.insert(key, object);
                }
                None => {
                    if self.objects.remove(&key).is_some() {
                        changed += 1;
                    }
                }
            }
        }

        if changed > 0 {
            self.refreshed_at = Some(Utc::now());
            self.refresh_hash();
        }
        changed
    }

    /// Recompute the snapshot hash from its objects.
    pub fn refresh_hash(&mut self) {
        self.hash = compute_snapshot_hash(&self.objects);
    }
}

/// SHA-256 over the ordered `(key, definition_hash)` pairs.
pub fn compute_snapshot_hash(objects: &BTreeMap<String, SchemaObjectSummary>) -> String {
    let mut buffer = String::new();
    for (key, object) in objects {
        buffer.push_str(key);
        buffer.push('=');
        buffer.push_str(&object.definition_hash);
        buffer.push('\n');
    }
    content_hash_hex(buffer.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn summary(name: &str, script: &str) -> SchemaObjectSummary {
        let id = ObjectIdentifier::parse(name, SqlObjectType::StoredProcedure).expect("parse");
        SchemaObjectSummary::new(&id, script)
    }

    #[test]
    fn test_capture_rejects_duplicates() {
        let result = SchemaSnapshot::capture(
            Uuid::now_v7(),
            1,
            vec![summary("dbo.Foo", "a"), summary("DBO.FOO", "b")],
        );
        assert!(matches!(result, Err(ValidationError::DuplicateObject { .. })));
    }

    #[test]
    fn test_hash_is_order_independent() {
        let a = SchemaSnapshot::capture(
            Uuid::now_v7(),
            1,
            vec![summary("dbo.Foo", "a"), summary("dbo.Bar", "b")],
        )
        .expect("capture");
        let b = SchemaSnapshot::capture(
            Uuid::now_v7(),
            1,
            vec![summary("dbo.Bar", "b"), summary("dbo.Foo", "a")],
        )
        .expect("capture");
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_targeted_update_replaces_and_removes() {
        let mut snapshot = SchemaSnapshot::capture(
            Uuid::now_v7(),
            1,
            vec![summary("dbo.Foo", "v1"), summary("dbo.Bar", "v1")],
        )
        .expect("capture");
        let before = snapshot.hash.clone();
        let captured_at = snapshot.captured_at;

        let foo = ObjectIdentifier::parse("dbo.Foo", SqlObjectType::StoredProcedure)
            .expect("parse");
        let bar = ObjectIdentifier::parse("dbo.Bar", SqlObjectType::StoredProcedure)
            .expect("parse");

        let changed = snapshot.apply_targeted_update(
            &[foo.clone(), bar.clone()],
            vec![summary("dbo.Foo", "v2")],
        );

        assert_eq!(changed, 2);
        assert_eq!(snapshot.captured_at, captured_at);
        assert!(snapshot.refreshed_at.is_some_and(|at| at >= captured_at));
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get(&bar).is_none());
        assert_eq!(
            snapshot.get(&foo).map(|o| o.definition_script.as_str()),
            Some("v2")
        );
        assert_ne!(snapshot.hash, before);
    }

    #[test]
    fn test_targeted_update_without_changes_keeps_hash() {
        let mut snapshot =
            SchemaSnapshot::capture(Uuid::now_v7(), 1, vec![summary("dbo.Foo", "v1")])
                .expect("capture");
        let before = snapshot.hash.clone();
        let foo = ObjectIdentifier::parse("dbo.Foo", SqlObjectType::StoredProcedure)
            .expect("parse");

        let changed = snapshot.apply_targeted_update(&[foo], vec![summary("dbo.Foo", "v1")]);
        assert_eq!(changed, 0);
        assert_eq!(snapshot.hash, before);
        assert!(snapshot.refreshed_at.is_none());
    }
}
