//! Identity types for SchemaSync entities

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
pub type EntityId = Uuid;

/// Identifier of a subscription (one database paired with one project folder).
pub type SubscriptionId = Uuid;

/// Identifier of a persisted schema snapshot.
pub type SnapshotId = Uuid;

/// Identifier of a persisted comparison result.
pub type ComparisonId = Uuid;

/// Identifier of a persisted detected change.
pub type ChangeId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash.
pub type ContentHash = [u8; 32];

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute the SHA-256 of content as a lowercase hex string.
pub fn content_hash_hex(content: &[u8]) -> String {
    hex::encode(compute_content_hash(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ids_are_time_ordered() {
        let a = new_entity_id();
        let b = new_entity_id();
        assert!(a < b);
    }

    #[test]
    fn test_content_hash_hex_is_stable() {
        let first = content_hash_hex(b"CREATE TABLE dbo.Foo (Id INT)");
        let second = content_hash_hex(b"CREATE TABLE dbo.Foo (Id INT)");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert_ne!(first, content_hash_hex(b"CREATE TABLE dbo.Bar (Id INT)"));
    }
}
