//! Contracts for the external collaborators of a comparison run.
//!
//! Database introspection and project parsing live outside this crate and
//! plug in through [`SchemaSource`]. Turning two definitions into a
//! difference plugs in through [`SchemaDiffer`].

use async_trait::async_trait;
use schemasync_core::{
    DifferenceType, ObjectIdentifier, SchemaDifference, SchemaObjectSummary, SourceError,
    Subscription, Timestamp,
};

#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Capture every object currently in the subscription's database.
    async fn capture_database(
        &self,
        subscription: &Subscription,
    ) -> Result<Vec<SchemaObjectSummary>, SourceError>;

    /// Fetch the named database objects. Objects that no longer exist are
    /// omitted from the result.
    async fn fetch_database_objects(
        &self,
        subscription: &Subscription,
        objects: &[ObjectIdentifier],
    ) -> Result<Vec<SchemaObjectSummary>, SourceError>;

    /// Load the object model of the subscription's project folder.
    async fn load_project(
        &self,
        subscription: &Subscription,
    ) -> Result<Vec<SchemaObjectSummary>, SourceError>;

    /// Whether the database schema changed after `since`.
    ///
    /// Sources that cannot tell report `true`, which forces a fresh capture.
    async fn database_changed_since(
        &self,
        _subscription: &Subscription,
        _since: Timestamp,
    ) -> Result<bool, SourceError> {
        Ok(true)
    }
}

/// Turns the two sides of one object into a difference, if they differ.
pub trait SchemaDiffer: Send + Sync {
    fn diff(
        &self,
        object: &ObjectIdentifier,
        database: Option<&SchemaObjectSummary>,
        project: Option<&SchemaObjectSummary>,
    ) -> Option<SchemaDifference>;
}

/// Compares definition hashes only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefinitionHashDiffer;

impl SchemaDiffer for DefinitionHashDiffer {
    fn diff(
        &self,
        object: &ObjectIdentifier,
        database: Option<&SchemaObjectSummary>,
        project: Option<&SchemaObjectSummary>,
    ) -> Option<SchemaDifference> {
        let difference_type = match (database, project) {
            (Some(_), None) => DifferenceType::Add,
            (None, Some(_)) => DifferenceType::Delete,
            (Some(db), Some(file)) if db.definition_hash != file.definition_hash => {
                DifferenceType::Modify
            }
            _ => return None,
        };

        Some(SchemaDifference {
            object: object.clone(),
            difference_type,
            database_definition: database.map(|s| s.definition_script.clone()),
            file_definition: project.map(|s| s.definition_script.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemasync_core::SqlObjectType;

    fn summary(script: &str) -> SchemaObjectSummary {
        let id = ObjectIdentifier::new("dbo", "Foo", SqlObjectType::View);
        SchemaObjectSummary::new(&id, script)
    }

    #[test]
    fn test_hash_differ_classifies_sides() {
        let differ = DefinitionHashDiffer;
        let id = ObjectIdentifier::new("dbo", "Foo", SqlObjectType::View);
        let a = summary("SELECT 1");
        let b = summary("SELECT 2");

        assert_eq!(
            differ.diff(&id, Some(&a), None).map(|d| d.difference_type),
            Some(DifferenceType::Add)
        );
        assert_eq!(
            differ.diff(&id, None, Some(&a)).map(|d| d.difference_type),
            Some(DifferenceType::Delete)
        );
        assert_eq!(
            differ.diff(&id, Some(&a), Some(&b)).map(|d| d.difference_type),
            Some(DifferenceType::Modify)
        );
        assert!(differ.diff(&id, Some(&a), Some(&a)).is_none());
        assert!(differ.diff(&id, None, None).is_none());
    }

    #[test]
    fn test_difference_carries_both_definitions() {
        let id = ObjectIdentifier::new("dbo", "Foo", SqlObjectType::View);
        let difference = DefinitionHashDiffer
            .diff(&id, Some(&summary("SELECT 1")), Some(&summary("SELECT 2")))
            .expect("difference");
        assert_eq!(difference.database_definition.as_deref(), Some("SELECT 1"));
        assert_eq!(difference.file_definition.as_deref(), Some("SELECT 2"));
    }
}
