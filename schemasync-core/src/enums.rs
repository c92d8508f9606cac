//! Enum types for SchemaSync entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CORE ENUMS
// ============================================================================

/// Entity type discriminator used in storage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Subscription,
    Snapshot,
    ComparisonResult,
    DetectedChange,
}

/// Which side of the subscription observed a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeSource {
    /// Reported by the database poller
    Database,
    /// Reported by the project folder watcher
    FileSystem,
}

/// Kind of change observed for a single object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeKind {
    /// Resolve the kind recorded for an object that was already pending in
    /// the current debounce window and has been observed again.
    ///
    /// The latest observation wins, except that a `Created` arriving after
    /// any other kind surfaces as `Modified`: the object existed before the
    /// window and still differs from what was there.
    pub fn coalesce(self, newer: ChangeKind) -> ChangeKind {
        match (self, newer) {
            (ChangeKind::Created, ChangeKind::Created) => ChangeKind::Created,
            (_, ChangeKind::Created) => ChangeKind::Modified,
            (_, newer) => newer,
        }
    }
}

/// SQL Server object types known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SqlObjectType {
    Table,
    View,
    StoredProcedure,
    ScalarFunction,
    TableValuedFunction,
    Trigger,
    Index,
    Sequence,
    Synonym,
    UserDefinedType,
    Schema,
    Login,
    User,
    Role,
    Assembly,
    Unknown,
}

impl SqlObjectType {
    /// All known object types, in declaration order.
    pub const ALL: [SqlObjectType; 16] = [
        SqlObjectType::Table,
        SqlObjectType::View,
        SqlObjectType::StoredProcedure,
        SqlObjectType::ScalarFunction,
        SqlObjectType::TableValuedFunction,
        SqlObjectType::Trigger,
        SqlObjectType::Index,
        SqlObjectType::Sequence,
        SqlObjectType::Synonym,
        SqlObjectType::UserDefinedType,
        SqlObjectType::Schema,
        SqlObjectType::Login,
        SqlObjectType::User,
        SqlObjectType::Role,
        SqlObjectType::Assembly,
        SqlObjectType::Unknown,
    ];

    /// Whether objects of this type take part in diffing.
    ///
    /// Server-level principals and CLR assemblies are tracked as unsupported
    /// instead of compared.
    pub fn is_supported(&self) -> bool {
        !matches!(
            self,
            SqlObjectType::Login
                | SqlObjectType::User
                | SqlObjectType::Role
                | SqlObjectType::Assembly
                | SqlObjectType::Unknown
        )
    }

    /// Short token used in canonical object keys.
    pub fn as_key_str(&self) -> &'static str {
        match self {
            SqlObjectType::Table => "table",
            SqlObjectType::View => "view",
            SqlObjectType::StoredProcedure => "procedure",
            SqlObjectType::ScalarFunction => "scalarfunction",
            SqlObjectType::TableValuedFunction => "tablefunction",
            SqlObjectType::Trigger => "trigger",
            SqlObjectType::Index => "index",
            SqlObjectType::Sequence => "sequence",
            SqlObjectType::Synonym => "synonym",
            SqlObjectType::UserDefinedType => "type",
            SqlObjectType::Schema => "schema",
            SqlObjectType::Login => "login",
            SqlObjectType::User => "user",
            SqlObjectType::Role => "role",
            SqlObjectType::Assembly => "assembly",
            SqlObjectType::Unknown => "unknown",
        }
    }
}

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SubscriptionState {
    #[default]
    Active,
    Paused,
    Error,
    Comparing,
    Syncing,
}

impl SubscriptionState {
    /// Whether a comparison may be started from this state.
    ///
    /// `Comparing` is accepted because the execution lock is the authority on
    /// whether a comparison is running; a persisted `Comparing` seen by a
    /// caller that holds the lock is stale. `Error` is accepted so that the
    /// next successful cycle clears it.
    pub fn can_start_comparison(&self) -> bool {
        matches!(
            self,
            SubscriptionState::Active | SubscriptionState::Comparing | SubscriptionState::Error
        )
    }
}

/// Outcome status of a comparison run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonStatus {
    /// Database and project agree on every compared object
    Synchronized,
    /// At least one difference was found
    HasDifferences,
    /// The run failed
    Error,
    /// Supported objects agree but some objects could not be compared
    Partial,
}

/// Direction of a single schema difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DifferenceType {
    /// Exists in the database only
    Add,
    /// Exists in both with different definitions
    Modify,
    /// Exists in the project only
    Delete,
}

// ============================================================================
// DISPLAY / PARSE
// ============================================================================

fn normalize_token(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            EntityType::Subscription => "Subscription",
            EntityType::Snapshot => "Snapshot",
            EntityType::ComparisonResult => "ComparisonResult",
            EntityType::DetectedChange => "DetectedChange",
        };
        write!(f, "{}", value)
    }
}

impl fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ChangeSource::Database => "Database",
            ChangeSource::FileSystem => "FileSystem",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for ChangeSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "database" | "db" => Ok(ChangeSource::Database),
            "filesystem" | "file" | "fs" => Ok(ChangeSource::FileSystem),
            _ => Err(format!("Invalid ChangeSource: {}", s)),
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ChangeKind::Created => "Created",
            ChangeKind::Modified => "Modified",
            ChangeKind::Deleted => "Deleted",
            ChangeKind::Renamed => "Renamed",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for ChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "created" | "create" => Ok(ChangeKind::Created),
            "modified" | "modify" | "changed" => Ok(ChangeKind::Modified),
            "deleted" | "delete" | "removed" => Ok(ChangeKind::Deleted),
            "renamed" | "rename" => Ok(ChangeKind::Renamed),
            _ => Err(format!("Invalid ChangeKind: {}", s)),
        }
    }
}

impl fmt::Display for SqlObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            SqlObjectType::Table => "Table",
            SqlObjectType::View => "View",
            SqlObjectType::StoredProcedure => "StoredProcedure",
            SqlObjectType::ScalarFunction => "ScalarFunction",
            SqlObjectType::TableValuedFunction => "TableValuedFunction",
            SqlObjectType::Trigger => "Trigger",
            SqlObjectType::Index => "Index",
            SqlObjectType::Sequence => "Sequence",
            SqlObjectType::Synonym => "Synonym",
            SqlObjectType::UserDefinedType => "UserDefinedType",
            SqlObjectType::Schema => "Schema",
            SqlObjectType::Login => "Login",
            SqlObjectType::User => "User",
            SqlObjectType::Role => "Role",
            SqlObjectType::Assembly => "Assembly",
            SqlObjectType::Unknown => "Unknown",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for SqlObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "table" | "u" => Ok(SqlObjectType::Table),
            "view" | "v" => Ok(SqlObjectType::View),
            "storedprocedure" | "procedure" | "proc" | "p" => Ok(SqlObjectType::StoredProcedure),
            "scalarfunction" | "function" | "fn" => Ok(SqlObjectType::ScalarFunction),
            "tablevaluedfunction" | "tablefunction" | "tf" | "if" => {
                Ok(SqlObjectType::TableValuedFunction)
            }
            "trigger" | "tr" => Ok(SqlObjectType::Trigger),
            "index" => Ok(SqlObjectType::Index),
            "sequence" | "so" => Ok(SqlObjectType::Sequence),
            "synonym" | "sn" => Ok(SqlObjectType::Synonym),
            "userdefinedtype" | "type" => Ok(SqlObjectType::UserDefinedType),
            "schema" => Ok(SqlObjectType::Schema),
            "login" => Ok(SqlObjectType::Login),
            "user" => Ok(SqlObjectType::User),
            "role" => Ok(SqlObjectType::Role),
            "assembly" => Ok(SqlObjectType::Assembly),
            "unknown" => Ok(SqlObjectType::Unknown),
            _ => Err(format!("Invalid SqlObjectType: {}", s)),
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            SubscriptionState::Active => "Active",
            SubscriptionState::Paused => "Paused",
            SubscriptionState::Error => "Error",
            SubscriptionState::Comparing => "Comparing",
            SubscriptionState::Syncing => "Syncing",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for SubscriptionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "active" => Ok(SubscriptionState::Active),
            "paused" => Ok(SubscriptionState::Paused),
            "error" => Ok(SubscriptionState::Error),
            "comparing" => Ok(SubscriptionState::Comparing),
            "syncing" => Ok(SubscriptionState::Syncing),
            _ => Err(format!("Invalid SubscriptionState: {}", s)),
        }
    }
}

impl fmt::Display for ComparisonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ComparisonStatus::Synchronized => "Synchronized",
            ComparisonStatus::HasDifferences => "HasDifferences",
            ComparisonStatus::Error => "Error",
            ComparisonStatus::Partial => "Partial",
        };
        write!(f, "{}", value)
    }
}

impl fmt::Display for DifferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            DifferenceType::Add => "Add",
            DifferenceType::Modify => "Modify",
            DifferenceType::Delete => "Delete",
        };
        write!(f, "{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesce_delete_after_create_stays_deleted() {
        assert_eq!(ChangeKind::Created.coalesce(ChangeKind::Deleted), ChangeKind::Deleted);
        assert_eq!(ChangeKind::Modified.coalesce(ChangeKind::Deleted), ChangeKind::Deleted);
    }

    #[test]
    fn test_coalesce_create_after_delete_is_modified() {
        assert_eq!(ChangeKind::Deleted.coalesce(ChangeKind::Created), ChangeKind::Modified);
    }

    #[test]
    fn test_coalesce_repeated_recreate_stays_modified() {
        let resolved = ChangeKind::Deleted
            .coalesce(ChangeKind::Created)
            .coalesce(ChangeKind::Created);
        assert_eq!(resolved, ChangeKind::Modified);
        assert_eq!(ChangeKind::Modified.coalesce(ChangeKind::Created), ChangeKind::Modified);
        assert_eq!(ChangeKind::Renamed.coalesce(ChangeKind::Created), ChangeKind::Modified);
        assert_eq!(ChangeKind::Created.coalesce(ChangeKind::Created), ChangeKind::Created);
    }

    #[test]
    fn test_coalesce_last_wins_otherwise() {
        assert_eq!(ChangeKind::Modified.coalesce(ChangeKind::Modified), ChangeKind::Modified);
        assert_eq!(ChangeKind::Created.coalesce(ChangeKind::Renamed), ChangeKind::Renamed);
        assert_eq!(ChangeKind::Deleted.coalesce(ChangeKind::Modified), ChangeKind::Modified);
    }

    #[test]
    fn test_supported_whitelist() {
        assert!(SqlObjectType::Table.is_supported());
        assert!(SqlObjectType::StoredProcedure.is_supported());
        assert!(!SqlObjectType::Login.is_supported());
        assert!(!SqlObjectType::Unknown.is_supported());
    }

    #[test]
    fn test_object_type_round_trips_through_display() {
        for object_type in SqlObjectType::ALL {
            let parsed: SqlObjectType = object_type.to_string().parse().expect("parse");
            assert_eq!(parsed, object_type);
        }
    }

    #[test]
    fn test_object_type_accepts_sys_objects_codes() {
        assert_eq!("P".parse::<SqlObjectType>(), Ok(SqlObjectType::StoredProcedure));
        assert_eq!("u".parse::<SqlObjectType>(), Ok(SqlObjectType::Table));
        assert!("bogus".parse::<SqlObjectType>().is_err());
    }

    #[test]
    fn test_state_can_start_comparison() {
        assert!(SubscriptionState::Active.can_start_comparison());
        assert!(SubscriptionState::Comparing.can_start_comparison());
        assert!(!SubscriptionState::Paused.can_start_comparison());
        assert!(!SubscriptionState::Syncing.can_start_comparison());
    }

    #[test]
    fn test_change_source_parse() {
        assert_eq!("file_system".parse::<ChangeSource>(), Ok(ChangeSource::FileSystem));
        assert_eq!("Database".parse::<ChangeSource>(), Ok(ChangeSource::Database));
    }
}
