//! Schema object identity.
//!
//! SQL Server identifiers are case-insensitive under the default collation,
//! so equality, hashing and the canonical key all ignore case while the
//! original spelling is kept for display.

use crate::{SqlObjectType, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Schema used when a name carries no schema qualifier.
pub const DEFAULT_SCHEMA: &str = "dbo";

/// Identity of one schema object: `schema.object` plus its type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectIdentifier {
    pub schema_name: String,
    pub object_name: String,
    pub object_type: SqlObjectType,
}

impl ObjectIdentifier {
    /// Build an identifier from already separated parts.
    pub fn new(
        schema_name: impl Into<String>,
        object_name: impl Into<String>,
        object_type: SqlObjectType,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            object_name: object_name.into(),
            object_type,
        }
    }

    /// Parse a qualified name such as `dbo.Foo`, `[Sales].[Order Lines]` or
    /// `Foo`. A missing schema defaults to `dbo`. Three-part names keep the
    /// last two parts.
    pub fn parse(qualified: &str, object_type: SqlObjectType) -> Result<Self, ValidationError> {
        let parts = split_qualified(qualified.trim());
        let (schema, name) = match parts.as_slice() {
            [] => (String::new(), String::new()),
            [name] => (String::new(), name.clone()),
            [.., schema, name] => (schema.clone(), name.clone()),
        };

        if name.is_empty() {
            return Err(ValidationError::InvalidObjectIdentifier {
                value: qualified.to_string(),
                reason: "object name is empty".to_string(),
            });
        }

        let schema = if schema.is_empty() {
            DEFAULT_SCHEMA.to_string()
        } else {
            schema
        };

        Ok(Self::new(schema, name, object_type))
    }

    /// `schema.object` as written.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.object_name)
    }

    /// Canonical lookup key `type:schema.object`, lower-cased.
    pub fn canonical_key(&self) -> String {
        format!(
            "{}:{}.{}",
            self.object_type.as_key_str(),
            self.schema_name.to_ascii_lowercase(),
            self.object_name.to_ascii_lowercase()
        )
    }
}

impl PartialEq for ObjectIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.object_type == other.object_type
            && self.schema_name.eq_ignore_ascii_case(&other.schema_name)
            && self.object_name.eq_ignore_ascii_case(&other.object_name)
    }
}

impl Eq for ObjectIdentifier {}

impl Hash for ObjectIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object_type.hash(state);
        self.schema_name.to_ascii_lowercase().hash(state);
        self.object_name.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.object_type, self.qualified_name())
    }
}

/// Split on `.` outside of `[...]` or `"..."` quoting and strip the quotes.
fn split_qualified(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut closing: Option<char> = None;

    for c in input.chars() {
        match closing {
            Some(end) if c == end => closing = None,
            Some(_) => current.push(c),
            None => match c {
                '[' => closing = Some(']'),
                '"' => closing = Some('"'),
                '.' => parts.push(std::mem::take(&mut current).trim().to_string()),
                _ => current.push(c),
            },
        }
    }
    if !input.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_two_part_name() {
        let id = ObjectIdentifier::parse("Sales.Orders", SqlObjectType::Table).expect("parse");
        assert_eq!(id.schema_name, "Sales");
        assert_eq!(id.object_name, "Orders");
        assert_eq!(id.canonical_key(), "table:sales.orders");
    }

    #[test]
    fn test_parse_defaults_schema_to_dbo() {
        let id = ObjectIdentifier::parse("Foo", SqlObjectType::StoredProcedure).expect("parse");
        assert_eq!(id.schema_name, "dbo");
        assert_eq!(id.qualified_name(), "dbo.Foo");
    }

    #[test]
    fn test_parse_bracketed_name_with_dot() {
        let id = ObjectIdentifier::parse("[dbo].[Order.Lines]", SqlObjectType::View)
            .expect("parse");
        assert_eq!(id.schema_name, "dbo");
        assert_eq!(id.object_name, "Order.Lines");
    }

    #[test]
    fn test_parse_three_part_name_keeps_schema_and_object() {
        let id = ObjectIdentifier::parse("Northwind.dbo.Customers", SqlObjectType::Table)
            .expect("parse");
        assert_eq!(id.qualified_name(), "dbo.Customers");
    }

    #[test]
    fn test_parse_rejects_empty_name() {
        assert!(ObjectIdentifier::parse("dbo.", SqlObjectType::Table).is_err());
        assert!(ObjectIdentifier::parse("   ", SqlObjectType::Table).is_err());
    }

    #[test]
    fn test_equality_ignores_case() {
        let a = ObjectIdentifier::parse("DBO.Foo", SqlObjectType::Table).expect("parse");
        let b = ObjectIdentifier::parse("dbo.FOO", SqlObjectType::Table).expect("parse");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_type_is_part_of_identity() {
        let table = ObjectIdentifier::parse("dbo.Foo", SqlObjectType::Table).expect("parse");
        let view = ObjectIdentifier::parse("dbo.Foo", SqlObjectType::View).expect("parse");
        assert_ne!(table, view);
        assert_ne!(table.canonical_key(), view.canonical_key());
    }
}
