//! Subscriptions pair one database with one project folder.

use crate::{new_entity_id, SqlObjectType, SubscriptionId, SubscriptionState, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Per-subscription comparison policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionOptions {
    pub auto_compare: bool,
    pub compare_on_file_change: bool,
    pub compare_on_database_change: bool,
    /// When non-empty, only these object types are compared.
    pub object_type_filters: Vec<SqlObjectType>,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            auto_compare: true,
            compare_on_file_change: true,
            compare_on_database_change: true,
            object_type_filters: Vec::new(),
        }
    }
}

impl SubscriptionOptions {
    /// Decide whether a batch with the given sources warrants a comparison.
    pub fn should_trigger(&self, has_file_changes: bool, has_database_changes: bool) -> bool {
        self.auto_compare
            && ((has_file_changes && self.compare_on_file_change)
                || (has_database_changes && self.compare_on_database_change))
    }

    pub fn allows_object_type(&self, object_type: SqlObjectType) -> bool {
        self.object_type_filters.is_empty() || self.object_type_filters.contains(&object_type)
    }
}

/// A database/project pairing watched by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub name: String,
    pub project_path: String,
    pub options: SubscriptionOptions,
    pub state: SubscriptionState,
    pub state_changed_at: Timestamp,
    pub last_compared_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl Subscription {
    pub fn new(name: impl Into<String>, project_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_entity_id(),
            name: name.into(),
            project_path: project_path.into(),
            options: SubscriptionOptions::default(),
            state: SubscriptionState::Active,
            state_changed_at: now,
            last_compared_at: None,
            created_at: now,
        }
    }

    pub fn with_options(mut self, options: SubscriptionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_state(mut self, state: SubscriptionState) -> Self {
        self.state = state;
        self
    }

    pub fn is_active(&self) -> bool {
        self.state == SubscriptionState::Active
    }

    /// Move to `state`, stamping the transition time.
    pub fn transition_to(&mut self, state: SubscriptionState) {
        if self.state != state {
            self.state = state;
            self.state_changed_at = Utc::now();
        }
    }
}
