//! Health check types
//!
//! Shared health reporting for pipeline components and subscriptions.

use crate::{Subscription, SubscriptionState, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health status for a component or subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational
    Healthy,
    /// Operational but needs attention
    Degraded,
    /// Not operational
    Unhealthy,
    /// Not yet checked
    Unknown,
}

/// Detailed health check result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub component: String,
    pub message: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl HealthCheck {
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            component: component.into(),
            message: None,
            metadata: None,
        }
    }

    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            component: component.into(),
            message: Some(message.into()),
            metadata: None,
        }
    }

    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            component: component.into(),
            message: Some(message.into()),
            metadata: None,
        }
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Assess one subscription's state.
///
/// A `Comparing` state older than `stale_after` is reported as stale: no lock
/// survives a restart, so the next successful cycle will clear it. `Error`
/// is degraded until a later comparison succeeds.
pub fn assess_subscription(
    subscription: &Subscription,
    now: Timestamp,
    stale_after: chrono::Duration,
) -> HealthCheck {
    let component = format!("subscription:{}", subscription.id);
    let age = now.signed_duration_since(subscription.state_changed_at);

    let check = match subscription.state {
        SubscriptionState::Comparing if age > stale_after => HealthCheck::degraded(
            component,
            format!(
                "comparison state is stale ({}s without completion)",
                age.num_seconds()
            ),
        )
        .with_metadata("stale", serde_json::Value::Bool(true)),
        SubscriptionState::Error => {
            HealthCheck::degraded(component, "last comparison failed")
        }
        _ => HealthCheck::healthy(component),
    };

    check.with_metadata(
        "state",
        serde_json::Value::String(subscription.state.to_string()),
    )
}
