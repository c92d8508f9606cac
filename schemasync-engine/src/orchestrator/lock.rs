//! Per-subscription comparison lock.
//!
//! An in-process registry: a subscription is locked while a
//! [`ComparisonLease`] for it is alive. Acquisition never waits. Nothing is
//! persisted, so a restart releases every lock.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use schemasync_core::{SubscriptionId, Timestamp};
use std::sync::Arc;
use uuid::Uuid;

/// Who holds a subscription's lock and since when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    pub token: Uuid,
    pub holder: String,
    pub acquired_at: Timestamp,
}

#[derive(Debug, Clone, Default)]
pub struct ComparisonLockRegistry {
    held: Arc<DashMap<SubscriptionId, LeaseRecord>>,
}

impl ComparisonLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `subscription_id`, or `None` if it is held.
    pub fn try_acquire(
        &self,
        subscription_id: SubscriptionId,
        holder: impl Into<String>,
    ) -> Option<ComparisonLease> {
        match self.held.entry(subscription_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let token = Uuid::now_v7();
                vacant.insert(LeaseRecord {
                    token,
                    holder: holder.into(),
                    acquired_at: Utc::now(),
                });
                Some(ComparisonLease {
                    held: Arc::clone(&self.held),
                    subscription_id,
                    token,
                })
            }
        }
    }

    pub fn is_held(&self, subscription_id: SubscriptionId) -> bool {
        self.held.contains_key(&subscription_id)
    }

    pub fn holder(&self, subscription_id: SubscriptionId) -> Option<LeaseRecord> {
        self.held.get(&subscription_id).map(|r| r.value().clone())
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

/// Releases its subscription's lock on drop.
#[derive(Debug)]
pub struct ComparisonLease {
    held: Arc<DashMap<SubscriptionId, LeaseRecord>>,
    subscription_id: SubscriptionId,
    token: Uuid,
}

impl ComparisonLease {
    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }
}

impl Drop for ComparisonLease {
    fn drop(&mut self) {
        let token = self.token;
        self.held
            .remove_if(&self.subscription_id, |_, record| record.token == token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_fast() {
        let registry = ComparisonLockRegistry::new();
        let sub = Uuid::now_v7();

        let lease = registry.try_acquire(sub, "full").expect("first acquire");
        assert!(registry.try_acquire(sub, "targeted").is_none());
        assert_eq!(
            registry.holder(sub).map(|r| r.holder),
            Some("full".to_string())
        );

        drop(lease);
        assert!(!registry.is_held(sub));
        assert!(registry.try_acquire(sub, "targeted").is_some());
    }

    #[test]
    fn test_locks_are_per_subscription() {
        let registry = ComparisonLockRegistry::new();
        let _a = registry.try_acquire(Uuid::now_v7(), "a").expect("a");
        let _b = registry.try_acquire(Uuid::now_v7(), "b").expect("b");
        assert_eq!(registry.held_count(), 2);
    }

    #[test]
    fn test_clones_share_state() {
        let registry = ComparisonLockRegistry::new();
        let clone = registry.clone();
        let sub = Uuid::now_v7();
        let _lease = registry.try_acquire(sub, "run").expect("acquire");
        assert!(clone.is_held(sub));
        assert!(clone.try_acquire(sub, "run").is_none());
    }

    #[test]
    fn test_concurrent_acquire_has_one_winner() {
        let registry = ComparisonLockRegistry::new();
        let sub = Uuid::now_v7();
        let start = Arc::new(std::sync::Barrier::new(8));
        let attempted = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                let start = Arc::clone(&start);
                let attempted = Arc::clone(&attempted);
                std::thread::spawn(move || {
                    start.wait();
                    let lease = registry.try_acquire(sub, format!("thread-{}", i));
                    // Hold until every thread has tried.
                    attempted.wait();
                    lease.is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
