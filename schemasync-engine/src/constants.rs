//! Constants for the SchemaSync engine
//!
//! Default values for every tunable, plus the trigger tags recorded on
//! comparison results.

// ============================================================================
// DEBOUNCING
// ============================================================================

/// Default quiet period before a subscription's pending changes are emitted
pub const DEFAULT_DEBOUNCE_QUIET_MS: u64 = 500;

/// Default capacity of the channel carrying ready batches to the processor
pub const DEFAULT_DEBOUNCE_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// COMPARISON
// ============================================================================

/// Default capacity of the comparison event broadcast channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Normalization version stamped on newly captured snapshots
pub const DEFAULT_NORMALIZATION_VERSION: u32 = 1;

/// Age after which a persisted `Comparing` state is treated as stale (30 minutes)
pub const DEFAULT_STALE_COMPARING_SECS: u64 = 1800;

// ============================================================================
// CACHE RETENTION
// ============================================================================

/// Default interval between retention sweeps (1 hour)
pub const DEFAULT_RETENTION_CHECK_INTERVAL_SECS: u64 = 3600;

/// Default snapshot retention (7 days)
pub const DEFAULT_SNAPSHOT_RETENTION_SECS: u64 = 7 * 24 * 3600;

/// Default number of snapshots kept per subscription
pub const DEFAULT_MAX_CACHED_SNAPSHOTS: usize = 10;

/// Default comparison history retention (30 days)
pub const DEFAULT_COMPARISON_HISTORY_RETENTION_SECS: u64 = 30 * 24 * 3600;

/// Default retention of processed pending changes (7 days)
pub const DEFAULT_PENDING_CHANGE_RETENTION_SECS: u64 = 7 * 24 * 3600;

// ============================================================================
// RECONCILIATION
// ============================================================================

/// Default interval between reconciliation passes (5 minutes)
pub const DEFAULT_RECONCILIATION_INTERVAL_SECS: u64 = 300;

// ============================================================================
// TRIGGERS
// ============================================================================

pub const TRIGGER_DATABASE_CHANGE: &str = "database-change";
pub const TRIGGER_FILE_CHANGE: &str = "file-change";
pub const TRIGGER_MANUAL: &str = "manual";
pub const TRIGGER_RECONCILIATION: &str = "reconciliation";
