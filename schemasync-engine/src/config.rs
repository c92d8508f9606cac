//! Top-level configuration for a SchemaSync process.

use crate::debouncer::DebounceConfig;
use crate::jobs::{ReconciliationConfig, RetentionConfig};
use crate::orchestrator::OrchestratorConfig;
use crate::telemetry::TelemetryConfig;
use schemasync_core::ConfigError;

/// Every component's configuration in one place.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    pub debounce: DebounceConfig,
    pub orchestrator: OrchestratorConfig,
    pub retention: RetentionConfig,
    pub reconciliation: ReconciliationConfig,
    pub telemetry: TelemetryConfig,
}

impl SyncConfig {
    /// Read every section from `SCHEMASYNC_*` environment variables, falling
    /// back to defaults.
    pub fn from_env() -> Self {
        Self {
            debounce: DebounceConfig::from_env(),
            orchestrator: OrchestratorConfig::from_env(),
            retention: RetentionConfig::from_env(),
            reconciliation: ReconciliationConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
        }
    }

    /// Short timers for local runs.
    pub fn development() -> Self {
        Self {
            debounce: DebounceConfig::development(),
            orchestrator: OrchestratorConfig::default(),
            retention: RetentionConfig::development(),
            reconciliation: ReconciliationConfig::development(),
            telemetry: TelemetryConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.debounce.validate()?;
        self.orchestrator.validate()?;
        self.retention.validate()?;
        self.reconciliation.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn test_development_config_is_valid() {
        assert!(SyncConfig::development().validate().is_ok());
    }

    #[test]
    fn test_validate_reports_first_bad_section() {
        let mut config = SyncConfig::default();
        config.debounce.quiet_period = Duration::ZERO;
        config.retention.max_cached_snapshots = 0;

        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => {
                assert!(field.starts_with("debounce"), "unexpected field {field}")
            }
            other => panic!("expected invalid debounce value, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_reconciliation_interval_rejected() {
        let mut config = SyncConfig::default();
        config.reconciliation.check_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
