//! Fluent builder for `OrchestratorConfig`
//!
//! Every setting has a default, so the builder has a single state. `build()`
//! validates the assembled configuration; invalid configuration is the only
//! error that escapes orchestrator construction.

use std::path::Path;

use super::types::{BatchConfig, CommitConfig, CommitMode, OrchestratorConfig};
use crate::errors::{OrchestrationError, OrchestrationResult};

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfigBuilder {
    pub(crate) config: OrchestratorConfig,
}

impl OrchestratorConfig {
    /// Create a builder for configuring an `OrchestratorConfig` with a fluent interface
    #[must_use]
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> OrchestrationResult<Self> {
        let config: OrchestratorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> OrchestrationResult<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Check invariants the orchestrator relies on
    pub fn validate(&self) -> OrchestrationResult<()> {
        let BatchConfig {
            max_items,
            max_bytes,
            ..
        } = &self.batch;
        if *max_items == 0 {
            return Err(invalid("batch.max_items must be at least 1"));
        }
        if *max_bytes == 0 {
            return Err(invalid("batch.max_bytes must be at least 1"));
        }

        let CommitConfig { mode, retry } = &self.commit;
        if let CommitMode::Periodic { interval_ms: 0 } = mode {
            return Err(invalid("commit.interval_ms must be greater than 0"));
        }
        if retry.backoff_multiplier < 1.0 {
            return Err(invalid("commit.retry.backoff_multiplier must be >= 1.0"));
        }
        if retry.initial_delay > retry.max_delay {
            return Err(invalid("commit.retry.initial_delay exceeds max_delay"));
        }

        if self.backend_timeout_ms == Some(0) {
            return Err(invalid("backend_timeout_ms must be greater than 0"));
        }
        if self.max_pending == Some(0) {
            return Err(invalid("max_pending must be at least 1"));
        }
        if self.max_concurrent_dispatches == Some(0) {
            return Err(invalid("max_concurrent_dispatches must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> OrchestrationError {
    OrchestrationError::InvalidConfig(message.to_string())
}

impl OrchestratorConfigBuilder {
    /// Validate and return the configuration
    pub fn build(self) -> OrchestrationResult<OrchestratorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
