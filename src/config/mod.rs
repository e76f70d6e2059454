//! Configuration module for index work orchestration
//!
//! This module provides the `OrchestratorConfig` struct, its builder and JSON
//! loading with validation and sensible defaults.

// Sub-modules
pub mod builder;
pub mod getters;
pub mod methods;
pub mod types;

// Re-exports for public API
pub use builder::OrchestratorConfigBuilder;
pub use types::{
    BatchConfig, CommitConfig, CommitMode, DEFAULT_BACKEND_TIMEOUT_MS, DEFAULT_MAX_BYTES,
    DEFAULT_MAX_ITEMS, DEFAULT_MAX_PENDING, DEFAULT_MAX_WAIT_MS, OrchestratorConfig, OrderingMode,
};
