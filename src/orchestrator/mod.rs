//! Per-index orchestration of index work
//!
//! # Architecture
//!
//! - `queue` - per routing key lanes, barriers and fail-fast halts
//! - `service` - `IndexOrchestrator`: worker loop, dispatch tasks, flush and close
//! - `sender` - cloneable submission handle
//! - `stats` - lock-free statistics tracking
//!
//! # Example
//!
//! ```ignore
//! use search_orchestration::{IndexOrchestrator, LoggingErrorHandler, OrchestratorConfig, TantivyBackend, WorkItem};
//!
//! let backend = Arc::new(TantivyBackend::in_memory()?);
//! let orchestrator = IndexOrchestrator::start(
//!     "books",
//!     backend,
//!     OrchestratorConfig::default(),
//!     Arc::new(LoggingErrorHandler),
//! )?;
//!
//! let outcome = orchestrator.submit(WorkItem::add("books", "1", "Dune"))?.await;
//! orchestrator.close().await?;
//! ```

mod queue;
mod sender;
mod service;
mod stats;

pub use queue::QueueState;
pub use sender::WorkSender;
pub use service::IndexOrchestrator;
pub use stats::{OrchestratorStats, OrchestratorStatsSnapshot};
