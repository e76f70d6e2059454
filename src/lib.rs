pub mod backend;
mod batcher;
pub mod commit;
pub mod config;
pub mod error_handler;
pub mod errors;
pub mod manager;
pub mod orchestrator;
pub mod runtime_helpers;
pub mod work;
pub mod work_plan;

pub use backend::{
    BackendExecutor, ElasticsearchBackend, IndexEngineBackend, TantivyBackend, WriteChannelHealth,
};
pub use commit::CommitState;
pub use config::{
    BatchConfig, CommitConfig, CommitMode, OrchestratorConfig, OrchestratorConfigBuilder,
    OrderingMode,
};
pub use error_handler::{
    CollectingErrorHandler, ErrorContext, ErrorHandler, FailurePolicy, LoggingErrorHandler,
};
pub use errors::{BackendError, OrchestrationError, OrchestrationResult, RetryConfig};
pub use manager::IndexingManager;
pub use orchestrator::{
    IndexOrchestrator, OrchestratorStats, OrchestratorStatsSnapshot, QueueState, WorkSender,
};
pub use runtime_helpers::retry_task;
pub use work::{
    DispatchResult, FailureKind, FailureReason, ItemOutcome, Payload, RoutingKey, WorkFuture,
    WorkItem, WorkKind, WorkSet, WorkSetOutcome,
};
pub use work_plan::{PlannedOutcome, WorkPlan, WorkPlanReport};
