//! Work model: items, routing keys, work sets and outcomes

mod item;
mod outcome;
mod set;

pub use item::{Payload, RoutingKey, WORK_OVERHEAD_BYTES, WorkItem, WorkKind};
pub use outcome::{DispatchResult, FailureKind, FailureReason, ItemOutcome, WorkSetOutcome};
pub use set::{WorkFuture, WorkSet};

pub(crate) use set::{QueuedWork, Ticket, resolve_tickets};
