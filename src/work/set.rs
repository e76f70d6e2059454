//! Queued works, completion tickets and work sets

use smallvec::SmallVec;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use super::item::{RoutingKey, WorkItem};
use super::outcome::{FailureKind, FailureReason, ItemOutcome};

/// Completion handle for one submission
///
/// Holds the sequence number assigned at enqueue time and the sender side of
/// the future returned to the caller.
#[derive(Debug)]
pub(crate) struct Ticket {
    pub(crate) seq: u64,
    tx: oneshot::Sender<ItemOutcome>,
}

impl Ticket {
    pub(crate) fn new(seq: u64, index_name: &str) -> (Ticket, WorkFuture) {
        let (tx, rx) = oneshot::channel();
        (
            Ticket { seq, tx },
            WorkFuture {
                rx,
                index_name: index_name.to_string(),
            },
        )
    }

    /// Resolve the caller's future; a dropped future is not an error
    pub(crate) fn resolve(self, outcome: ItemOutcome) {
        let _ = self.tx.send(outcome);
    }
}

pub(crate) type Tickets = SmallVec<[Ticket; 1]>;

/// Future resolved once the work's containing work set completed dispatch
#[derive(Debug)]
#[must_use = "the outcome of the work is only observable through this future"]
pub struct WorkFuture {
    rx: oneshot::Receiver<ItemOutcome>,
    index_name: String,
}

impl Future for WorkFuture {
    type Output = ItemOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Orchestrator dropped without resolving: treat like a close
            Poll::Ready(Err(_)) => Poll::Ready(ItemOutcome::Failed(FailureReason::new(
                FailureKind::Closed,
                format!("orchestrator of index '{}' went away", self.index_name),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A work waiting in the queue or the batcher
#[derive(Debug)]
pub(crate) struct QueuedWork {
    pub(crate) item: WorkItem,
    pub(crate) tickets: Tickets,
}

impl QueuedWork {
    pub(crate) fn new(item: WorkItem, ticket: Ticket) -> Self {
        let mut tickets = Tickets::new();
        tickets.push(ticket);
        Self { item, tickets }
    }

    /// Sequence number of the oldest submission folded into this work
    pub(crate) fn seq(&self) -> u64 {
        self.tickets.first().map_or(0, |t| t.seq)
    }

    pub(crate) fn key(&self) -> &RoutingKey {
        self.item.routing_key()
    }

    pub(crate) fn seqs(&self) -> impl Iterator<Item = u64> + '_ {
        self.tickets.iter().map(|t| t.seq)
    }

    /// Fold a later same-key add/update into this work
    ///
    /// On failure the later work is handed back untouched.
    pub(crate) fn absorb(&mut self, later: QueuedWork) -> Result<(), QueuedWork> {
        match self.item.coalesce(&later.item) {
            Some(merged) => {
                self.item = merged;
                self.tickets.extend(later.tickets);
                Ok(())
            }
            None => Err(later),
        }
    }

    pub(crate) fn resolve(self, outcome: ItemOutcome) {
        resolve_tickets(self.tickets, &outcome);
    }
}

pub(crate) fn resolve_tickets(tickets: Tickets, outcome: &ItemOutcome) {
    for ticket in tickets {
        ticket.resolve(outcome.clone());
    }
}

/// Ordered batch of works dispatched together
///
/// Never holds two works with the same routing key.
#[derive(Debug)]
pub struct WorkSet {
    id: u64,
    items: Vec<WorkItem>,
    tickets: Vec<Tickets>,
    estimated_bytes: usize,
}

impl WorkSet {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            items: Vec::new(),
            tickets: Vec::new(),
            estimated_bytes: 0,
        }
    }

    pub(crate) fn push(&mut self, work: QueuedWork) {
        self.estimated_bytes += work.item.estimated_size();
        self.items.push(work.item);
        self.tickets.push(work.tickets);
    }

    pub(crate) fn into_parts(self) -> (Vec<WorkItem>, Vec<Tickets>) {
        (self.items, self.tickets)
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn estimated_bytes(&self) -> usize {
        self.estimated_bytes
    }
}
