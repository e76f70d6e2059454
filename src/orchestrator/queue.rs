//! Per-index queue of pending works
//!
//! Works are kept in one FIFO lane per routing key. A lane hands out its head
//! only when none of its works is in flight (ordered mode), which serializes
//! same-document mutations while distinct documents proceed in parallel.
//! `DeleteAll` works are index-wide barriers kept in their own FIFO.
//!
//! The queue is only ever accessed under its owner's mutex and never awaits.

use ahash::AHashMap;
use log::{debug, trace};
use std::collections::{BTreeSet, VecDeque};

use crate::config::OrderingMode;
use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::work::{FailureReason, QueuedWork, RoutingKey, Ticket, WorkFuture, WorkItem};

/// Lifecycle of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Open,
    /// New submissions are rejected; in-flight works finish
    Closing,
    Closed,
}

#[derive(Debug, Default)]
struct Lane {
    pending: VecDeque<QueuedWork>,
    /// Works of this lane pulled from the queue and not yet completed
    in_flight: usize,
    halted: Option<FailureReason>,
}

impl Lane {
    fn is_removable(&self) -> bool {
        self.pending.is_empty() && self.in_flight == 0 && self.halted.is_none()
    }
}

/// Works that may be dispatched now
#[derive(Debug, Default)]
pub(crate) struct ReadyWorks {
    /// Document works, in submission order
    pub(crate) works: Vec<QueuedWork>,
    /// A barrier whose predecessors all completed; travels alone
    pub(crate) barrier: Option<QueuedWork>,
}

pub(crate) struct OrchestrationQueue {
    index_name: String,
    ordering: OrderingMode,
    coalesce: bool,
    max_pending: usize,
    state: QueueState,
    next_seq: u64,
    lanes: AHashMap<RoutingKey, Lane>,
    barriers: VecDeque<QueuedWork>,
    barrier_in_flight: bool,
    /// Sequence numbers submitted and not yet resolved
    outstanding: BTreeSet<u64>,
}

impl OrchestrationQueue {
    pub(crate) fn new(
        index_name: impl Into<String>,
        ordering: OrderingMode,
        coalesce: bool,
        max_pending: usize,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            ordering,
            coalesce,
            max_pending,
            state: QueueState::Open,
            next_seq: 1,
            lanes: AHashMap::new(),
            barriers: VecDeque::new(),
            barrier_in_flight: false,
            outstanding: BTreeSet::new(),
        }
    }

    /// Enqueue a work and return the future of its outcome
    pub(crate) fn submit(&mut self, item: WorkItem) -> OrchestrationResult<WorkFuture> {
        if self.state != QueueState::Open {
            return Err(OrchestrationError::Closed {
                index: self.index_name.clone(),
            });
        }
        if item.index_name() != self.index_name {
            return Err(OrchestrationError::WrongIndex {
                expected: self.index_name.clone(),
                actual: item.index_name().to_string(),
            });
        }
        if let Some(reason) = self
            .lanes
            .get(item.routing_key())
            .and_then(|lane| lane.halted.as_ref())
        {
            return Err(OrchestrationError::RoutingKeyHalted {
                index: self.index_name.clone(),
                key: item.routing_key().clone(),
                reason: reason.clone(),
            });
        }
        if self.outstanding.len() >= self.max_pending {
            return Err(OrchestrationError::Backpressure {
                index: self.index_name.clone(),
                pending: self.outstanding.len(),
            });
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let (ticket, future) = Ticket::new(seq, &self.index_name);
        self.outstanding.insert(seq);
        let work = QueuedWork::new(item, ticket);

        if work.item.kind().is_barrier() {
            trace!("index {}: barrier {} queued as #{seq}", self.index_name, work.item.kind());
            self.barriers.push_back(work);
            return Ok(future);
        }

        let last_barrier = self.barriers.back().map(QueuedWork::seq);
        let lane = self.lanes.entry(work.key().clone()).or_default();
        let work = match lane.pending.back_mut() {
            // Never merge across a barrier submitted in between
            Some(previous) if self.coalesce && last_barrier.is_none_or(|b| b < previous.seq()) => {
                match previous.absorb(work) {
                    Ok(()) => {
                        trace!("index {}: #{seq} coalesced into #{}", self.index_name, previous.seq());
                        return Ok(future);
                    }
                    Err(work) => work,
                }
            }
            _ => work,
        };
        lane.pending.push_back(work);
        Ok(future)
    }

    /// Pull every work that may be dispatched now
    pub(crate) fn take_ready(&mut self) -> ReadyWorks {
        let mut ready = ReadyWorks::default();
        if self.barrier_in_flight {
            return ready;
        }

        let first_barrier = self.barriers.front().map(QueuedWork::seq);
        if let Some(barrier_seq) = first_barrier {
            if self.outstanding.first() == Some(&barrier_seq) {
                ready.barrier = self.barriers.pop_front();
                self.barrier_in_flight = true;
                return ready;
            }
        }

        let unordered = self.ordering == OrderingMode::Unordered;
        for lane in self.lanes.values_mut() {
            if lane.halted.is_some() || (!unordered && lane.in_flight > 0) {
                continue;
            }
            while let Some(head) = lane.pending.front() {
                if first_barrier.is_some_and(|b| head.seq() > b) {
                    break;
                }
                if let Some(work) = lane.pending.pop_front() {
                    lane.in_flight += 1;
                    ready.works.push(work);
                }
                if !unordered {
                    break;
                }
            }
        }
        ready.works.sort_unstable_by_key(QueuedWork::seq);
        ready
    }

    /// A barrier waits for earlier works that may still sit in the batcher
    pub(crate) fn barrier_waiting(&self) -> bool {
        !self.barrier_in_flight && !self.barriers.is_empty()
    }

    /// Mark a pulled work as completed
    ///
    /// With `halt`, the routing key is halted and its pending works are
    /// returned so the caller can fail them.
    pub(crate) fn complete(
        &mut self,
        item: &WorkItem,
        seqs: impl IntoIterator<Item = u64>,
        halt: Option<FailureReason>,
    ) -> Vec<QueuedWork> {
        for seq in seqs {
            self.outstanding.remove(&seq);
        }
        if item.kind().is_barrier() {
            self.barrier_in_flight = false;
            return Vec::new();
        }

        let key = item.routing_key();
        let mut drained = Vec::new();
        if let Some(lane) = self.lanes.get_mut(key) {
            lane.in_flight = lane.in_flight.saturating_sub(1);
            if let Some(reason) = halt {
                debug!("index {}: halting routing key {key}: {reason}", self.index_name);
                drained.extend(lane.pending.drain(..));
                lane.halted = Some(reason);
            }
            if lane.is_removable() {
                self.lanes.remove(key);
            }
        }
        for work in &drained {
            for seq in work.seqs() {
                self.outstanding.remove(&seq);
            }
        }
        drained
    }

    /// Lift a fail-fast halt; returns whether the key was halted
    pub(crate) fn reset_routing_key(&mut self, key: &RoutingKey) -> bool {
        let Some(lane) = self.lanes.get_mut(key) else {
            return false;
        };
        let was_halted = lane.halted.take().is_some();
        if lane.is_removable() {
            self.lanes.remove(key);
        }
        was_halted
    }

    /// Stop accepting works and hand back everything not yet pulled
    pub(crate) fn begin_close(&mut self) -> Vec<QueuedWork> {
        if self.state == QueueState::Open {
            self.state = QueueState::Closing;
        }
        let mut drained: Vec<QueuedWork> = self.barriers.drain(..).collect();
        for lane in self.lanes.values_mut() {
            drained.extend(lane.pending.drain(..));
        }
        self.lanes.retain(|_, lane| lane.in_flight > 0);
        for work in &drained {
            for seq in work.seqs() {
                self.outstanding.remove(&seq);
            }
        }
        drained
    }

    pub(crate) fn finish_close(&mut self) {
        self.state = QueueState::Closed;
    }

    pub(crate) fn state(&self) -> QueueState {
        self.state
    }

    /// Sequence number of the latest submission, 0 when none
    pub(crate) fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    /// Every submission up to `seq` was resolved
    pub(crate) fn completed_through(&self, seq: u64) -> bool {
        self.outstanding.first().is_none_or(|first| *first > seq)
    }

    /// Oldest unresolved submission
    pub(crate) fn oldest_outstanding(&self) -> Option<u64> {
        self.outstanding.first().copied()
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub(crate) fn is_halted(&self, key: &RoutingKey) -> bool {
        self.lanes.get(key).is_some_and(|lane| lane.halted.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::{FailureKind, WorkKind};

    fn queue(ordering: OrderingMode, coalesce: bool) -> OrchestrationQueue {
        OrchestrationQueue::new("books", ordering, coalesce, 100)
    }

    fn ids(works: &[QueuedWork]) -> Vec<(String, WorkKind)> {
        works
            .iter()
            .map(|w| (w.item.document_id().to_string(), w.item.kind()))
            .collect()
    }

    fn complete_all(queue: &mut OrchestrationQueue, works: Vec<QueuedWork>) {
        for work in works {
            let seqs: Vec<u64> = work.seqs().collect();
            queue.complete(&work.item, seqs, None);
        }
    }

    #[test]
    fn same_key_waits_for_in_flight_work() {
        let mut queue = queue(OrderingMode::Ordered, false);
        let _a = queue.submit(WorkItem::add("books", "42", "A")).expect("open");
        let _b = queue.submit(WorkItem::update("books", "42", "B")).expect("open");
        let _c = queue.submit(WorkItem::add("books", "7", "C")).expect("open");

        let first = queue.take_ready().works;
        assert_eq!(
            ids(&first),
            vec![("42".to_string(), WorkKind::Add), ("7".to_string(), WorkKind::Add)]
        );
        assert!(queue.take_ready().works.is_empty());

        complete_all(&mut queue, first);
        let second = queue.take_ready().works;
        assert_eq!(ids(&second), vec![("42".to_string(), WorkKind::Update)]);
    }

    #[test]
    fn unordered_mode_pulls_whole_lanes() {
        let mut queue = queue(OrderingMode::Unordered, false);
        let _a = queue.submit(WorkItem::add("books", "1", "A")).expect("open");
        let _b = queue.submit(WorkItem::add("books", "1", "B")).expect("open");
        assert_eq!(queue.take_ready().works.len(), 2);
    }

    #[test]
    fn barrier_waits_for_predecessors_and_blocks_successors() {
        let mut queue = queue(OrderingMode::Ordered, false);
        let _a = queue.submit(WorkItem::add("books", "1", "A")).expect("open");
        let _all = queue.submit(WorkItem::delete_all("books")).expect("open");
        let _b = queue.submit(WorkItem::add("books", "2", "B")).expect("open");

        let before = queue.take_ready();
        assert_eq!(ids(&before.works), vec![("1".to_string(), WorkKind::Add)]);
        assert!(before.barrier.is_none());
        assert!(queue.barrier_waiting());

        complete_all(&mut queue, before.works);
        let barrier = queue.take_ready();
        assert!(barrier.works.is_empty());
        let barrier = barrier.barrier.expect("barrier ready");
        assert!(queue.take_ready().works.is_empty());

        complete_all(&mut queue, vec![barrier]);
        let after = queue.take_ready().works;
        assert_eq!(ids(&after), vec![("2".to_string(), WorkKind::Add)]);
    }

    #[test]
    fn coalescing_merges_adjacent_adds_and_updates_only() {
        let mut queue = queue(OrderingMode::Ordered, true);
        let _a = queue.submit(WorkItem::add("books", "1", "A")).expect("open");
        let _b = queue.submit(WorkItem::update("books", "1", "B")).expect("open");
        let _d = queue.submit(WorkItem::delete("books", "1")).expect("open");
        let _c = queue.submit(WorkItem::add("books", "1", "C")).expect("open");

        let first = queue.take_ready().works;
        assert_eq!(ids(&first), vec![("1".to_string(), WorkKind::Update)]);
        assert_eq!(first[0].seqs().collect::<Vec<_>>(), vec![1, 2]);
        complete_all(&mut queue, first);

        let second = queue.take_ready().works;
        assert_eq!(ids(&second), vec![("1".to_string(), WorkKind::Delete)]);
        complete_all(&mut queue, second);

        let third = queue.take_ready().works;
        assert_eq!(ids(&third), vec![("1".to_string(), WorkKind::Add)]);
    }

    #[test]
    fn halted_key_rejects_and_drains_until_reset() {
        let mut queue = queue(OrderingMode::Ordered, false);
        let _a = queue.submit(WorkItem::add("books", "1", "A")).expect("open");
        let _b = queue.submit(WorkItem::update("books", "1", "B")).expect("open");

        let first = queue.take_ready().works;
        let work = &first[0];
        let drained = queue.complete(
            &work.item,
            work.seqs().collect::<Vec<_>>(),
            Some(FailureReason::new(FailureKind::Rejected, "bad")),
        );
        assert_eq!(ids(&drained), vec![("1".to_string(), WorkKind::Update)]);
        assert_eq!(queue.outstanding(), 0);

        let key = RoutingKey::new(None, "1");
        assert!(queue.is_halted(&key));
        assert!(matches!(
            queue.submit(WorkItem::add("books", "1", "C")),
            Err(OrchestrationError::RoutingKeyHalted { .. })
        ));
        assert!(queue.submit(WorkItem::add("books", "2", "C")).is_ok());

        assert!(queue.reset_routing_key(&key));
        assert!(queue.submit(WorkItem::add("books", "1", "C")).is_ok());
    }

    #[test]
    fn submissions_are_validated() {
        let mut queue = OrchestrationQueue::new("books", OrderingMode::Ordered, false, 1);
        assert!(matches!(
            queue.submit(WorkItem::add("movies", "1", "A")),
            Err(OrchestrationError::WrongIndex { .. })
        ));
        let _a = queue.submit(WorkItem::add("books", "1", "A")).expect("open");
        assert!(matches!(
            queue.submit(WorkItem::add("books", "2", "B")),
            Err(OrchestrationError::Backpressure { pending: 1, .. })
        ));

        let drained = queue.begin_close();
        assert_eq!(drained.len(), 1);
        assert!(matches!(
            queue.submit(WorkItem::add("books", "3", "C")),
            Err(OrchestrationError::Closed { .. })
        ));
    }

    #[test]
    fn completed_through_tracks_outstanding_submissions() {
        let mut queue = queue(OrderingMode::Ordered, false);
        assert!(queue.completed_through(queue.last_seq()));
        let _a = queue.submit(WorkItem::add("books", "1", "A")).expect("open");
        let target = queue.last_seq();
        let _b = queue.submit(WorkItem::add("books", "2", "B")).expect("open");
        assert!(!queue.completed_through(target));

        let works = queue.take_ready().works;
        let first = works.into_iter().next().expect("work");
        complete_all(&mut queue, vec![first]);
        assert!(queue.completed_through(target));
        assert!(!queue.completed_through(queue.last_seq()));
    }
}
