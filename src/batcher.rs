//! Groups ready works into work sets bounded by size, count and time
//!
//! The batcher is owned by the scheduling task of one index and is never
//! shared. Closed work sets are handed back to the caller, which dispatches
//! them asynchronously.

use ahash::AHashSet;
use log::trace;
use std::time::{Duration, Instant};

use crate::config::BatchConfig;
use crate::work::{QueuedWork, RoutingKey, WorkSet};

struct OpenSet {
    set: WorkSet,
    keys: AHashSet<RoutingKey>,
    opened_at: Instant,
}

pub(crate) struct Batcher {
    max_items: usize,
    max_bytes: usize,
    max_wait: Duration,
    open: Option<OpenSet>,
    next_set_id: u64,
}

impl Batcher {
    pub(crate) fn new(config: &BatchConfig) -> Self {
        Self {
            max_items: config.max_items().max(1),
            max_bytes: config.max_bytes().max(1),
            max_wait: config.max_wait(),
            open: None,
            next_set_id: 1,
        }
    }

    /// Add a work to the open set
    ///
    /// When the work's routing key is already in the open set, or adding it
    /// would exceed the byte threshold (checked first) or the item threshold,
    /// the open set is closed and returned and the work starts a new set.
    pub(crate) fn offer(&mut self, work: QueuedWork) -> Option<WorkSet> {
        let size = work.item.estimated_size();
        let must_close = self.open.as_ref().is_some_and(|open| {
            if open.keys.contains(work.key()) {
                trace!("closing work set {}: routing key {} already present", open.set.id(), work.key());
                return true;
            }
            if open.set.estimated_bytes() + size > self.max_bytes {
                trace!("closing work set {}: byte threshold reached", open.set.id());
                return true;
            }
            open.set.len() + 1 > self.max_items
        });

        let closed = if must_close { self.flush() } else { None };

        if self.open.is_none() {
            let id = self.next_set_id;
            self.next_set_id += 1;
            self.open = Some(OpenSet {
                set: WorkSet::new(id),
                keys: AHashSet::new(),
                opened_at: Instant::now(),
            });
        }
        if let Some(open) = self.open.as_mut() {
            open.keys.insert(work.key().clone());
            open.set.push(work);
        }
        closed
    }

    /// Close the open set; `None` when nothing is buffered
    pub(crate) fn flush(&mut self) -> Option<WorkSet> {
        self.open
            .take()
            .map(|open| open.set)
            .filter(|set| !set.is_empty())
    }

    /// Wrap a single work into its own set, bypassing the open one
    pub(crate) fn solo(&mut self, work: QueuedWork) -> WorkSet {
        let id = self.next_set_id;
        self.next_set_id += 1;
        let mut set = WorkSet::new(id);
        set.push(work);
        set
    }

    /// The open set reached a threshold and should be dispatched now
    pub(crate) fn is_full(&self) -> bool {
        self.open.as_ref().is_some_and(|open| {
            open.set.len() >= self.max_items || open.set.estimated_bytes() >= self.max_bytes
        })
    }

    /// Instant at which the open set must be dispatched even if not full
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.open.as_ref().map(|open| open.opened_at + self.max_wait)
    }

    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| deadline <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::{Ticket, WORK_OVERHEAD_BYTES, WorkItem};
    use proptest::prelude::*;

    fn config(max_items: usize, max_bytes: usize) -> BatchConfig {
        crate::config::OrchestratorConfig::builder()
            .max_items(max_items)
            .max_bytes(max_bytes)
            .max_wait(Duration::from_millis(50))
            .build()
            .expect("valid config")
            .batch()
            .clone()
    }

    fn work(seq: u64, id: &str, payload: &str) -> QueuedWork {
        let (ticket, _future) = Ticket::new(seq, "books");
        QueuedWork::new(WorkItem::add("books", id, payload), ticket)
    }

    fn ids(set: &WorkSet) -> Vec<String> {
        set.items().iter().map(|i| i.document_id().to_string()).collect()
    }

    #[test]
    fn empty_flush_is_a_no_op() {
        let mut batcher = Batcher::new(&config(10, 1_000_000));
        assert!(batcher.flush().is_none());
        assert!(batcher.deadline().is_none());
        assert!(!batcher.is_full());
    }

    #[test]
    fn same_routing_key_starts_a_new_set() {
        let mut batcher = Batcher::new(&config(10, 1_000_000));
        assert!(batcher.offer(work(1, "1", "A")).is_none());
        assert!(batcher.offer(work(2, "2", "A")).is_none());
        let closed = batcher.offer(work(3, "1", "B")).expect("duplicate key closes the set");
        assert_eq!(ids(&closed), vec!["1", "2"]);

        let rest = batcher.flush().expect("open set");
        assert_eq!(ids(&rest), vec!["1"]);
        assert_ne!(closed.id(), rest.id());
    }

    #[test]
    fn item_threshold_closes_the_set() {
        let mut batcher = Batcher::new(&config(2, 1_000_000));
        assert!(batcher.offer(work(1, "1", "A")).is_none());
        assert!(batcher.offer(work(2, "2", "A")).is_none());
        assert!(batcher.is_full());
        let closed = batcher.offer(work(3, "3", "A")).expect("count threshold");
        assert_eq!(closed.len(), 2);
    }

    #[test]
    fn byte_threshold_is_checked_before_count() {
        let one = WORK_OVERHEAD_BYTES + 1 + 10;
        let mut batcher = Batcher::new(&config(10, one * 2));
        assert!(batcher.offer(work(1, "1", "0123456789")).is_none());
        assert!(batcher.offer(work(2, "2", "0123456789")).is_none());
        assert!(batcher.is_full());
        let closed = batcher.offer(work(3, "3", "0123456789")).expect("byte threshold");
        assert_eq!(closed.len(), 2);
        assert_eq!(closed.estimated_bytes(), one * 2);
    }

    #[test]
    fn oversized_work_travels_alone() {
        let mut batcher = Batcher::new(&config(10, 16));
        assert!(batcher.offer(work(1, "1", "a payload far larger than the limit")).is_none());
        let closed = batcher.offer(work(2, "2", "x")).expect("oversized set closes");
        assert_eq!(ids(&closed), vec!["1"]);
    }

    #[test]
    fn deadline_follows_max_wait() {
        let mut batcher = Batcher::new(&config(10, 1_000_000));
        let before = Instant::now();
        batcher.offer(work(1, "1", "A"));
        let deadline = batcher.deadline().expect("open set has a deadline");
        assert!(deadline >= before + Duration::from_millis(50));
        assert!(!batcher.is_due(before));
        assert!(batcher.is_due(deadline));
    }

    proptest! {
        #[test]
        fn work_sets_never_repeat_a_key_and_keep_submission_order(
            docs in proptest::collection::vec((0u8..6, 0usize..40), 1..60),
            max_items in 1usize..8,
        ) {
            let mut batcher = Batcher::new(&config(max_items, 400));
            let mut sets = Vec::new();
            for (seq, (doc, len)) in docs.iter().enumerate() {
                let payload = "x".repeat(*len);
                if let Some(set) = batcher.offer(work(seq as u64, &doc.to_string(), &payload)) {
                    sets.push(set);
                }
            }
            sets.extend(batcher.flush());

            let mut seen = Vec::new();
            for set in &sets {
                prop_assert!(!set.is_empty());
                prop_assert!(set.len() <= max_items);
                let keys: AHashSet<_> = set.items().iter().map(|i| i.routing_key().clone()).collect();
                prop_assert_eq!(keys.len(), set.len());
                if set.len() > 1 {
                    prop_assert!(set.estimated_bytes() <= 400);
                }
                seen.extend(ids(set));
            }
            let submitted: Vec<String> = docs.iter().map(|(doc, _)| doc.to_string()).collect();
            prop_assert_eq!(seen, submitted);
        }
    }
}
