// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timer queue for the reactor.
//!
//! A binary min-heap of deadlines. Cancellation is lazy: entries are never
//! removed early; a fired entry whose id the owning machine no longer
//! recognizes is simply ignored at dispatch.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use super::event::{MachineId, Source, TimerId};

/// One armed timer.
#[derive(Debug)]
pub(crate) struct TimerEntry {
    pub deadline: Instant,
    pub id: TimerId,
    pub machine: MachineId,
    pub tag: Source,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse so BinaryHeap pops the earliest deadline first.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Min-heap of timer entries.
#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    next_id: TimerId,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer, returning its id.
    pub fn arm(&mut self, machine: MachineId, tag: Source, delay: Duration) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(TimerEntry {
            deadline: Instant::now() + delay,
            id,
            machine,
            tag,
        });
        id
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pop the next entry whose deadline has passed.
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerEntry> {
        if self.heap.peek().is_some_and(|e| e.deadline <= now) {
            self.heap.pop()
        } else {
            None
        }
    }

}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_order_is_earliest_first() {
        let mut q = TimerQueue::new();
        let late = q.arm(1, Source::Retry, Duration::from_secs(10));
        let early = q.arm(1, Source::Retry, Duration::from_millis(1));

        let far_future = Instant::now() + Duration::from_secs(60);
        assert_eq!(q.pop_due(far_future).unwrap().id, early);
        assert_eq!(q.pop_due(far_future).unwrap().id, late);
        assert!(q.pop_due(far_future).is_none());
    }

    #[test]
    fn test_pop_due_respects_deadline() {
        let mut q = TimerQueue::new();
        q.arm(1, Source::Retry, Duration::from_secs(10));

        assert!(q.pop_due(Instant::now()).is_none());
        assert_eq!(q.heap.len(), 1);
    }

    #[test]
    fn test_next_deadline() {
        let mut q = TimerQueue::new();
        assert!(q.next_deadline().is_none());

        q.arm(1, Source::Retry, Duration::from_secs(5));
        q.arm(1, Source::Retry, Duration::from_secs(1));

        let next = q.next_deadline().unwrap();
        assert!(next <= Instant::now() + Duration::from_secs(1));
    }

    #[test]
    fn test_ids_are_unique() {
        let mut q = TimerQueue::new();
        let a = q.arm(1, Source::Retry, Duration::ZERO);
        let b = q.arm(2, Source::Retry, Duration::ZERO);
        assert_ne!(a, b);
    }
}
