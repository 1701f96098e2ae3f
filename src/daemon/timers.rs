// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Single-shot cancellable timers.
//!
//! Pending timers live in a priority queue ordered by fire time. Cancellation
//! is lazy: a cancelled handle is dropped from the live set and skipped when
//! it reaches the head of the queue. Entities hold at most one
//! `Option<TimerHandle>` each and replace it with cancel-then-schedule.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::time::Instant;

use crate::protocols::TimerType;

/// Identifies one scheduled timer; never reused within a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// A timer popped from the queue because its deadline passed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTimer {
    pub handle: TimerHandle,
    pub timer_type: TimerType,
    pub fire_at: Instant,
}

/// A scheduled timer with its fire time and type
#[derive(Debug, Clone)]
struct ScheduledTimer {
    fire_at: Instant,
    handle: TimerHandle,
    timer_type: TimerType,
}

impl PartialEq for ScheduledTimer {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.handle == other.handle
    }
}

impl Eq for ScheduledTimer {}

impl PartialOrd for ScheduledTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTimer {
    // Equal deadlines fire in scheduling order
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then_with(|| self.handle.cmp(&other.handle))
    }
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    timers: BinaryHeap<Reverse<ScheduledTimer>>,
    live: HashSet<TimerHandle>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `timer_type` to fire at `fire_at`
    pub fn schedule(&mut self, timer_type: TimerType, fire_at: Instant) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;
        self.live.insert(handle);
        self.timers.push(Reverse(ScheduledTimer {
            fire_at,
            handle,
            timer_type,
        }));
        handle
    }

    /// Cancel a pending timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.live.remove(&handle)
    }

    /// Cancel whatever `slot` holds and leave it empty
    pub fn cancel_slot(&mut self, slot: &mut Option<TimerHandle>) {
        if let Some(handle) = slot.take() {
            self.cancel(handle);
        }
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.live.contains(&handle)
    }

    /// Number of live (not cancelled, not fired) timers
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn discard_cancelled_head(&mut self) {
        while let Some(Reverse(head)) = self.timers.peek() {
            if self.live.contains(&head.handle) {
                break;
            }
            self.timers.pop();
        }
    }

    /// Deadline of the earliest live timer
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.discard_cancelled_head();
        self.timers.peek().map(|Reverse(t)| t.fire_at)
    }

    /// Remove and return every live timer due at or before `now`, earliest first
    pub fn pop_expired(&mut self, now: Instant) -> Vec<FiredTimer> {
        let mut fired = Vec::new();
        while let Some(Reverse(head)) = self.timers.peek() {
            if head.fire_at > now {
                break;
            }
            let Some(Reverse(timer)) = self.timers.pop() else {
                break;
            };
            if self.live.remove(&timer.handle) {
                fired.push(FiredTimer {
                    handle: timer.handle,
                    timer_type: timer.timer_type,
                    fire_at: timer.fire_at,
                });
            }
        }
        fired
    }
}
