//! Deadline-ordered queue of per-alert timers.
//!
//! Timers are kept in a min-heap keyed by `(fire_at, seq)`. The heap is
//! only an ordering hint: the entry map is the source of truth, and
//! cancelling an alert removes its entries from the map at once, so a
//! cancelled timer can never be popped even though its heap slot lingers
//! until its deadline passes.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of one scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(u64);

/// A pending timer, as exported by [`TimerQueue::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTimer<T> {
    /// The timer id.
    pub id: TimerId,
    /// The alert the timer belongs to.
    pub alert_id: String,
    /// When it fires.
    pub fire_at: DateTime<Utc>,
    /// What to do when it fires.
    pub task: T,
}

#[derive(Debug)]
struct Entry<T> {
    alert_id: String,
    fire_at: DateTime<Utc>,
    task: T,
}

/// Min-heap of timers with a per-alert index for cancellation.
#[derive(Debug)]
pub struct TimerQueue<T> {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, u64)>>,
    entries: HashMap<u64, Entry<T>>,
    by_alert: HashMap<String, Vec<u64>>,
    next_seq: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            entries: HashMap::new(),
            by_alert: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<T> TimerQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `task` for `alert_id` at `fire_at`.
    pub fn schedule(&mut self, alert_id: impl Into<String>, fire_at: DateTime<Utc>, task: T) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;

        let alert_id = alert_id.into();
        self.by_alert.entry(alert_id.clone()).or_default().push(seq);
        self.entries.insert(
            seq,
            Entry {
                alert_id,
                fire_at,
                task,
            },
        );
        self.heap.push(Reverse((fire_at, seq)));
        TimerId(seq)
    }

    /// Cancels every pending timer of an alert. Returns how many were removed.
    pub fn cancel_alert(&mut self, alert_id: &str) -> usize {
        let Some(seqs) = self.by_alert.remove(alert_id) else {
            return 0;
        };
        seqs.iter()
            .filter(|seq| self.entries.remove(*seq).is_some())
            .count()
    }

    /// Removes and returns every task due at or before `now`, earliest first.
    /// Timers with the same deadline come out in scheduling order.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<T> {
        let mut due = Vec::new();
        while let Some(Reverse((fire_at, seq))) = self.heap.peek().copied() {
            if fire_at > now {
                break;
            }
            self.heap.pop();

            let Some(entry) = self.entries.remove(&seq) else {
                continue;
            };
            if let Some(seqs) = self.by_alert.get_mut(&entry.alert_id) {
                seqs.retain(|s| *s != seq);
                if seqs.is_empty() {
                    self.by_alert.remove(&entry.alert_id);
                }
            }
            due.push(entry.task);
        }
        due
    }

    /// Number of pending timers for an alert.
    #[must_use]
    pub fn pending_for(&self, alert_id: &str) -> usize {
        self.by_alert.get(alert_id).map_or(0, Vec::len)
    }

    /// Number of pending timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Clone> TimerQueue<T> {
    /// Exports every pending timer in firing order, so a host can persist
    /// them and re-schedule after a restart.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ScheduledTimer<T>> {
        let mut timers: Vec<_> = self
            .entries
            .iter()
            .map(|(seq, e)| ScheduledTimer {
                id: TimerId(*seq),
                alert_id: e.alert_id.clone(),
                fire_at: e.fire_at,
                task: e.task.clone(),
            })
            .collect();
        timers.sort_by_key(|t| (t.fire_at, t.id));
        timers
    }
}
