//! In-memory run queue.
//!
//! A min-heap over `next_run_at` plus a per-config sequence counter. The
//! heap is an index over durable state, rebuilt from the database on
//! startup; entries whose sequence no longer matches are stale (the
//! config was edited, rescheduled, or disabled) and are discarded lazily
//! on pop rather than searched for in the heap.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};

/// One scheduled run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueEntry {
    pub due_at: DateTime<Utc>,
    pub config_id: String,
    pub seq: u64,
}

impl Ord for DueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due_at
            .cmp(&other.due_at)
            .then_with(|| self.config_id.cmp(&other.config_id))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for DueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub struct RunQueue {
    heap: BinaryHeap<Reverse<DueEntry>>,
    seqs: HashMap<String, u64>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule (or reschedule) a config. Any previous entry for the
    /// config becomes stale.
    pub fn push(&mut self, config_id: &str, due_at: DateTime<Utc>) {
        let seq = self.seqs.entry(config_id.to_string()).or_insert(0);
        *seq += 1;
        self.heap.push(Reverse(DueEntry {
            due_at,
            config_id: config_id.to_string(),
            seq: *seq,
        }));
    }

    /// Remove a config from the schedule (its heap entries go stale).
    pub fn remove(&mut self, config_id: &str) {
        if let Some(seq) = self.seqs.get_mut(config_id) {
            *seq += 1;
        }
    }

    /// Earliest live due time, pruning stale entries from the top.
    pub fn next_due_at(&mut self) -> Option<DateTime<Utc>> {
        loop {
            let head = self.heap.peek()?;
            if self.is_live(&head.0) {
                return Some(head.0.due_at);
            }
            self.heap.pop();
        }
    }

    /// Pop up to `limit` live entries due at or before `now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>, limit: usize) -> Vec<DueEntry> {
        let mut due = Vec::new();
        while due.len() < limit {
            match self.heap.peek() {
                Some(head) if head.0.due_at <= now => {
                    let entry = self.heap.pop().expect("peeked entry").0;
                    if self.is_live(&entry) {
                        due.push(entry);
                    }
                }
                _ => break,
            }
        }
        due
    }

    /// Live entry count (prunes nothing; upper bound is fine for stats).
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn is_live(&self, entry: &DueEntry) -> bool {
        self.seqs.get(&entry.config_id).copied() == Some(entry.seq)
    }
}
