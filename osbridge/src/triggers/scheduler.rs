//! Priority fire scheduler.
//!
//! Watcher fires queue here ordered by (priority desc, enqueue order asc);
//! the daemon's worker loop dequeues, consults the conflict resolver, and
//! submits the built plan to the executor.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use tokio::sync::Notify;

use super::models::TriggerFireEvent;

#[derive(Debug)]
pub struct QueuedFire {
    pub trigger_id: String,
    pub priority: i32,
    pub event: TriggerFireEvent,
    seq: u64,
}

impl PartialEq for QueuedFire {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueuedFire {}

impl Ord for QueuedFire {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier enqueue.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedFire {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct PriorityFireScheduler {
    queue: Mutex<BinaryHeap<QueuedFire>>,
    notify: Notify,
    seq: AtomicU64,
}

impl PriorityFireScheduler {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn enqueue(&self, trigger_id: &str, priority: i32, event: TriggerFireEvent) {
        let fire = QueuedFire {
            trigger_id: trigger_id.to_string(),
            priority,
            event,
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
        };
        if let Ok(mut queue) = self.queue.lock() {
            queue.push(fire);
        }
        self.notify.notify_one();
    }

    /// Await the next fire, highest priority first.
    pub async fn next(&self) -> QueuedFire {
        loop {
            if let Some(fire) = self.queue.lock().ok().and_then(|mut q| q.pop()) {
                return fire;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PriorityFireScheduler {
    fn default() -> Self {
        Self::new()
    }
}
