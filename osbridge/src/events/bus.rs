//! Typed topic fan-out with bounded per-sink queues.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;

use crate::errors::{BridgeError, BridgeResult};

/// The closed set of event topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Plans,
    Actions,
    Security,
    Permissions,
    Errors,
    Perception,
    Iot,
    Db,
    Filesystem,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Plans => "plans",
            Topic::Actions => "actions",
            Topic::Security => "security",
            Topic::Permissions => "permissions",
            Topic::Errors => "errors",
            Topic::Perception => "perception",
            Topic::Iot => "iot",
            Topic::Db => "db",
            Topic::Filesystem => "filesystem",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One emitted event. Serialises to a single NDJSON line
/// `{ts, topic, kind, ...payload}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unix epoch milliseconds.
    pub ts: i64,
    pub topic: Topic,
    pub kind: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(topic: Topic, kind: impl Into<String>, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        Self {
            ts: Utc::now().timestamp_millis(),
            topic,
            kind: kind.into(),
            payload,
        }
    }
}

/// Delivery target for events. Implementations must tolerate bursts and
/// must not assume any particular calling task.
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, event: &Event) -> BridgeResult<()>;
}

/// Discards everything.
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    fn name(&self) -> &str {
        "null"
    }
    async fn deliver(&self, _event: &Event) -> BridgeResult<()> {
        Ok(())
    }
}

/// Append-only NDJSON file sink. `ts` is clamped monotone non-decreasing
/// within one file.
pub struct FileSink {
    path: PathBuf,
    last_ts: AtomicU64,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_ts: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl EventSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn deliver(&self, event: &Event) -> BridgeResult<()> {
        let mut record = event.clone();
        let floor = self.last_ts.load(Ordering::Acquire) as i64;
        if record.ts < floor {
            record.ts = floor;
        }
        self.last_ts.store(record.ts as u64, Ordering::Release);

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

/// Broadcasts to children; a failing child is logged and skipped, never
/// propagated.
pub struct FanoutSink {
    children: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(children: Vec<Arc<dyn EventSink>>) -> Self {
        Self { children }
    }
}

#[async_trait]
impl EventSink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn deliver(&self, event: &Event) -> BridgeResult<()> {
        for child in &self.children {
            if let Err(e) = child.deliver(event).await {
                tracing::warn!(sink = child.name(), error = %e, "event sink failed; skipping");
            }
        }
        Ok(())
    }
}

struct SinkQueue {
    sink: Arc<dyn EventSink>,
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
    /// True while the drain task is delivering a popped event; `flush`
    /// must wait for it as well as for an empty queue.
    busy: AtomicBool,
}

/// Non-blocking producer-side event bus. One drain task per registered sink
/// preserves FIFO order within that sink.
pub struct EventBus {
    sinks: Mutex<Vec<Arc<SinkQueue>>>,
    default_capacity: usize,
}

impl EventBus {
    pub fn new(default_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            sinks: Mutex::new(Vec::new()),
            default_capacity: default_capacity.max(1),
        })
    }

    /// Register a sink and spawn its drain task.
    pub fn register(self: &Arc<Self>, sink: Arc<dyn EventSink>) {
        let entry = Arc::new(SinkQueue {
            sink,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: self.default_capacity,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            busy: AtomicBool::new(false),
        });
        if let Ok(mut sinks) = self.sinks.lock() {
            sinks.push(entry.clone());
        }
        tokio::spawn(drain_loop(entry));
    }

    /// Enqueue an event for every sink. Never blocks; on a full queue the
    /// oldest event is dropped and counted.
    pub fn emit(&self, topic: Topic, kind: impl Into<String>, payload: Value) {
        let event = Event::new(topic, kind, payload);
        let sinks = match self.sinks.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };
        for entry in sinks {
            if entry.closed.load(Ordering::Acquire) {
                continue;
            }
            if let Ok(mut queue) = entry.queue.lock() {
                if queue.len() >= entry.capacity {
                    queue.pop_front();
                    entry.dropped.fetch_add(1, Ordering::Relaxed);
                }
                queue.push_back(event.clone());
            }
            entry.notify.notify_one();
        }
    }

    /// Total events dropped across all sinks due to queue overflow.
    pub fn events_dropped(&self) -> u64 {
        self.sinks
            .lock()
            .map(|sinks| {
                sinks
                    .iter()
                    .map(|s| s.dropped.load(Ordering::Relaxed))
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Wait until every sink queue is empty. Test and shutdown helper.
    pub async fn flush(&self) {
        loop {
            let pending = self
                .sinks
                .lock()
                .map(|sinks| {
                    sinks.iter().any(|s| {
                        s.busy.load(Ordering::Acquire)
                            || s.queue.lock().map(|q| !q.is_empty()).unwrap_or(false)
                    })
                })
                .unwrap_or(false);
            if !pending {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    pub fn shutdown(&self) {
        if let Ok(sinks) = self.sinks.lock() {
            for entry in sinks.iter() {
                entry.closed.store(true, Ordering::Release);
                entry.notify.notify_one();
            }
        }
    }
}

async fn drain_loop(entry: Arc<SinkQueue>) {
    loop {
        entry.busy.store(true, Ordering::Release);
        let next = entry.queue.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(event) => {
                if let Err(e) = entry.sink.deliver(&event).await {
                    tracing::warn!(sink = entry.sink.name(), error = %e, "event delivery failed");
                }
            }
            None => {
                entry.busy.store(false, Ordering::Release);
                if entry.closed.load(Ordering::Acquire) {
                    return;
                }
                entry.notify.notified().await;
            }
        }
    }
}
