//! Composite watchers: AND / OR / NOT / SEQ / WINDOW over child watchers.
//!
//! Children fire into a shared evaluator task; the evaluator decides when
//! the composite condition as a whole is satisfied and fires upward.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::temporal::{abort_task, store_task, TriggerIdent};
use super::{FireCallback, Watcher};
use crate::errors::BridgeResult;
use crate::triggers::models::{CompositeOp, TriggerDefinition, TriggerFireEvent};

pub struct CompositeWatcher {
    ident: TriggerIdent,
    op: CompositeOp,
    children: Vec<Box<dyn Watcher>>,
    within: Option<Duration>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CompositeWatcher {
    pub fn new(
        trigger: &TriggerDefinition,
        op: CompositeOp,
        children: Vec<Box<dyn Watcher>>,
        within_s: Option<f64>,
    ) -> Self {
        Self {
            ident: TriggerIdent::of(trigger),
            op,
            children,
            within: within_s.map(Duration::from_secs_f64),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Watcher for CompositeWatcher {
    async fn start(&self, callback: FireCallback) -> BridgeResult<()> {
        let (tx, rx) = mpsc::unbounded_channel::<(usize, TriggerFireEvent)>();
        for (index, child) in self.children.iter().enumerate() {
            let tx = tx.clone();
            child
                .start(std::sync::Arc::new(move |event| {
                    let _ = tx.send((index, event));
                }))
                .await?;
        }

        let evaluator = Evaluator {
            ident: self.ident.clone(),
            op: self.op,
            child_count: self.children.len(),
            within: self.within,
            callback,
        };
        let handle = tokio::spawn(evaluator.run(rx));
        store_task(&self.task, handle);
        Ok(())
    }

    async fn stop(&self) {
        for child in &self.children {
            child.stop().await;
        }
        abort_task(&self.task);
    }
}

struct Evaluator {
    ident: TriggerIdent,
    op: CompositeOp,
    child_count: usize,
    within: Option<Duration>,
    callback: FireCallback,
}

impl Evaluator {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<(usize, TriggerFireEvent)>) {
        match self.op {
            CompositeOp::Any => self.run_any(&mut rx).await,
            CompositeOp::All => self.run_all(&mut rx).await,
            CompositeOp::Window => self.run_window(&mut rx).await,
            CompositeOp::Seq => self.run_seq(&mut rx).await,
            CompositeOp::Not => self.run_not(&mut rx).await,
        }
    }

    fn fire(&self, event_type: &str, payload: serde_json::Value) {
        (self.callback)(self.ident.event(event_type, payload));
    }

    async fn run_any(&self, rx: &mut mpsc::UnboundedReceiver<(usize, TriggerFireEvent)>) {
        while let Some((index, event)) = rx.recv().await {
            self.fire(
                "composite.any",
                serde_json::json!({"child": index, "child_event": event.event_type}),
            );
        }
    }

    /// Fires once every time all children have fired since the last
    /// composite fire.
    async fn run_all(&self, rx: &mut mpsc::UnboundedReceiver<(usize, TriggerFireEvent)>) {
        let mut seen = vec![false; self.child_count];
        while let Some((index, _event)) = rx.recv().await {
            if index < seen.len() {
                seen[index] = true;
            }
            if seen.iter().all(|s| *s) {
                seen.fill(false);
                self.fire(
                    "composite.all",
                    serde_json::json!({"children": self.child_count}),
                );
            }
        }
    }

    /// Fires when a child fires and records how many distinct children
    /// fired within the trailing window.
    async fn run_window(&self, rx: &mut mpsc::UnboundedReceiver<(usize, TriggerFireEvent)>) {
        let window = self.within.unwrap_or(Duration::from_secs(60));
        let mut recent: Vec<(usize, tokio::time::Instant)> = Vec::new();
        while let Some((index, event)) = rx.recv().await {
            let now = tokio::time::Instant::now();
            recent.retain(|(_, at)| now.duration_since(*at) <= window);
            recent.push((index, now));
            self.fire(
                "composite.window",
                serde_json::json!({
                    "child": index,
                    "child_event": event.event_type,
                    "events_in_window": recent.len(),
                }),
            );
        }
    }

    /// Children must fire in declaration order, each within the window of
    /// the previous. Out-of-order fires reset the sequence.
    async fn run_seq(&self, rx: &mut mpsc::UnboundedReceiver<(usize, TriggerFireEvent)>) {
        let within = self.within.unwrap_or(Duration::from_secs(60));
        let mut expected = 0usize;
        let mut last_at: Option<tokio::time::Instant> = None;
        while let Some((index, _event)) = rx.recv().await {
            let now = tokio::time::Instant::now();
            let in_window = last_at
                .map(|at| now.duration_since(at) <= within)
                .unwrap_or(true);

            if index == expected && (expected == 0 || in_window) {
                expected += 1;
                last_at = Some(now);
                if expected == self.child_count {
                    expected = 0;
                    last_at = None;
                    self.fire(
                        "composite.seq",
                        serde_json::json!({"children": self.child_count}),
                    );
                }
            } else if index == 0 {
                // A fresh start of the sequence.
                expected = 1;
                last_at = Some(now);
            } else {
                expected = 0;
                last_at = None;
            }
        }
    }

    /// Fires at the end of every window in which the child stayed silent.
    async fn run_not(&self, rx: &mut mpsc::UnboundedReceiver<(usize, TriggerFireEvent)>) {
        let window = self.within.unwrap_or(Duration::from_secs(60));
        loop {
            match tokio::time::timeout(window, rx.recv()).await {
                Ok(Some(_)) => {
                    // Child fired; window restarts silently.
                }
                Ok(None) => return,
                Err(_) => {
                    self.fire(
                        "composite.not",
                        serde_json::json!({"window_s": window.as_secs_f64()}),
                    );
                }
            }
        }
    }
}
