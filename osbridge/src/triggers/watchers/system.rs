//! System watchers: filesystem changes, process transitions, resource
//! thresholds.

use async_trait::async_trait;
use notify::{RecursiveMode, Watcher as _};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use sysinfo::System;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::temporal::{abort_task, store_task, TriggerIdent};
use super::{FireCallback, Watcher};
use crate::errors::{BridgeError, BridgeResult};
use crate::triggers::models::{FsEventKind, ProcessTransition, ResourceMetric, TriggerDefinition};

/// Watches a path via the platform notifier, coalescing event storms into
/// one fire per window.
pub struct FileSystemWatcher {
    ident: TriggerIdent,
    path: PathBuf,
    mask: Vec<FsEventKind>,
    coalesce: Duration,
    notifier: Mutex<Option<notify::RecommendedWatcher>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FileSystemWatcher {
    pub fn new(
        trigger: &TriggerDefinition,
        path: &str,
        mask: Vec<FsEventKind>,
        coalesce_ms: u64,
    ) -> Self {
        Self {
            ident: TriggerIdent::of(trigger),
            path: PathBuf::from(path),
            mask,
            coalesce: Duration::from_millis(coalesce_ms.max(1)),
            notifier: Mutex::new(None),
            task: Mutex::new(None),
        }
    }
}

fn classify(kind: &notify::EventKind) -> Option<FsEventKind> {
    use notify::event::ModifyKind;
    match kind {
        notify::EventKind::Create(_) => Some(FsEventKind::Created),
        notify::EventKind::Remove(_) => Some(FsEventKind::Deleted),
        notify::EventKind::Modify(ModifyKind::Name(_)) => Some(FsEventKind::Moved),
        notify::EventKind::Modify(_) => Some(FsEventKind::Modified),
        _ => None,
    }
}

#[async_trait]
impl Watcher for FileSystemWatcher {
    async fn start(&self, callback: FireCallback) -> BridgeResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(FsEventKind, Vec<PathBuf>)>();
        let mask = self.mask.clone();

        let mut notifier = notify::recommended_watcher(
            move |result: Result<notify::Event, notify::Error>| {
                let Ok(event) = result else { return };
                let Some(kind) = classify(&event.kind) else {
                    return;
                };
                if !mask.is_empty() && !mask.contains(&kind) {
                    return;
                }
                let _ = tx.send((kind, event.paths));
            },
        )
        .map_err(|e| BridgeError::WatcherFailed(format!("notify init: {e}")))?;
        notifier
            .watch(&self.path, RecursiveMode::Recursive)
            .map_err(|e| {
                BridgeError::WatcherFailed(format!("watch {:?}: {e}", self.path))
            })?;
        if let Ok(mut slot) = self.notifier.lock() {
            *slot = Some(notifier);
        }

        let ident = self.ident.clone();
        let coalesce = self.coalesce;
        let handle = tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                // Coalesce the storm: drain everything arriving inside the
                // window into one fire.
                let mut kinds = vec![first.0];
                let mut paths = first.1;
                tokio::time::sleep(coalesce).await;
                while let Ok((kind, mut more)) = rx.try_recv() {
                    kinds.push(kind);
                    paths.append(&mut more);
                }
                paths.dedup();
                let event_type = format!("fs.{:?}", kinds[0]).to_lowercase();
                let coalesced = kinds.len();
                let payload = serde_json::json!({
                    "kinds": kinds,
                    "paths": paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
                    "coalesced": coalesced,
                });
                callback(ident.event(&event_type, payload));
            }
        });
        store_task(&self.task, handle);
        Ok(())
    }

    async fn stop(&self) {
        if let Ok(mut slot) = self.notifier.lock() {
            slot.take();
        }
        abort_task(&self.task);
    }
}

/// Polls the process table and fires on start/stop transitions of a
/// process matched by name or pid.
pub struct ProcessWatcher {
    ident: TriggerIdent,
    name: Option<String>,
    pid: Option<u32>,
    on: ProcessTransition,
    poll: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessWatcher {
    pub fn new(
        trigger: &TriggerDefinition,
        name: Option<String>,
        pid: Option<u32>,
        on: ProcessTransition,
        poll_interval_s: f64,
    ) -> Self {
        Self {
            ident: TriggerIdent::of(trigger),
            name,
            pid,
            on,
            poll: Duration::from_secs_f64(poll_interval_s.max(0.1)),
            task: Mutex::new(None),
        }
    }

    fn is_present(system: &System, name: &Option<String>, pid: Option<u32>) -> bool {
        system.processes().iter().any(|(process_pid, process)| {
            if let Some(pid) = pid {
                if process_pid.as_u32() != pid {
                    return false;
                }
            }
            if let Some(name) = name {
                if !process.name().eq_ignore_ascii_case(name) {
                    return false;
                }
            }
            name.is_some() || pid.is_some()
        })
    }
}

#[async_trait]
impl Watcher for ProcessWatcher {
    async fn start(&self, callback: FireCallback) -> BridgeResult<()> {
        let ident = self.ident.clone();
        let name = self.name.clone();
        let pid = self.pid;
        let on = self.on;
        let poll = self.poll;
        let handle = tokio::spawn(async move {
            let mut system = System::new();
            system.refresh_processes();
            let mut present = Self::is_present(&system, &name, pid);
            loop {
                tokio::time::sleep(poll).await;
                system.refresh_processes();
                let now_present = Self::is_present(&system, &name, pid);
                if now_present != present {
                    let event_type = if now_present { "process.start" } else { "process.stop" };
                    let matches = matches!(
                        (on, now_present),
                        (ProcessTransition::Both, _)
                            | (ProcessTransition::Start, true)
                            | (ProcessTransition::Stop, false)
                    );
                    if matches {
                        callback(ident.event(
                            event_type,
                            serde_json::json!({"name": name, "pid": pid}),
                        ));
                    }
                    present = now_present;
                }
            }
        });
        store_task(&self.task, handle);
        Ok(())
    }

    async fn stop(&self) {
        abort_task(&self.task);
    }
}

/// Fires when CPU/memory/disk usage crosses a threshold; hysteresis keeps
/// it from oscillating at the boundary.
pub struct ResourceWatcher {
    ident: TriggerIdent,
    metric: ResourceMetric,
    threshold_pct: f64,
    hysteresis_pct: f64,
    poll: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ResourceWatcher {
    pub fn new(
        trigger: &TriggerDefinition,
        metric: ResourceMetric,
        threshold_pct: f64,
        hysteresis_pct: f64,
        poll_interval_s: f64,
    ) -> Self {
        Self {
            ident: TriggerIdent::of(trigger),
            metric,
            threshold_pct,
            hysteresis_pct,
            poll: Duration::from_secs_f64(poll_interval_s.max(0.1)),
            task: Mutex::new(None),
        }
    }

    fn sample(system: &mut System, metric: ResourceMetric) -> f64 {
        match metric {
            ResourceMetric::Cpu => {
                system.refresh_cpu();
                system.global_cpu_info().cpu_usage() as f64
            }
            ResourceMetric::Memory => {
                system.refresh_memory();
                let total = system.total_memory();
                if total == 0 {
                    0.0
                } else {
                    system.used_memory() as f64 / total as f64 * 100.0
                }
            }
            ResourceMetric::Disk => {
                let disks = sysinfo::Disks::new_with_refreshed_list();
                disks
                    .iter()
                    .map(|disk| {
                        let total = disk.total_space();
                        if total == 0 {
                            0.0
                        } else {
                            (total - disk.available_space()) as f64 / total as f64 * 100.0
                        }
                    })
                    .fold(0.0, f64::max)
            }
        }
    }
}

#[async_trait]
impl Watcher for ResourceWatcher {
    async fn start(&self, callback: FireCallback) -> BridgeResult<()> {
        let ident = self.ident.clone();
        let metric = self.metric;
        let threshold = self.threshold_pct;
        let rearm_below = (self.threshold_pct - self.hysteresis_pct).max(0.0);
        let poll = self.poll;
        let handle = tokio::spawn(async move {
            let mut system = System::new();
            let mut armed = true;
            loop {
                tokio::time::sleep(poll).await;
                let value = Self::sample(&mut system, metric);
                if armed && value >= threshold {
                    armed = false;
                    callback(ident.event(
                        &format!("resource.{metric:?}").to_lowercase(),
                        serde_json::json!({"value_pct": value, "threshold_pct": threshold}),
                    ));
                } else if !armed && value <= rearm_below {
                    armed = true;
                }
            }
        });
        store_task(&self.task, handle);
        Ok(())
    }

    async fn stop(&self) {
        abort_task(&self.task);
    }
}
