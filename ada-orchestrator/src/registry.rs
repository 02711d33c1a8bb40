//! In-flight background tasks, at most one per entity id.

use crate::error::{OrchestratorError, Result};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Create,
    Destroy,
    Transfer,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Create => "create",
            TaskKind::Destroy => "destroy",
            TaskKind::Transfer => "transfer",
        };
        f.write_str(name)
    }
}

type BoxTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct QueuedTask {
    kind: TaskKind,
    task: BoxTask,
    on_panic: BoxTask,
}

struct TaskEntry {
    kind: TaskKind,
    abort: AbortHandle,
    generation: u64,
    next: Option<QueuedTask>,
}

/// Tracks spawned tasks by the id of the machine or job they work on.
///
/// A finished task removes its own entry, starting the task queued behind
/// it if any. Removing an entry bumps a change counter so callers can wait
/// for a task, or for all tasks, to finish.
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, TaskEntry>>,
    next_generation: AtomicU64,
    changes: watch::Sender<u64>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            changes: watch::Sender::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TaskEntry>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn `task` for `key`, refusing when a task for `key` is still live.
    ///
    /// If `task` panics, `on_panic` runs before the entry is released so the
    /// entity can be moved to a terminal state.
    pub fn spawn<F, P>(self: &Arc<Self>, key: &str, kind: TaskKind, task: F, on_panic: P) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
        P: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.lock();
        if let Some(existing) = tasks.get(key) {
            return Err(OrchestratorError::InvalidState(format!(
                "{} task already running for {}",
                existing.kind, key
            )));
        }
        self.start(&mut tasks, key, kind, Box::pin(task), Box::pin(on_panic));
        Ok(())
    }

    /// Spawn `task` for `key` once the live task for `key` has finished, or
    /// right away when there is none. Only one task can wait per key.
    pub fn spawn_after<F, P>(
        self: &Arc<Self>,
        key: &str,
        kind: TaskKind,
        task: F,
        on_panic: P,
    ) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
        P: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.lock();
        if let Some(existing) = tasks.get_mut(key) {
            if let Some(queued) = &existing.next {
                return Err(OrchestratorError::InvalidState(format!(
                    "{} task already queued for {}",
                    queued.kind, key
                )));
            }
            debug!(task = %kind, key, after = %existing.kind, "task queued");
            existing.next = Some(QueuedTask {
                kind,
                task: Box::pin(task),
                on_panic: Box::pin(on_panic),
            });
            return Ok(());
        }
        self.start(&mut tasks, key, kind, Box::pin(task), Box::pin(on_panic));
        Ok(())
    }

    fn start(
        self: &Arc<Self>,
        tasks: &mut HashMap<String, TaskEntry>,
        key: &str,
        kind: TaskKind,
        task: BoxTask,
        on_panic: BoxTask,
    ) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(task);
        tasks.insert(
            key.to_string(),
            TaskEntry {
                kind,
                abort: handle.abort_handle(),
                generation,
                next: None,
            },
        );

        let registry = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {
                    debug!(task = %kind, key = %key, "task cancelled");
                }
                Err(e) => {
                    error!(task = %kind, key = %key, "task panicked: {}", e);
                    on_panic.await;
                }
            }
            registry.release(&key, generation);
        });
    }

    fn release(self: &Arc<Self>, key: &str, generation: u64) {
        let removed = {
            let mut tasks = self.lock();
            let current = matches!(tasks.get(key), Some(entry) if entry.generation == generation);
            if current {
                if let Some(next) = tasks.remove(key).and_then(|entry| entry.next) {
                    self.start(&mut tasks, key, next.kind, next.task, next.on_panic);
                }
            }
            current
        };
        if removed {
            self.changes.send_modify(|count| *count += 1);
        }
    }

    /// Abort the task for `key`, returning what it was doing.
    ///
    /// The entry is released immediately so a replacement can be spawned. A
    /// task queued behind it is dropped.
    pub fn abort(&self, key: &str) -> Option<TaskKind> {
        let entry = self.lock().remove(key)?;
        entry.abort.abort();
        self.changes.send_modify(|count| *count += 1);
        debug!(task = %entry.kind, key, "task aborted");
        Some(entry.kind)
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn active_kind(&self, key: &str) -> Option<TaskKind> {
        self.lock().get(key).map(|entry| entry.kind)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until no task is registered for `key`.
    pub async fn wait_for(&self, key: &str) {
        let mut changes = self.changes.subscribe();
        while self.is_active(key) {
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wait until every registered task has finished.
    pub async fn wait_idle(&self) {
        let mut changes = self.changes.subscribe();
        while !self.is_empty() {
            if changes.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
