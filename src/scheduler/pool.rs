//! Worker-pool scheduler
//!
//! One shared pool backs everything submitted here: ad hoc parallel tasks and
//! any number of named serial queues. A serial queue is an unbounded FIFO
//! channel drained by a single driver; the driver runs one task at a time and
//! only takes the next after the previous run (including any nested
//! re-scheduling it performed) fully returned. Task bodies are allowed to
//! block, so they execute on the runtime's blocking pool, capped at the
//! configured worker count.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::{FlowError, FlowResult};

use super::{PendingIndex, QueuedTask, Scheduler, Task, TaskHandle, TaskState, DEFAULT_QUEUE};

/// Configuration for the worker-pool scheduler
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads. If None, uses num_cpus
    pub workers: Option<usize>,
    /// Name given to the pool's threads
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: None,
            thread_name: "flowline-worker".to_string(),
        }
    }
}

/// Parallel-by-default scheduler backed by a shared thread pool.
pub struct PoolScheduler {
    label: String,
    runtime: Runtime,
    queues: Mutex<HashMap<String, UnboundedSender<QueuedTask>>>,
    pending: Arc<PendingIndex>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl PoolScheduler {
    /// Create a pool scheduler with default configuration.
    pub fn new(label: &str) -> Self {
        Self::with_config(label, PoolConfig::default())
    }

    /// Create a pool scheduler with custom configuration.
    pub fn with_config(label: &str, config: PoolConfig) -> Self {
        let workers = config.workers.unwrap_or_else(num_cpus::get).max(2);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .max_blocking_threads(workers)
            .thread_name(config.thread_name)
            .enable_time()
            .build()
            .expect("failed to build worker-pool runtime");
        PoolScheduler {
            label: label.to_string(),
            runtime,
            queues: Mutex::new(HashMap::new()),
            pending: Arc::new(PendingIndex::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Stop accepting new tasks and drop all serial queues. Tasks already
    /// submitted still drain; the pool's threads stay alive until the
    /// scheduler itself is dropped.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.queues.lock().unwrap().clear();
        log::info!("pool scheduler '{}' shut down", self.label);
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn register(&self) -> Arc<TaskState> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = TaskState::new(id);
        self.pending.insert(state.clone());
        state
    }

    fn reject(&self) -> FlowError {
        FlowError::SchedulerClosed(self.label.clone())
    }

    fn ensure_queue(&self, name: &str) -> UnboundedSender<QueuedTask> {
        let mut queues = self.queues.lock().unwrap();
        if let Some(tx) = queues.get(name) {
            return tx.clone();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.runtime.spawn(drain_serial(rx, self.pending.clone()));
        queues.insert(name.to_string(), tx.clone());
        tx
    }

    fn submit_to_queue(&self, state: Arc<TaskState>, task: Task, delay: Duration, queue: &str) {
        let tx = self.ensure_queue(queue);
        let deadline = (!delay.is_zero()).then(|| tokio::time::Instant::now() + delay);
        let item = QueuedTask {
            state,
            task,
            deadline,
        };
        if let Err(e) = tx.send(item) {
            self.pending.remove(e.0.state.id());
            log::debug!("serial queue '{}' is gone; dropping task", queue);
        }
    }
}

impl Scheduler for PoolScheduler {
    fn label(&self) -> &str {
        &self.label
    }

    fn schedule(&self, task: Task, delay: Duration, serial: bool) -> FlowResult<TaskHandle> {
        if serial {
            return self.schedule_named(task, delay, DEFAULT_QUEUE);
        }
        if self.is_shut_down() {
            return Err(self.reject());
        }
        let state = self.register();
        let handle = TaskHandle::new(state.clone());
        let pending = self.pending.clone();
        self.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if state.try_begin() {
                pending.remove(state.id());
                if let Err(e) = tokio::task::spawn_blocking(move || task.run()).await {
                    log::warn!("scheduled task panicked: {}", e);
                }
                state.finish();
            } else {
                pending.remove(state.id());
            }
        });
        Ok(handle)
    }

    fn schedule_named(&self, task: Task, delay: Duration, queue: &str) -> FlowResult<TaskHandle> {
        if self.is_shut_down() {
            return Err(self.reject());
        }
        let state = self.register();
        let handle = TaskHandle::new(state.clone());
        self.submit_to_queue(state, task, delay, queue);
        Ok(handle)
    }

    fn cancel(&self, handle: &TaskHandle, _may_interrupt: bool) -> bool {
        if handle.state().try_cancel() {
            self.pending.remove(handle.id());
            true
        } else {
            false
        }
    }

    fn retire_queue(&self, queue: &str) {
        self.queues.lock().unwrap().remove(queue);
    }

    fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Single-flight driver for one serial queue. Cancelled tasks are skipped;
/// a panicking task is logged and does not poison the queue. A task can still
/// be cancelled while it waits out its deadline at the head of the queue.
async fn drain_serial(mut rx: UnboundedReceiver<QueuedTask>, pending: Arc<PendingIndex>) {
    while let Some(QueuedTask {
        state,
        task,
        deadline,
    }) = rx.recv().await
    {
        if let Some(deadline) = deadline {
            tokio::time::sleep_until(deadline).await;
        }
        if state.try_begin() {
            pending.remove(state.id());
            if let Err(e) = tokio::task::spawn_blocking(move || task.run()).await {
                log::warn!("serial task panicked: {}", e);
            }
            state.finish();
        } else {
            pending.remove(state.id());
        }
    }
}
