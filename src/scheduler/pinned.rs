//! Single-thread affinity scheduler
//!
//! One dedicated OS thread, named after the scheduler's label, executes every
//! task submitted here. Zero-delay submissions run in strict FIFO order; a
//! delayed submission joins the queue once its delay elapses. Because there is
//! only one thread, execution is inherently serial and the `serial` flag of
//! `schedule` is irrelevant.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::{describe_panic, FlowError, FlowResult};

use super::{PendingIndex, QueuedTask, Scheduler, Task, TaskHandle, TaskState};

/// Scheduler that pins all work to one designated thread.
pub struct PinnedScheduler {
    label: String,
    tx: UnboundedSender<QueuedTask>,
    handle: Handle,
    pending: Arc<PendingIndex>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl PinnedScheduler {
    /// Spawn the dedicated thread and return the scheduler. The thread runs a
    /// current-thread runtime so delayed submissions can use its timer; every
    /// task body executes inline on that thread.
    pub fn new(label: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<QueuedTask>();
        let (handle_tx, handle_rx) = std::sync::mpsc::channel();
        let pending = Arc::new(PendingIndex::new());
        let drain_pending = pending.clone();
        let thread_label = label.to_string();
        std::thread::Builder::new()
            .name(label.to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .expect("failed to build pinned runtime");
                let _ = handle_tx.send(runtime.handle().clone());
                runtime.block_on(drive(rx, drain_pending, thread_label));
            })
            .expect("failed to spawn pinned scheduler thread");
        let handle = handle_rx
            .recv()
            .expect("pinned scheduler thread failed to start");
        PinnedScheduler {
            label: label.to_string(),
            tx,
            handle,
            pending,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Stop accepting new tasks. Tasks already queued still drain.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        log::info!("pinned scheduler '{}' shut down", self.label);
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
}

impl Scheduler for PinnedScheduler {
    fn label(&self) -> &str {
        &self.label
    }

    fn schedule(&self, task: Task, delay: Duration, _serial: bool) -> FlowResult<TaskHandle> {
        if self.is_shut_down() {
            return Err(FlowError::SchedulerClosed(self.label.clone()));
        }
        let state = self.register();
        let handle = TaskHandle::new(state.clone());
        // A delayed task defers its queue entry rather than holding the lane:
        // later zero-delay submissions must not wait behind a sleeping one.
        let item = QueuedTask {
            state,
            task,
            deadline: None,
        };
        if delay.is_zero() {
            if let Err(e) = self.tx.send(item) {
                self.pending.remove(e.0.state.id());
                return Err(FlowError::SchedulerClosed(self.label.clone()));
            }
        } else {
            let tx = self.tx.clone();
            let pending = self.pending.clone();
            self.handle.spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = tx.send(item) {
                    pending.remove(e.0.state.id());
                }
            });
        }
        Ok(handle)
    }

    /// Every queue maps onto the single thread, so names are irrelevant here.
    fn schedule_named(&self, task: Task, delay: Duration, _queue: &str) -> FlowResult<TaskHandle> {
        self.schedule(task, delay, true)
    }

    fn cancel(&self, handle: &TaskHandle, _may_interrupt: bool) -> bool {
        if handle.state().try_cancel() {
            self.pending.remove(handle.id());
            true
        } else {
            false
        }
    }

    fn retire_queue(&self, _queue: &str) {}

    fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// FIFO driver for the pinned thread. Tasks run inline so thread affinity is
/// exact; a panicking task is logged and the thread keeps draining.
async fn drive(mut rx: UnboundedReceiver<QueuedTask>, pending: Arc<PendingIndex>, label: String) {
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
            if let Err(p) = catch_unwind(AssertUnwindSafe(|| task.run())) {
                log::warn!("task on pinned thread '{}' panicked: {}", label, describe_panic(p));
            }
            state.finish();
        } else {
            pending.remove(state.id());
        }
    }
}
