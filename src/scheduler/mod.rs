//! Execution-context abstraction
//!
//! A [`Scheduler`] runs opaque units of work, optionally after a delay,
//! optionally serialized on a named FIFO queue. Two implementations ship with
//! the crate:
//!
//! - [`PoolScheduler`]: a shared worker pool, parallel by default, with any
//!   number of internal single-flight serial queues;
//! - [`PinnedScheduler`]: one dedicated, named OS thread, always serial; this
//!   is the designated "UI-affinity" context. The engine hard-codes no
//!   platform thread; the application decides what the pinned thread means.
//!
//! Task cancellation is best-effort: it succeeds while the task is still
//! pending and removes it from whichever queue holds it; once a task has
//! started, neither backing context supports interruption and `cancel`
//! reports failure regardless of `may_interrupt`.

pub mod pinned;
pub mod pool;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::FlowResult;

pub use pinned::PinnedScheduler;
pub use pool::{PoolConfig, PoolScheduler};

/// An opaque unit of work handed to a scheduler.
pub struct Task {
    run: Box<dyn FnOnce() + Send + 'static>,
}

impl Task {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Task { run: Box::new(f) }
    }

    pub(crate) fn run(self) {
        (self.run)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Task")
    }
}

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;
const DONE: u8 = 3;

/// Lifecycle of a scheduled task, shared between the scheduler internals and
/// the [`TaskHandle`] returned to the caller. The pending → running and
/// pending → cancelled transitions race; compare-exchange makes exactly one
/// side win.
#[derive(Debug)]
pub(crate) struct TaskState {
    id: u64,
    phase: AtomicU8,
}

impl TaskState {
    pub(crate) fn new(id: u64) -> Arc<Self> {
        Arc::new(TaskState {
            id,
            phase: AtomicU8::new(PENDING),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Transition pending → running. False means the task was cancelled first.
    pub(crate) fn try_begin(&self) -> bool {
        self.phase
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Transition pending → cancelled. False means the task already started.
    pub(crate) fn try_cancel(&self) -> bool {
        self.phase
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn finish(&self) {
        let _ = self
            .phase
            .compare_exchange(RUNNING, DONE, Ordering::AcqRel, Ordering::Acquire);
    }

    fn phase(&self) -> u8 {
        self.phase.load(Ordering::Acquire)
    }
}

/// Handle to a scheduled task, used for best-effort cancellation and
/// introspection.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    state: Arc<TaskState>,
}

impl TaskHandle {
    pub(crate) fn new(state: Arc<TaskState>) -> Self {
        TaskHandle { state }
    }

    pub(crate) fn state(&self) -> &Arc<TaskState> {
        &self.state
    }

    pub fn id(&self) -> u64 {
        self.state.id()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.phase() == CANCELLED
    }

    pub fn has_started(&self) -> bool {
        matches!(self.state.phase(), RUNNING | DONE)
    }
}

/// Index of tasks submitted but not yet started, keyed by task id. Entries
/// leave the index when the task runs or is cancelled. Guarded by a mutex:
/// `schedule` and `cancel` may be called concurrently from any thread.
#[derive(Debug, Default)]
pub(crate) struct PendingIndex {
    inner: Mutex<HashMap<u64, Arc<TaskState>>>,
}

impl PendingIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, state: Arc<TaskState>) {
        self.inner.lock().unwrap().insert(state.id(), state);
    }

    pub(crate) fn remove(&self, id: u64) {
        self.inner.lock().unwrap().remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

/// One task plus its lifecycle, as carried by a serial queue.
///
/// A delayed serial task takes its queue position at submission time and
/// carries its deadline with it; the driver waits out the remainder when the
/// task reaches the head. This keeps queue order equal to submission order
/// even under mixed delays, and a burst submitted together is shifted as a
/// whole rather than spaced out.
pub(crate) struct QueuedTask {
    pub(crate) state: Arc<TaskState>,
    pub(crate) task: Task,
    pub(crate) deadline: Option<tokio::time::Instant>,
}

/// Name of the queue used when a serial submission does not pick one.
pub const DEFAULT_QUEUE: &str = "default";

/// An execution context for pipeline work.
pub trait Scheduler: Send + Sync {
    /// The label this scheduler is registered under.
    fn label(&self) -> &str;

    /// Submit a task for immediate parallel execution (or inherently serial
    /// execution on a single-threaded context).
    fn schedule_now(&self, task: Task) -> FlowResult<TaskHandle> {
        self.schedule(task, Duration::ZERO, false)
    }

    /// Submit a task, optionally delayed. With `serial`, the task joins the
    /// default FIFO queue: one task from that queue runs at a time, in
    /// submission order, and the next starts only after the previous run
    /// fully returned.
    fn schedule(&self, task: Task, delay: Duration, serial: bool) -> FlowResult<TaskHandle>;

    /// Submit a task onto a named serial queue, creating the queue on first
    /// use. The task takes its queue position at submission; a delay is
    /// waited out once the task reaches the head of the queue.
    fn schedule_named(&self, task: Task, delay: Duration, queue: &str) -> FlowResult<TaskHandle>;

    /// Best-effort cancellation. Succeeds iff the task had not started; a
    /// running task cannot be interrupted by either built-in context, so
    /// `may_interrupt` never rescues one.
    fn cancel(&self, handle: &TaskHandle, may_interrupt: bool) -> bool;

    /// Drop a named serial queue once its owner is done submitting. Tasks
    /// already queued still drain.
    fn retire_queue(&self, queue: &str);

    /// Number of tasks submitted but not yet started.
    fn pending_count(&self) -> usize;
}

lazy_static::lazy_static! {
    static ref BACKGROUND: Arc<PoolScheduler> = Arc::new(PoolScheduler::new("background"));
    static ref MAIN_AFFINITY: Arc<PinnedScheduler> = Arc::new(PinnedScheduler::new("main"));
}

/// The shared background worker-pool scheduler.
pub fn background() -> Arc<dyn Scheduler> {
    BACKGROUND.clone()
}

/// The designated single-threaded affinity scheduler.
pub fn main_affinity() -> Arc<dyn Scheduler> {
    MAIN_AFFINITY.clone()
}

/// Look up one of the default schedulers by label.
pub fn by_label(label: &str) -> Option<Arc<dyn Scheduler>> {
    match label {
        "background" => Some(background()),
        "main" => Some(main_affinity()),
        _ => None,
    }
}
