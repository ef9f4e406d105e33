//! Scheduling-boundary operators
//!
//! `subscribe_on` moves the act of subscribing, and therefore where
//! production begins, onto a scheduler. `observe_on` and `publish_on` move
//! emissions: upstream keeps running where it was subscribed, and each event
//! crossing the stage is re-submitted to the target scheduler.
//!
//! In serial mode a stage owns one private FIFO queue per subscription, so
//! events keep their relative order; the queue is retired once the final
//! event is enqueued. In parallel mode events are submitted independently and
//! no cross-event ordering is guaranteed. A rejected submission is treated as
//! a producer failure at this stage: `on_error`, then `on_final`.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::control::ControlNode;
use crate::error::{guard, FlowError, FlowResult};
use crate::observer::{Gate, Observer, SharedObserver};
use crate::scheduler::{Scheduler, Task};

use super::{Flow, Stage};

// ================================
// subscribe_on
// ================================

struct SubscribeOnStage<T> {
    upstream: Flow<T>,
    scheduler: Arc<dyn Scheduler>,
    delay: Duration,
    serial: bool,
}

impl<T: Send + 'static> Stage<T> for SubscribeOnStage<T> {
    fn subscribe_raw(&self, downstream: SharedObserver<T>) {
        let obs = Arc::new(ReconnectObserver {
            down: downstream,
            node: ControlNode::new(),
            gate: Gate::new(),
        });
        // Hand the control handle down before deferring, so a cancel issued
        // before the scheduled task runs is observed by it.
        obs.down.on_subscribe(obs.node.clone());

        let upstream = self.upstream.clone();
        let task_obs = obs.clone();
        let task = Task::new(move || {
            if task_obs.node.cancel_requested() {
                if task_obs.gate.finalize() {
                    task_obs.down.on_final();
                }
                return;
            }
            let decorated: SharedObserver<T> = task_obs.clone();
            upstream.attach(decorated);
        });
        if let Err(e) = self.scheduler.schedule(task, self.delay, self.serial) {
            if obs.gate.terminate() {
                obs.down.on_error(e);
            }
            if obs.gate.finalize() {
                obs.down.on_final();
            }
        }
    }
}

/// Decorator sitting on a deferred-subscription boundary. When the upstream
/// finally subscribes, its `on_subscribe` re-fires downstream and any
/// control request issued in the meantime is replayed upward.
struct ReconnectObserver<T> {
    down: SharedObserver<T>,
    node: Arc<ControlNode>,
    gate: Gate,
}

impl<T: Send + 'static> Observer<T> for ReconnectObserver<T> {
    fn on_subscribe(&self, control: Arc<ControlNode>) {
        self.node.attach_parent(control);
        self.down.on_subscribe(self.node.clone());
    }

    fn on_next(&self, item: T) {
        if self.gate.is_live() {
            self.down.on_next(item);
        }
    }

    fn on_error(&self, err: FlowError) {
        if self.gate.terminate() {
            self.down.on_error(err);
        }
    }

    fn on_complete(&self) {
        if self.gate.terminate() {
            self.down.on_complete();
        }
    }

    fn on_final(&self) {
        if self.gate.finalize() {
            self.down.on_final();
        }
    }
}

pub(crate) fn subscribe_on<T: Send + 'static>(
    upstream: Flow<T>,
    scheduler: Arc<dyn Scheduler>,
    delay: Duration,
    serial: bool,
) -> Flow<T> {
    Flow::from_stage(Arc::new(SubscribeOnStage {
        upstream,
        scheduler,
        delay,
        serial,
    }))
}

// ================================
// observe_on
// ================================

struct ObserveOnStage<T> {
    upstream: Flow<T>,
    scheduler: Arc<dyn Scheduler>,
    delay: Duration,
    serial: bool,
}

impl<T: Send + 'static> Stage<T> for ObserveOnStage<T> {
    fn subscribe_raw(&self, downstream: SharedObserver<T>) {
        let queue = self
            .serial
            .then(|| format!("observe-{}", Uuid::new_v4()));
        self.upstream.attach(Arc::new(ObserveOnObserver {
            down: downstream,
            node: ControlNode::new(),
            gate: Gate::new(),
            scheduler: self.scheduler.clone(),
            delay: self.delay,
            queue,
        }));
    }
}

struct ObserveOnObserver<T> {
    down: SharedObserver<T>,
    node: Arc<ControlNode>,
    gate: Gate,
    scheduler: Arc<dyn Scheduler>,
    delay: Duration,
    queue: Option<String>,
}

impl<T: Send + 'static> ObserveOnObserver<T> {
    fn enqueue(&self, task: Task) -> FlowResult<()> {
        match &self.queue {
            Some(name) => self.scheduler.schedule_named(task, self.delay, name),
            None => self.scheduler.schedule(task, self.delay, false),
        }
        .map(|_| ())
    }

    /// Rejected submission: fail the stage inline on the producing thread.
    fn fail(&self, err: FlowError) {
        if self.gate.terminate() {
            self.down.on_error(err);
        }
        if self.gate.finalize() {
            self.down.on_final();
            self.retire();
        }
    }

    fn retire(&self) {
        if let Some(name) = &self.queue {
            self.scheduler.retire_queue(name);
        }
    }
}

impl<T: Send + 'static> Observer<T> for ObserveOnObserver<T> {
    fn on_subscribe(&self, control: Arc<ControlNode>) {
        // The control link is attached synchronously; only the downstream
        // notification crosses the scheduler.
        self.node.attach_parent(control);
        let down = self.down.clone();
        let node = self.node.clone();
        if let Err(e) = self.enqueue(Task::new(move || down.on_subscribe(node))) {
            self.fail(e);
        }
    }

    fn on_next(&self, item: T) {
        if !self.gate.is_live() {
            return;
        }
        let down = self.down.clone();
        if let Err(e) = self.enqueue(Task::new(move || down.on_next(item))) {
            self.fail(e);
        }
    }

    fn on_error(&self, err: FlowError) {
        if self.gate.terminate() {
            let down = self.down.clone();
            let forwarded = err.clone();
            if self.enqueue(Task::new(move || down.on_error(forwarded))).is_err() {
                self.down.on_error(err);
            }
        }
    }

    fn on_complete(&self) {
        if self.gate.terminate() {
            let down = self.down.clone();
            if self.enqueue(Task::new(move || down.on_complete())).is_err() {
                self.down.on_complete();
            }
        }
    }

    fn on_final(&self) {
        if self.gate.finalize() {
            let down = self.down.clone();
            if self.enqueue(Task::new(move || down.on_final())).is_err() {
                self.down.on_final();
            }
            self.retire();
        }
    }
}

pub(crate) fn observe_on<T: Send + 'static>(
    upstream: Flow<T>,
    scheduler: Arc<dyn Scheduler>,
    delay: Duration,
    serial: bool,
) -> Flow<T> {
    Flow::from_stage(Arc::new(ObserveOnStage {
        upstream,
        scheduler,
        delay,
        serial,
    }))
}

// ================================
// publish_on
// ================================

type SideEffectFn<T> = dyn Fn(&T) -> FlowResult<()> + Send + Sync;

struct PublishOnStage<T> {
    upstream: Flow<T>,
    scheduler: Arc<dyn Scheduler>,
    effect: Arc<SideEffectFn<T>>,
    delay: Duration,
    serial: bool,
}

impl<T: Send + 'static> Stage<T> for PublishOnStage<T> {
    fn subscribe_raw(&self, downstream: SharedObserver<T>) {
        let queue = self
            .serial
            .then(|| format!("publish-{}", Uuid::new_v4()));
        self.upstream.attach(Arc::new(PublishOnObserver {
            down: downstream,
            node: ControlNode::new(),
            gate: Arc::new(Gate::new()),
            scheduler: self.scheduler.clone(),
            effect: self.effect.clone(),
            delay: self.delay,
            queue,
        }));
    }
}

struct PublishOnObserver<T> {
    down: SharedObserver<T>,
    node: Arc<ControlNode>,
    // Shared with scheduled closures: a failing side effect claims the
    // terminal slot from the scheduler thread.
    gate: Arc<Gate>,
    scheduler: Arc<dyn Scheduler>,
    effect: Arc<SideEffectFn<T>>,
    delay: Duration,
    queue: Option<String>,
}

impl<T: Send + 'static> PublishOnObserver<T> {
    fn enqueue(&self, task: Task) -> FlowResult<()> {
        match &self.queue {
            Some(name) => self.scheduler.schedule_named(task, self.delay, name),
            None => self.scheduler.schedule(task, self.delay, false),
        }
        .map(|_| ())
    }

    fn fail(&self, err: FlowError) {
        if self.gate.terminate() {
            self.down.on_error(err);
        }
        if self.gate.finalize() {
            self.down.on_final();
            self.retire();
        }
    }

    fn retire(&self) {
        if let Some(name) = &self.queue {
            self.scheduler.retire_queue(name);
        }
    }
}

impl<T: Send + 'static> Observer<T> for PublishOnObserver<T> {
    fn on_subscribe(&self, control: Arc<ControlNode>) {
        self.node.attach_parent(control);
        self.down.on_subscribe(self.node.clone());
    }

    fn on_next(&self, item: T) {
        if !self.gate.is_live() {
            return;
        }
        let down = self.down.clone();
        let effect = self.effect.clone();
        let gate = self.gate.clone();
        let task = Task::new(move || {
            match guard(|| effect(&item)).and_then(|r| r) {
                Ok(()) => {
                    if gate.is_live() {
                        down.on_next(item);
                    }
                }
                Err(e) => {
                    // Item dropped; the failure takes its place.
                    if gate.terminate() {
                        down.on_error(e);
                    }
                }
            }
        });
        if let Err(e) = self.enqueue(task) {
            self.fail(e);
        }
    }

    // In serial mode the terminal events ride the same queue so they cannot
    // overtake items still waiting in it, and the gate is claimed on the
    // queue thread, where the order against a failing side effect is total.

    fn on_error(&self, err: FlowError) {
        match &self.queue {
            Some(_) => {
                let down = self.down.clone();
                let gate = self.gate.clone();
                let forwarded = err.clone();
                let queued = self.enqueue(Task::new(move || {
                    if gate.terminate() {
                        down.on_error(forwarded);
                    }
                }));
                if queued.is_err() && self.gate.terminate() {
                    self.down.on_error(err);
                }
            }
            None => {
                if self.gate.terminate() {
                    self.down.on_error(err);
                }
            }
        }
    }

    fn on_complete(&self) {
        match &self.queue {
            Some(_) => {
                let down = self.down.clone();
                let gate = self.gate.clone();
                let queued = self.enqueue(Task::new(move || {
                    if gate.terminate() {
                        down.on_complete();
                    }
                }));
                if queued.is_err() && self.gate.terminate() {
                    self.down.on_complete();
                }
            }
            None => {
                if self.gate.terminate() {
                    self.down.on_complete();
                }
            }
        }
    }

    fn on_final(&self) {
        match &self.queue {
            Some(_) => {
                let down = self.down.clone();
                let gate = self.gate.clone();
                let queued = self.enqueue(Task::new(move || {
                    if gate.finalize() {
                        down.on_final();
                    }
                }));
                if queued.is_err() && self.gate.finalize() {
                    self.down.on_final();
                }
                self.retire();
            }
            None => {
                if self.gate.finalize() {
                    self.down.on_final();
                }
            }
        }
    }
}

pub(crate) fn publish_on<T, F>(
    upstream: Flow<T>,
    scheduler: Arc<dyn Scheduler>,
    effect: F,
    delay: Duration,
    serial: bool,
) -> Flow<T>
where
    T: Send + 'static,
    F: Fn(&T) -> FlowResult<()> + Send + Sync + 'static,
{
    Flow::from_stage(Arc::new(PublishOnStage {
        upstream,
        scheduler,
        effect: Arc::new(effect),
        delay,
        serial,
    }))
}
