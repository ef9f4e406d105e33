//! Pipeline construction and the subscription walk
//!
//! A [`Flow`] is an immutable, cheaply cloneable description of a computation.
//! Building a chain wires objects together and performs no work; calling one
//! of the `subscribe` entry points walks the chain from the tail operator to
//! the head, each operator wrapping the observer in its decorator, until the
//! source stage begins producing. The same `Flow` may be subscribed any number
//! of times; every subscription is an independent execution with its own
//! control nodes.

mod boundary;
mod sources;
mod tap;
mod transform;

use std::sync::Arc;
use std::time::Duration;

use crate::control::ControlNode;
use crate::error::{FlowError, FlowResult};
use crate::observer::{DiscardObserver, Gate, Observer, SharedObserver};
use crate::scheduler::Scheduler;

pub use sources::{emit, empty, eval, eval_cancellable, from_emitter, from_iter, Source};

/// One stage of a pipeline. Operators hold exactly one upstream `Flow`;
/// sources hold none. The distinction is structural, so an operator without
/// an upstream cannot be wired at all.
pub(crate) trait Stage<T>: Send + Sync {
    fn subscribe_raw(&self, downstream: SharedObserver<T>);
}

/// An immutable description of a (possibly chained) deferred computation that
/// emits zero or more values to an [`Observer`] when subscribed.
pub struct Flow<T> {
    stage: Arc<dyn Stage<T>>,
}

impl<T> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Flow {
            stage: Arc::clone(&self.stage),
        }
    }
}

impl<T: Send + 'static> Flow<T> {
    pub(crate) fn from_stage(stage: Arc<dyn Stage<T>>) -> Self {
        Flow { stage }
    }

    /// Wrap a custom [`Source`] into a `Flow`.
    pub fn from_source(source: impl Source<T> + 'static) -> Self {
        sources::source_flow(source)
    }

    pub(crate) fn attach(&self, downstream: SharedObserver<T>) {
        self.stage.subscribe_raw(downstream);
    }

    // ================================
    // Subscription entry points
    // ================================

    /// Fire-and-forget subscription with a default leaf observer.
    pub fn subscribe(&self) {
        self.subscribe_with(Arc::new(DiscardObserver));
    }

    /// Subscribe with a custom observer.
    pub fn subscribe_with(&self, observer: SharedObserver<T>) {
        let leaf = LeafObserver::new(observer);
        self.attach(leaf);
    }

    /// Fire-and-forget subscription that hands back the control handle so the
    /// caller can cancel, pause, or resume from outside the pipeline.
    pub fn subscribe_controllable(&self) -> Arc<ControlNode> {
        self.subscribe_controllable_with(Arc::new(DiscardObserver))
    }

    /// Subscribe with a custom observer, returning the control handle.
    ///
    /// The handle exists before production starts; if a `subscribe_on`
    /// boundary defers the upstream subscription, a cancel issued through the
    /// handle in the meantime is replayed upward once the chain reconnects.
    pub fn subscribe_controllable_with(&self, observer: SharedObserver<T>) -> Arc<ControlNode> {
        let leaf = LeafObserver::new(observer);
        let node = leaf.node.clone();
        self.attach(leaf);
        node
    }

    // ================================
    // Value operators
    // ================================

    /// Transform each item with `f`. A panic in `f` is routed to `on_error`
    /// and ends the stream.
    pub fn map<U, F>(&self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.try_map(move |item| Ok(f(item)))
    }

    /// Transform each item with a fallible `f`; `Err` routes to `on_error`
    /// and ends the stream.
    pub fn try_map<U, F>(&self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> FlowResult<U> + Send + Sync + 'static,
    {
        transform::try_map(self.clone(), f)
    }

    /// For each item, subscribe the flow `f` returns (synchronously, on the
    /// producing thread) and relay its items downstream as `Some(u)`.
    ///
    /// `f` returning `None` forwards a single `None` item instead; it is the
    /// degenerate "nothing to flatten" case, not an error. Inner flows run
    /// sequentially per outer item; this is not a parallel merge.
    pub fn flat_map<U, F>(&self, f: F) -> Flow<Option<U>>
    where
        U: Send + 'static,
        F: Fn(T) -> Option<Flow<U>> + Send + Sync + 'static,
    {
        transform::flat_map(self.clone(), f)
    }

    /// Convert an upstream failure into a single `None` item: items arrive as
    /// `Some(x)`, an `on_error` becomes `on_next(None)` and is swallowed.
    /// Completion is unaffected.
    pub fn recover(&self) -> Flow<Option<T>> {
        transform::recover(self.clone())
    }

    // ================================
    // Scheduling operators
    // ================================

    /// Defer the upstream subscription onto `scheduler`: production does not
    /// begin until the scheduled task runs. If the scheduler rejects the
    /// task, this stage fails like a failing source: `on_error`, then
    /// `on_final`, and the upstream is never reached.
    pub fn subscribe_on(
        &self,
        scheduler: Arc<dyn Scheduler>,
        delay: Duration,
        serial: bool,
    ) -> Flow<T> {
        boundary::subscribe_on(self.clone(), scheduler, delay, serial)
    }

    /// Re-deliver each event crossing this stage on `scheduler`. With
    /// `serial`, all events of one subscription share one FIFO queue and keep
    /// their relative order; without it, events are submitted independently
    /// and no cross-event ordering is guaranteed.
    pub fn observe_on(
        &self,
        scheduler: Arc<dyn Scheduler>,
        delay: Duration,
        serial: bool,
    ) -> Flow<T> {
        boundary::observe_on(self.clone(), scheduler, delay, serial)
    }

    /// Like `observe_on` for items only: `side_effect` runs on the target
    /// scheduler immediately before each item is forwarded. If it fails, the
    /// item is dropped and `on_error` is raised downstream instead.
    pub fn publish_on<F>(
        &self,
        scheduler: Arc<dyn Scheduler>,
        side_effect: F,
        delay: Duration,
        serial: bool,
    ) -> Flow<T>
    where
        F: Fn(&T) -> FlowResult<()> + Send + Sync + 'static,
    {
        boundary::publish_on(self.clone(), scheduler, side_effect, delay, serial)
    }

    /// Defer each item by `duration` on the background pool, preserving item
    /// order. One scheduled callback per item; no per-item timer threads.
    pub fn delay(&self, duration: Duration) -> Flow<T> {
        self.observe_on(crate::scheduler::background(), duration, true)
    }

    // ================================
    // Observation taps
    // ================================

    /// Run a side effect on every `on_subscribe`, then forward it unchanged.
    pub fn tap_subscribe<F>(&self, f: F) -> Flow<T>
    where
        F: Fn(&Arc<ControlNode>) + Send + Sync + 'static,
    {
        tap::tap_subscribe(self.clone(), f)
    }

    /// Run a side effect on every item, then forward the item unchanged.
    /// A panicking side effect is logged and swallowed; taps never alter the
    /// primary event flow.
    pub fn tap_next<F>(&self, f: F) -> Flow<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        tap::tap_next(self.clone(), f)
    }

    /// Run a side effect on `on_error`, then forward the error unchanged.
    pub fn tap_error<F>(&self, f: F) -> Flow<T>
    where
        F: Fn(&FlowError) + Send + Sync + 'static,
    {
        tap::tap_error(self.clone(), f)
    }

    /// Run a side effect on `on_complete`, then forward it unchanged.
    pub fn tap_complete<F>(&self, f: F) -> Flow<T>
    where
        F: Fn() + Send + Sync + 'static,
    {
        tap::tap_complete(self.clone(), f)
    }

    /// Run a side effect on `on_final`, then forward it unchanged.
    pub fn tap_final<F>(&self, f: F) -> Flow<T>
    where
        F: Fn() + Send + Sync + 'static,
    {
        tap::tap_final(self.clone(), f)
    }
}

/// Terminal decorator wrapped around the caller's observer. Owns the control
/// node handed out by the controllable subscribe variants and enforces the
/// event grammar at the boundary to user code.
struct LeafObserver<T> {
    down: SharedObserver<T>,
    node: Arc<ControlNode>,
    gate: Gate,
}

impl<T: Send + 'static> LeafObserver<T> {
    fn new(down: SharedObserver<T>) -> Arc<Self> {
        Arc::new(LeafObserver {
            down,
            node: ControlNode::new(),
            gate: Gate::new(),
        })
    }
}

impl<T: Send + 'static> Observer<T> for LeafObserver<T> {
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
