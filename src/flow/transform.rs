//! Value operators: mapping, flattening, error recovery
//!
//! Each operator wraps the downstream observer in a decorator at subscribe
//! time and asks its single upstream to subscribe with the decorator. A
//! decorator that raises `on_error` itself (failed transform) stops
//! forwarding items and requests upstream cancellation through its control
//! node; the upstream's `on_final` still flows through exactly once.

use std::sync::Arc;

use crate::control::ControlNode;
use crate::error::{guard, FlowError, FlowResult};
use crate::observer::{Gate, Observer, SharedObserver};

use super::{Flow, Stage};

// ================================
// try_map (map is sugar over it)
// ================================

type TryMapFn<T, U> = dyn Fn(T) -> FlowResult<U> + Send + Sync;

struct TryMapStage<T, U> {
    upstream: Flow<T>,
    f: Arc<TryMapFn<T, U>>,
}

impl<T: Send + 'static, U: Send + 'static> Stage<U> for TryMapStage<T, U> {
    fn subscribe_raw(&self, downstream: SharedObserver<U>) {
        self.upstream.attach(Arc::new(TryMapObserver {
            down: downstream,
            f: self.f.clone(),
            node: ControlNode::new(),
            gate: Gate::new(),
        }));
    }
}

struct TryMapObserver<T, U> {
    down: SharedObserver<U>,
    f: Arc<TryMapFn<T, U>>,
    node: Arc<ControlNode>,
    gate: Gate,
}

impl<T: Send + 'static, U: Send + 'static> Observer<T> for TryMapObserver<T, U> {
    fn on_subscribe(&self, control: Arc<ControlNode>) {
        self.node.attach_parent(control);
        self.down.on_subscribe(self.node.clone());
    }

    fn on_next(&self, item: T) {
        if !self.gate.is_live() {
            return;
        }
        match guard(|| (self.f)(item)).and_then(|r| r) {
            Ok(mapped) => self.down.on_next(mapped),
            Err(e) => {
                if self.gate.terminate() {
                    self.down.on_error(e);
                }
                // Upstream has no reason to keep producing into a dead stage.
                self.node.cancel(false);
            }
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

pub(crate) fn try_map<T, U, F>(upstream: Flow<T>, f: F) -> Flow<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> FlowResult<U> + Send + Sync + 'static,
{
    Flow::from_stage(Arc::new(TryMapStage {
        upstream,
        f: Arc::new(f),
    }))
}

// ================================
// flat_map
// ================================

type FlatMapFn<T, U> = dyn Fn(T) -> Option<Flow<U>> + Send + Sync;

struct FlatMapStage<T, U> {
    upstream: Flow<T>,
    f: Arc<FlatMapFn<T, U>>,
}

impl<T: Send + 'static, U: Send + 'static> Stage<Option<U>> for FlatMapStage<T, U> {
    fn subscribe_raw(&self, downstream: SharedObserver<Option<U>>) {
        self.upstream.attach(Arc::new(FlatMapObserver {
            down: downstream,
            f: self.f.clone(),
            node: ControlNode::new(),
            gate: Arc::new(Gate::new()),
        }));
    }
}

struct FlatMapObserver<T, U> {
    down: SharedObserver<Option<U>>,
    f: Arc<FlatMapFn<T, U>>,
    node: Arc<ControlNode>,
    // Shared with inner relays: an inner failure must stop outer forwarding.
    gate: Arc<Gate>,
}

impl<T: Send + 'static, U: Send + 'static> Observer<T> for FlatMapObserver<T, U> {
    fn on_subscribe(&self, control: Arc<ControlNode>) {
        self.node.attach_parent(control);
        self.down.on_subscribe(self.node.clone());
    }

    fn on_next(&self, item: T) {
        if !self.gate.is_live() {
            return;
        }
        match guard(|| (self.f)(item)) {
            Ok(Some(inner)) => {
                // Subscribed synchronously on the producing thread; events of
                // successive inner flows reach downstream in emission order.
                inner.attach(Arc::new(InnerRelay {
                    down: self.down.clone(),
                    gate: self.gate.clone(),
                }));
            }
            Ok(None) => self.down.on_next(None),
            Err(e) => {
                if self.gate.terminate() {
                    self.down.on_error(e);
                }
                self.node.cancel(false);
            }
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

/// Relays one inner subscription to the shared downstream. The outer stage
/// owns termination: inner completion and cleanup are swallowed, inner
/// failure terminates the chain.
struct InnerRelay<U> {
    down: SharedObserver<Option<U>>,
    gate: Arc<Gate>,
}

impl<U: Send + 'static> Observer<U> for InnerRelay<U> {
    fn on_next(&self, item: U) {
        if self.gate.is_live() {
            self.down.on_next(Some(item));
        }
    }

    fn on_error(&self, err: FlowError) {
        if self.gate.terminate() {
            self.down.on_error(err);
        }
    }
}

pub(crate) fn flat_map<T, U, F>(upstream: Flow<T>, f: F) -> Flow<Option<U>>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Option<Flow<U>> + Send + Sync + 'static,
{
    Flow::from_stage(Arc::new(FlatMapStage {
        upstream,
        f: Arc::new(f),
    }))
}

// ================================
// recover
// ================================

struct RecoverStage<T> {
    upstream: Flow<T>,
}

impl<T: Send + 'static> Stage<Option<T>> for RecoverStage<T> {
    fn subscribe_raw(&self, downstream: SharedObserver<Option<T>>) {
        self.upstream.attach(Arc::new(RecoverObserver {
            down: downstream,
            node: ControlNode::new(),
            gate: Gate::new(),
        }));
    }
}

struct RecoverObserver<T> {
    down: SharedObserver<Option<T>>,
    node: Arc<ControlNode>,
    gate: Gate,
}

impl<T: Send + 'static> Observer<T> for RecoverObserver<T> {
    fn on_subscribe(&self, control: Arc<ControlNode>) {
        self.node.attach_parent(control);
        self.down.on_subscribe(self.node.clone());
    }

    fn on_next(&self, item: T) {
        if self.gate.is_live() {
            self.down.on_next(Some(item));
        }
    }

    fn on_error(&self, err: FlowError) {
        // Failure becomes a sentinel item; the error itself stops here.
        if self.gate.terminate() {
            log::debug!("recover converted upstream failure to a sentinel: {}", err);
            self.down.on_next(None);
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

pub(crate) fn recover<T: Send + 'static>(upstream: Flow<T>) -> Flow<Option<T>> {
    Flow::from_stage(Arc::new(RecoverStage { upstream }))
}
