//! Source stages: the producer end of a pipeline
//!
//! A source has no upstream and is the only place `on_complete`/`on_error`
//! originate; operator stages only forward or translate them. Every source
//! owns the root [`ControlNode`] of its subscription, delivers
//! `on_subscribe(root)` before anything else, and delivers `on_final` exactly
//! once on every path: completion, failure, or cancellation.

use std::sync::Arc;
use std::time::Duration;

use crate::control::ControlNode;
use crate::error::{guard, FlowResult};
use crate::observer::SharedObserver;

use super::{Flow, Stage};

/// A producer stage. Implement this to plug a custom producer into a [`Flow`]
/// via [`Flow::from_source`]; the bundled constructors below cover the common
/// shapes.
pub trait Source<T>: Send + Sync {
    /// Produce the subscription's events into `downstream`. `control` is the
    /// root node; cooperative producers check its cancel flag between items.
    fn produce(&self, downstream: SharedObserver<T>, control: Arc<ControlNode>);
}

struct SourceStage<T> {
    core: Arc<dyn Source<T>>,
}

impl<T: Send + 'static> Stage<T> for SourceStage<T> {
    fn subscribe_raw(&self, downstream: SharedObserver<T>) {
        let root = ControlNode::new();
        downstream.on_subscribe(root.clone());
        self.core.produce(downstream, root);
    }
}

pub(crate) fn source_flow<T: Send + 'static>(source: impl Source<T> + 'static) -> Flow<T> {
    Flow::from_stage(Arc::new(SourceStage {
        core: Arc::new(source),
    }))
}

const PAUSE_POLL: Duration = Duration::from_millis(1);

/// Park while the subscription is paused; false means it was cancelled and
/// the producer must stop.
fn pause_point(control: &ControlNode) -> bool {
    if control.cancel_requested() {
        return false;
    }
    while control.is_paused() {
        if control.cancel_requested() {
            return false;
        }
        std::thread::sleep(PAUSE_POLL);
    }
    !control.cancel_requested()
}

/// Emit the items of an iterator in order, honoring cancel and pause between
/// items. Cancellation stops production without `on_complete`; `on_final`
/// still fires.
fn drive<T, I: Iterator<Item = T>>(iter: I, down: &SharedObserver<T>, control: &ControlNode) {
    for item in iter {
        if !pause_point(control) {
            down.on_final();
            return;
        }
        down.on_next(item);
    }
    if control.cancel_requested() {
        down.on_final();
        return;
    }
    down.on_complete();
    down.on_final();
}

// ================================
// Iterating sources
// ================================

struct EmitSource<T> {
    value: T,
}

impl<T: Clone + Send + Sync + 'static> Source<T> for EmitSource<T> {
    fn produce(&self, downstream: SharedObserver<T>, control: Arc<ControlNode>) {
        drive(std::iter::once(self.value.clone()), &downstream, &control);
    }
}

/// Emit a single value, then complete.
///
/// ```
/// use flowline::{emit, FnObserver};
/// use std::sync::{Arc, Mutex};
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// emit(42).subscribe_with(Arc::new(FnObserver::new().next(move |x: i32| {
///     sink.lock().unwrap().push(x);
/// })));
/// assert_eq!(*seen.lock().unwrap(), vec![42]);
/// ```
pub fn emit<T: Clone + Send + Sync + 'static>(value: T) -> Flow<T> {
    source_flow(EmitSource { value })
}

struct EmptySource;

impl<T: Send + 'static> Source<T> for EmptySource {
    fn produce(&self, downstream: SharedObserver<T>, control: Arc<ControlNode>) {
        drive(std::iter::empty(), &downstream, &control);
    }
}

/// A flow that completes immediately without emitting.
pub fn empty<T: Send + 'static>() -> Flow<T> {
    source_flow(EmptySource)
}

struct IterSource<I> {
    iterable: I,
}

impl<I, T> Source<T> for IterSource<I>
where
    I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    fn produce(&self, downstream: SharedObserver<T>, control: Arc<ControlNode>) {
        drive(self.iterable.clone().into_iter(), &downstream, &control);
    }
}

/// Emit every item of `iterable` in its natural order; the ordering is a
/// guaranteed contract. The iterable is cloned per subscription so the same
/// flow can be subscribed repeatedly.
pub fn from_iter<I>(iterable: I) -> Flow<I::Item>
where
    I: IntoIterator + Clone + Send + Sync + 'static,
    I::Item: Send + 'static,
{
    source_flow(IterSource { iterable })
}

// ================================
// Computation sources
// ================================

type EvalFn<T> = dyn Fn() -> FlowResult<T> + Send + Sync;
type EvalCancellableFn<T> = dyn Fn(&ControlNode) -> FlowResult<T> + Send + Sync;
type EmitterFn<T> = dyn Fn(SharedObserver<T>, Arc<ControlNode>) + Send + Sync;

struct EvalSource<T> {
    f: Arc<EvalFn<T>>,
}

impl<T: Send + 'static> Source<T> for EvalSource<T> {
    fn produce(&self, downstream: SharedObserver<T>, control: Arc<ControlNode>) {
        if control.cancel_requested() {
            downstream.on_final();
            return;
        }
        match guard(|| (self.f)()).and_then(|r| r) {
            Ok(value) => {
                if control.cancel_requested() {
                    downstream.on_final();
                    return;
                }
                downstream.on_next(value);
                downstream.on_complete();
            }
            Err(e) => downstream.on_error(e),
        }
        downstream.on_final();
    }
}

/// Run a blocking computation on whatever thread the subscription walk
/// reached (there is no implicit thread hop) and emit its single result.
/// A failure (or panic) routes to `on_error`. Pause has no effect here: a
/// single blocking unit has no point to park at.
pub fn eval<T, F>(f: F) -> Flow<T>
where
    T: Send + 'static,
    F: Fn() -> FlowResult<T> + Send + Sync + 'static,
{
    source_flow(EvalSource { f: Arc::new(f) })
}

struct EvalCancellableSource<T> {
    f: Arc<EvalCancellableFn<T>>,
}

impl<T: Send + 'static> Source<T> for EvalCancellableSource<T> {
    fn produce(&self, downstream: SharedObserver<T>, control: Arc<ControlNode>) {
        if control.cancel_requested() {
            downstream.on_final();
            return;
        }
        let result = guard(|| (self.f)(&control)).and_then(|r| r);
        // A computation that returned because it saw the cancel flag gets no
        // terminal event, only cleanup.
        if control.cancel_requested() {
            downstream.on_final();
            return;
        }
        match result {
            Ok(value) => {
                downstream.on_next(value);
                downstream.on_complete();
            }
            Err(e) => downstream.on_error(e),
        }
        downstream.on_final();
    }
}

/// Like [`eval`], but the computation receives the root control node so it
/// can check for cancellation mid-computation.
pub fn eval_cancellable<T, F>(f: F) -> Flow<T>
where
    T: Send + 'static,
    F: Fn(&ControlNode) -> FlowResult<T> + Send + Sync + 'static,
{
    source_flow(EvalCancellableSource { f: Arc::new(f) })
}

struct EmitterSource<T> {
    f: Arc<EmitterFn<T>>,
}

impl<T: Send + 'static> Source<T> for EmitterSource<T> {
    fn produce(&self, downstream: SharedObserver<T>, control: Arc<ControlNode>) {
        if let Err(e) = guard(|| (self.f)(downstream.clone(), control)) {
            // Best effort: the emitter may already have sent a terminal
            // event; decorator gates deduplicate.
            downstream.on_error(e);
            downstream.on_final();
        }
    }
}

/// Hand the raw decorated observer (and root control node) to `f` for full
/// manual control over when events fire. This is the hook for wrapping
/// external callback-based APIs; the caller takes over the observer contract,
/// including the obligation to deliver `on_final` exactly once.
pub fn from_emitter<T, F>(f: F) -> Flow<T>
where
    T: Send + 'static,
    F: Fn(SharedObserver<T>, Arc<ControlNode>) + Send + Sync + 'static,
{
    source_flow(EmitterSource { f: Arc::new(f) })
}
