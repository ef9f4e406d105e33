//! The observer callback contract
//!
//! Every stage in a pipeline implements and decorates [`Observer`]. The event
//! grammar for a single subscription is strict:
//!
//! 1. `on_subscribe`: zero or more times, before the first item; it re-fires
//!    each time a scheduling boundary reconnects the chain;
//! 2. `on_next`: zero or more times;
//! 3. exactly one of `on_error` / `on_complete`;
//! 4. `on_final`: exactly once, unconditionally, on every path including
//!    cancellation. It is the only callback with an exactly-once guarantee and
//!    the correct place to release resources.
//!
//! Methods take `&self` so one observer can be shared across scheduler
//! threads; implementations use interior mutability where they need state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::control::ControlNode;
use crate::error::FlowError;

/// The consumer side of a pipeline stage.
///
/// All callbacks default to no-ops so a leaf only has to implement what it
/// cares about.
pub trait Observer<T>: Send + Sync {
    /// A control handle for the subscription became available (or was
    /// re-delivered after a scheduling boundary reconnected).
    fn on_subscribe(&self, _control: Arc<ControlNode>) {}

    /// One item was produced.
    fn on_next(&self, _item: T) {}

    /// The subscription terminated with a failure. No further items follow.
    fn on_error(&self, _err: FlowError) {}

    /// The subscription terminated normally. No further items follow.
    fn on_complete(&self) {}

    /// Terminal cleanup hook; fires exactly once per subscription.
    fn on_final(&self) {}
}

/// Shared, thread-safe handle to an observer.
pub type SharedObserver<T> = Arc<dyn Observer<T>>;

/// Per-decorator enforcement of the event grammar.
///
/// A decorator consults its gate before forwarding: items pass only while no
/// terminal event went through, the first of `on_error`/`on_complete` wins,
/// and `on_final` passes exactly once. A stage that attempts a second final
/// has it refused here; tests pin the exactly-once guarantee with a counting
/// observer.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    terminated: AtomicBool,
    finalized: AtomicBool,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether items may still be forwarded.
    pub(crate) fn is_live(&self) -> bool {
        !self.terminated.load(Ordering::Acquire)
    }

    /// Claim the single terminal slot. Returns true for the first caller.
    pub(crate) fn terminate(&self) -> bool {
        !self.terminated.swap(true, Ordering::AcqRel)
    }

    /// Claim the single final slot. Returns true for the first caller.
    pub(crate) fn finalize(&self) -> bool {
        !self.finalized.swap(true, Ordering::AcqRel)
    }
}

type SubscribeFn = Box<dyn Fn(Arc<ControlNode>) + Send + Sync>;
type ErrorFn = Box<dyn Fn(FlowError) + Send + Sync>;
type UnitFn = Box<dyn Fn() + Send + Sync>;

/// An observer assembled from optional closures.
///
/// ```
/// use flowline::{from_iter, FnObserver};
/// use std::sync::Arc;
///
/// let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// let observer = FnObserver::new()
///     .next(move |x: i32| sink.lock().unwrap().push(x))
///     .complete(|| log::debug!("done"));
/// from_iter(vec![1, 2, 3]).subscribe_with(Arc::new(observer));
/// assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
/// ```
#[derive(Default)]
pub struct FnObserver<T> {
    subscribe: Option<SubscribeFn>,
    next: Option<Box<dyn Fn(T) + Send + Sync>>,
    error: Option<ErrorFn>,
    complete: Option<UnitFn>,
    finish: Option<UnitFn>,
}

impl<T> FnObserver<T> {
    pub fn new() -> Self {
        FnObserver {
            subscribe: None,
            next: None,
            error: None,
            complete: None,
            finish: None,
        }
    }

    pub fn subscribed(mut self, f: impl Fn(Arc<ControlNode>) + Send + Sync + 'static) -> Self {
        self.subscribe = Some(Box::new(f));
        self
    }

    pub fn next(mut self, f: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.next = Some(Box::new(f));
        self
    }

    pub fn error(mut self, f: impl Fn(FlowError) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }

    pub fn finally(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.finish = Some(Box::new(f));
        self
    }
}

impl<T> Observer<T> for FnObserver<T> {
    fn on_subscribe(&self, control: Arc<ControlNode>) {
        if let Some(f) = &self.subscribe {
            f(control);
        }
    }

    fn on_next(&self, item: T) {
        if let Some(f) = &self.next {
            f(item);
        }
    }

    fn on_error(&self, err: FlowError) {
        if let Some(f) = &self.error {
            f(err);
        }
    }

    fn on_complete(&self) {
        if let Some(f) = &self.complete {
            f();
        }
    }

    fn on_final(&self) {
        if let Some(f) = &self.finish {
            f();
        }
    }
}

/// Leaf for fire-and-forget subscriptions; drops items and logs failures.
pub(crate) struct DiscardObserver;

impl<T> Observer<T> for DiscardObserver {
    fn on_next(&self, _item: T) {
        log::trace!("discarding item on fire-and-forget subscription");
    }

    fn on_error(&self, err: FlowError) {
        log::debug!("fire-and-forget subscription failed: {}", err);
    }
}
