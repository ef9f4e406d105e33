//! Observation taps
//!
//! A tap wraps exactly one callback, runs the caller's side effect, then
//! always forwards the original event unchanged. A panicking side effect is
//! caught and logged; taps never alter the primary event flow. Taps are also
//! transparent to the control tree: they forward the upstream control node
//! as-is instead of inserting one of their own.

use std::sync::Arc;

use crate::control::ControlNode;
use crate::error::{guard, FlowError};
use crate::observer::{Observer, SharedObserver};

use super::{Flow, Stage};

type SubscribeTap = dyn Fn(&Arc<ControlNode>) + Send + Sync;
type NextTap<T> = dyn Fn(&T) + Send + Sync;
type ErrorTap = dyn Fn(&FlowError) + Send + Sync;
type UnitTap = dyn Fn() + Send + Sync;

struct Taps<T> {
    subscribe: Option<Arc<SubscribeTap>>,
    next: Option<Arc<NextTap<T>>>,
    error: Option<Arc<ErrorTap>>,
    complete: Option<Arc<UnitTap>>,
    finish: Option<Arc<UnitTap>>,
}

impl<T> Clone for Taps<T> {
    fn clone(&self) -> Self {
        Taps {
            subscribe: self.subscribe.clone(),
            next: self.next.clone(),
            error: self.error.clone(),
            complete: self.complete.clone(),
            finish: self.finish.clone(),
        }
    }
}

impl<T> Taps<T> {
    fn empty() -> Self {
        Taps {
            subscribe: None,
            next: None,
            error: None,
            complete: None,
            finish: None,
        }
    }
}

struct TapStage<T> {
    upstream: Flow<T>,
    taps: Taps<T>,
}

impl<T: Send + 'static> Stage<T> for TapStage<T> {
    fn subscribe_raw(&self, downstream: SharedObserver<T>) {
        self.upstream.attach(Arc::new(TapObserver {
            down: downstream,
            taps: self.taps.clone(),
        }));
    }
}

fn swallow(which: &str, f: impl FnOnce()) {
    if let Err(e) = guard(f) {
        log::warn!("{} tap panicked, swallowed: {}", which, e);
    }
}

struct TapObserver<T> {
    down: SharedObserver<T>,
    taps: Taps<T>,
}

impl<T: Send + 'static> Observer<T> for TapObserver<T> {
    fn on_subscribe(&self, control: Arc<ControlNode>) {
        if let Some(f) = &self.taps.subscribe {
            swallow("subscribe", || f(&control));
        }
        self.down.on_subscribe(control);
    }

    fn on_next(&self, item: T) {
        if let Some(f) = &self.taps.next {
            swallow("next", || f(&item));
        }
        self.down.on_next(item);
    }

    fn on_error(&self, err: FlowError) {
        if let Some(f) = &self.taps.error {
            swallow("error", || f(&err));
        }
        self.down.on_error(err);
    }

    fn on_complete(&self) {
        if let Some(f) = &self.taps.complete {
            swallow("complete", || f());
        }
        self.down.on_complete();
    }

    fn on_final(&self) {
        if let Some(f) = &self.taps.finish {
            swallow("final", || f());
        }
        self.down.on_final();
    }
}

fn tap_stage<T: Send + 'static>(upstream: Flow<T>, taps: Taps<T>) -> Flow<T> {
    Flow::from_stage(Arc::new(TapStage { upstream, taps }))
}

pub(crate) fn tap_subscribe<T, F>(upstream: Flow<T>, f: F) -> Flow<T>
where
    T: Send + 'static,
    F: Fn(&Arc<ControlNode>) + Send + Sync + 'static,
{
    let mut taps = Taps::empty();
    taps.subscribe = Some(Arc::new(f));
    tap_stage(upstream, taps)
}

pub(crate) fn tap_next<T, F>(upstream: Flow<T>, f: F) -> Flow<T>
where
    T: Send + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    let mut taps = Taps::empty();
    taps.next = Some(Arc::new(f));
    tap_stage(upstream, taps)
}

pub(crate) fn tap_error<T, F>(upstream: Flow<T>, f: F) -> Flow<T>
where
    T: Send + 'static,
    F: Fn(&FlowError) + Send + Sync + 'static,
{
    let mut taps = Taps::empty();
    taps.error = Some(Arc::new(f));
    tap_stage(upstream, taps)
}

pub(crate) fn tap_complete<T, F>(upstream: Flow<T>, f: F) -> Flow<T>
where
    T: Send + 'static,
    F: Fn() + Send + Sync + 'static,
{
    let mut taps = Taps::empty();
    taps.complete = Some(Arc::new(f));
    tap_stage(upstream, taps)
}

pub(crate) fn tap_final<T, F>(upstream: Flow<T>, f: F) -> Flow<T>
where
    T: Send + 'static,
    F: Fn() + Send + Sync + 'static,
{
    let mut taps = Taps::empty();
    taps.finish = Some(Arc::new(f));
    tap_stage(upstream, taps)
}
