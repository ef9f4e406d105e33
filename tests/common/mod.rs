//! Shared test support: a recording observer that counts every callback and
//! can wait, with a timeout, for a condition over the event log. The final
//! counter is what makes the exactly-once cleanup guarantee mechanically
//! checkable.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use flowline::{ControlNode, FlowError, Observer};

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeEvent<T> {
    Subscribe,
    Next(T),
    Error(FlowError),
    Complete,
    Final,
}

pub struct Probe<T> {
    events: Mutex<Vec<ProbeEvent<T>>>,
    changed: Condvar,
    control: Mutex<Option<Arc<ControlNode>>>,
    next_seen: AtomicUsize,
    cancel_after: Option<usize>,
}

impl<T> Probe<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Probe {
            events: Mutex::new(Vec::new()),
            changed: Condvar::new(),
            control: Mutex::new(None),
            next_seen: AtomicUsize::new(0),
            cancel_after: None,
        })
    }

    /// A probe that requests cancellation through the control handle as soon
    /// as it has received `k` items.
    pub fn cancelling_after(k: usize) -> Arc<Self> {
        Arc::new(Probe {
            events: Mutex::new(Vec::new()),
            changed: Condvar::new(),
            control: Mutex::new(None),
            next_seen: AtomicUsize::new(0),
            cancel_after: Some(k),
        })
    }

    fn push(&self, event: ProbeEvent<T>) {
        self.events.lock().unwrap().push(event);
        self.changed.notify_all();
    }

    pub fn control(&self) -> Option<Arc<ControlNode>> {
        self.control.lock().unwrap().clone()
    }

    pub fn subscribe_count(&self) -> usize {
        self.count(|e| matches!(e, ProbeEvent::Subscribe))
    }

    pub fn next_count(&self) -> usize {
        self.count(|e| matches!(e, ProbeEvent::Next(_)))
    }

    pub fn error_count(&self) -> usize {
        self.count(|e| matches!(e, ProbeEvent::Error(_)))
    }

    pub fn complete_count(&self) -> usize {
        self.count(|e| matches!(e, ProbeEvent::Complete))
    }

    pub fn final_count(&self) -> usize {
        self.count(|e| matches!(e, ProbeEvent::Final))
    }

    fn count(&self, pred: impl Fn(&ProbeEvent<T>) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(*e)).count()
    }

    pub fn first_error(&self) -> Option<FlowError> {
        self.events.lock().unwrap().iter().find_map(|e| match e {
            ProbeEvent::Error(err) => Some(err.clone()),
            _ => None,
        })
    }

    /// Block until `pred` holds over the event log or the timeout elapses;
    /// returns whether it held.
    pub fn wait_until(
        &self,
        timeout: Duration,
        pred: impl Fn(&[ProbeEvent<T>]) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock().unwrap();
        loop {
            if pred(&events) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return pred(&events);
            }
            let (guard, _) = self.changed.wait_timeout(events, deadline - now).unwrap();
            events = guard;
        }
    }

    /// Block until the final callback arrived (or the timeout elapsed).
    pub fn wait_for_final(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |events| {
            events.iter().any(|e| matches!(e, ProbeEvent::Final))
        })
    }
}

impl<T: Clone> Probe<T> {
    pub fn events(&self) -> Vec<ProbeEvent<T>> {
        self.events.lock().unwrap().clone()
    }

    pub fn nexts(&self) -> Vec<T> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ProbeEvent::Next(item) => Some(item.clone()),
                _ => None,
            })
            .collect()
    }
}

impl<T: Send + 'static> Observer<T> for Probe<T> {
    fn on_subscribe(&self, control: Arc<ControlNode>) {
        *self.control.lock().unwrap() = Some(control);
        self.push(ProbeEvent::Subscribe);
    }

    fn on_next(&self, item: T) {
        let seen = self.next_seen.fetch_add(1, Ordering::SeqCst) + 1;
        self.push(ProbeEvent::Next(item));
        if self.cancel_after == Some(seen) {
            if let Some(control) = self.control() {
                control.cancel(false);
            }
        }
    }

    fn on_error(&self, err: FlowError) {
        self.push(ProbeEvent::Error(err));
    }

    fn on_complete(&self) {
        self.push(ProbeEvent::Complete);
    }

    fn on_final(&self) {
        self.push(ProbeEvent::Final);
    }
}
