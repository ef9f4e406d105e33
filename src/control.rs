//! Cancel/pause/resume control tree
//!
//! Every pipeline stage owns one [`ControlNode`]. Nodes are linked child to
//! parent, with the source stage's node at the root. Requests travel leaf to
//! root; confirmations travel back root to leaf: a node's `*_confirmed` flag
//! becomes true only after its parent confirmed, and the root (having no
//! parent) is authoritative and always confirms its own requests.
//!
//! All flags are atomics so a consumer thread may request cancellation while a
//! producer thread polls the flag between items; correctness needs eventual
//! visibility only, not a fence per item.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Control handle for one subscription at one pipeline stage.
///
/// Cancellation is cooperative and best-effort: setting the flag prevents
/// future emissions from a producer loop that checks it between items, and
/// prevents a not-yet-started deferred subscription from starting at all. A
/// unit of work already running on an execution context cannot be interrupted.
///
/// Pause and resume are advisory latches. Iterating sources park between items
/// while paused; single-shot computation and emitter sources have no point to
/// park at and run to completion regardless (see the crate docs).
#[derive(Debug, Default)]
pub struct ControlNode {
    parent: Mutex<Option<Arc<ControlNode>>>,
    cancel_requested: AtomicBool,
    cancel_confirmed: AtomicBool,
    pause_requested: AtomicBool,
    pause_confirmed: AtomicBool,
    resume_requested: AtomicBool,
    resume_confirmed: AtomicBool,
}

impl ControlNode {
    /// Create a node with no parent. Source stages use this as the root of a
    /// new subscription; operator stages attach a parent once the upstream
    /// side of the chain reports in through `on_subscribe`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a node already linked under `parent`.
    pub fn child_of(parent: Arc<ControlNode>) -> Arc<Self> {
        let node = Self::new();
        *node.parent.lock().unwrap() = Some(parent);
        node
    }

    fn parent_ref(&self) -> Option<Arc<ControlNode>> {
        self.parent.lock().unwrap().clone()
    }

    /// Link this node under `parent` after creation.
    ///
    /// A scheduling boundary hands its node downstream before the upstream
    /// subscription exists; when the upstream finally reconnects, the parent
    /// is attached here and any operation already requested on this node is
    /// replayed upward so the source still observes it.
    pub fn attach_parent(&self, parent: Arc<ControlNode>) {
        let cancel = self.cancel_requested.load(Ordering::Acquire);
        let pause = self.pause_requested.load(Ordering::Acquire);
        let resume = self.resume_requested.load(Ordering::Acquire);
        *self.parent.lock().unwrap() = Some(parent.clone());
        if cancel && parent.cancel(false) {
            self.cancel_confirmed.store(true, Ordering::Release);
        }
        if pause && parent.pause() {
            self.pause_confirmed.store(true, Ordering::Release);
        }
        if resume && parent.resume() {
            self.resume_confirmed.store(true, Ordering::Release);
        }
    }

    /// Request cancellation of the subscription this node belongs to.
    ///
    /// Sets this node's request flag, forwards the request to the parent if
    /// one exists, and takes the parent's answer; a node with no parent
    /// succeeds outright. Returns whether the request was confirmed.
    ///
    /// `may_interrupt` is forwarded to the root for symmetry with the
    /// scheduler contract; neither built-in execution context supports
    /// interrupting a running task, so it never rescues work already started.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        self.cancel_requested.store(true, Ordering::Release);
        let confirmed = match self.parent_ref() {
            Some(parent) => parent.cancel(may_interrupt),
            None => true,
        };
        if confirmed {
            self.cancel_confirmed.store(true, Ordering::Release);
        }
        confirmed
    }

    /// Request that the producer pause between items. Clears any pending
    /// resume request; the two are mutually exclusive latches.
    pub fn pause(&self) -> bool {
        self.resume_requested.store(false, Ordering::Release);
        self.resume_confirmed.store(false, Ordering::Release);
        self.pause_requested.store(true, Ordering::Release);
        let confirmed = match self.parent_ref() {
            Some(parent) => parent.pause(),
            None => true,
        };
        if confirmed {
            self.pause_confirmed.store(true, Ordering::Release);
        }
        confirmed
    }

    /// Lift a pause. Clears the pause latch on the way up.
    pub fn resume(&self) -> bool {
        self.pause_requested.store(false, Ordering::Release);
        self.pause_confirmed.store(false, Ordering::Release);
        self.resume_requested.store(true, Ordering::Release);
        let confirmed = match self.parent_ref() {
            Some(parent) => parent.resume(),
            None => true,
        };
        if confirmed {
            self.resume_confirmed.store(true, Ordering::Release);
        }
        confirmed
    }

    /// Whether cancellation has been requested at this node.
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Whether cancellation was confirmed all the way to the root.
    pub fn cancel_confirmed(&self) -> bool {
        self.cancel_confirmed.load(Ordering::Acquire)
    }

    /// Whether the subscription is currently paused at this node.
    pub fn is_paused(&self) -> bool {
        self.pause_requested.load(Ordering::Acquire)
    }

    /// Whether a pause was confirmed all the way to the root.
    pub fn pause_confirmed(&self) -> bool {
        self.pause_confirmed.load(Ordering::Acquire)
    }

    /// Whether a resume was confirmed all the way to the root.
    pub fn resume_confirmed(&self) -> bool {
        self.resume_confirmed.load(Ordering::Acquire)
    }

    /// Whether this node has a parent link.
    pub fn has_parent(&self) -> bool {
        self.parent.lock().unwrap().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_confirms_its_own_cancel() {
        let root = ControlNode::new();
        assert!(root.cancel(false));
        assert!(root.cancel_requested());
        assert!(root.cancel_confirmed());
    }

    #[test]
    fn request_propagates_to_root_and_confirmation_returns() {
        let root = ControlNode::new();
        let mid = ControlNode::child_of(root.clone());
        let leaf = ControlNode::child_of(mid.clone());

        assert!(leaf.cancel(false));
        assert!(root.cancel_requested());
        assert!(mid.cancel_requested());
        assert!(leaf.cancel_confirmed());
        assert!(mid.cancel_confirmed());
        assert!(root.cancel_confirmed());
    }

    #[test]
    fn resume_clears_pause_latch() {
        let root = ControlNode::new();
        assert!(root.pause());
        assert!(root.is_paused());
        assert!(root.resume());
        assert!(!root.is_paused());
        assert!(root.resume_confirmed());
    }

    #[test]
    fn late_parent_attach_replays_cancel() {
        let leaf = ControlNode::new();
        assert!(leaf.cancel(false));

        let root = ControlNode::new();
        leaf.attach_parent(root.clone());
        assert!(root.cancel_requested());
        assert!(root.cancel_confirmed());
    }
}
