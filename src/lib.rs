//! flowline: a push-based asynchronous pipeline engine
//!
//! Compose chains of deferred computations that emit zero or more values to
//! an [`Observer`], with pluggable execution contexts ([`Scheduler`]),
//! cooperative cancellation through a parent-linked control tree
//! ([`ControlNode`]), and a guaranteed terminal cleanup callback.
//!
//! Building a [`Flow`] performs no work; subscribing walks the chain from the
//! tail to the source, which then pushes events forward through the decorator
//! chain. There is no backpressure (the producer always pushes) and no
//! implicit thread hopping: stages pick their execution context explicitly
//! with `subscribe_on`, `observe_on`, or `publish_on`.
//!
//! ```
//! use flowline::{from_iter, FnObserver};
//! use std::sync::{Arc, Mutex};
//!
//! let doubled = Arc::new(Mutex::new(Vec::new()));
//! let sink = doubled.clone();
//! from_iter(vec![1, 2, 3])
//!     .map(|x| x * 2)
//!     .subscribe_with(Arc::new(FnObserver::new().next(move |x: i32| {
//!         sink.lock().unwrap().push(x);
//!     })));
//! assert_eq!(*doubled.lock().unwrap(), vec![2, 4, 6]);
//! ```

pub mod control;
pub mod error;
pub mod flow;
pub mod observer;
pub mod scheduler;

pub use control::ControlNode;
pub use error::{FlowError, FlowResult};
pub use flow::{emit, empty, eval, eval_cancellable, from_emitter, from_iter, Flow, Source};
pub use observer::{FnObserver, Observer, SharedObserver};
pub use scheduler::{
    background, by_label, main_affinity, PinnedScheduler, PoolConfig, PoolScheduler, Scheduler,
    Task, TaskHandle,
};
