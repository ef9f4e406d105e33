//! Move production onto the background pool and delivery onto the pinned
//! affinity thread, the way a UI application hands results back to its main
//! loop.
//!
//! Run with: cargo run --example scheduler_hopping

use std::sync::Arc;
use std::time::Duration;

use flowline::{background, eval, main_affinity, FnObserver};

fn main() {
    let observer = FnObserver::new()
        .next(|report: String| {
            println!(
                "delivered on {:?}: {}",
                std::thread::current().name(),
                report
            )
        })
        .finally(|| println!("pipeline done"));

    let node = eval(|| {
        // Pretend this is a slow blocking call, e.g. an HTTP fetch.
        std::thread::sleep(Duration::from_millis(200));
        Ok(format!(
            "computed on {:?}",
            std::thread::current().name()
        ))
    })
    .subscribe_on(background(), Duration::ZERO, false)
    .observe_on(main_affinity(), Duration::ZERO, true)
    .subscribe_controllable_with(Arc::new(observer));

    // The handle exists even though production is still running elsewhere.
    println!("cancel available: {}", !node.cancel_requested());

    std::thread::sleep(Duration::from_millis(500));
}
