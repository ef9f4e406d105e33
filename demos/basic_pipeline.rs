//! Build a small pipeline, transform it, and watch every callback fire.
//!
//! Run with: cargo run --example basic_pipeline

use std::sync::Arc;

use flowline::{from_iter, FnObserver};

fn main() {
    let observer = FnObserver::new()
        .subscribed(|_control| println!("subscribed"))
        .next(|x: i32| println!("next: {}", x))
        .error(|e| println!("error: {}", e))
        .complete(|| println!("complete"))
        .finally(|| println!("final: release resources here"));

    from_iter(vec![1, 2, 3])
        .map(|x| x * 2)
        .tap_next(|x| println!("  (tap saw {})", x))
        .subscribe_with(Arc::new(observer));

    // Error-to-sentinel conversion: the failure becomes a single None item.
    let recovered = FnObserver::new()
        .next(|x: Option<i32>| println!("recovered item: {:?}", x))
        .finally(|| println!("recovered final"));

    from_iter(vec![1, 0, 4])
        .map(|x| 10 / x)
        .recover()
        .subscribe_with(Arc::new(recovered));
}
