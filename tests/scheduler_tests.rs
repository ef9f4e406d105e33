//! Scheduler contract tests: serial FIFO ordering, single-flight guarantees,
//! genuine parallelism, best-effort cancellation, and the named defaults.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use flowline::{by_label, PinnedScheduler, PoolConfig, PoolScheduler, Scheduler, Task};
use serial_test::serial;

fn test_pool(label: &str) -> PoolScheduler {
    PoolScheduler::with_config(
        label,
        PoolConfig {
            workers: Some(4),
            thread_name: format!("{}-worker", label),
        },
    )
}

#[test]
fn serial_queue_runs_in_submission_order_without_overlap() {
    let pool = Arc::new(test_pool("fifo"));
    let order = Arc::new(Mutex::new(Vec::new()));
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let turn = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = mpsc::channel();

    let mut submitters = Vec::new();
    for i in 0..3usize {
        let pool = pool.clone();
        let order = order.clone();
        let active = active.clone();
        let max_active = max_active.clone();
        let turn = turn.clone();
        let done_tx = done_tx.clone();
        submitters.push(thread::spawn(move || {
            // Take turns so the cross-thread submission order is fixed.
            while turn.load(Ordering::SeqCst) != i {
                thread::yield_now();
            }
            let task = Task::new(move || {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                order.lock().unwrap().push(i);
                active.fetch_sub(1, Ordering::SeqCst);
                done_tx.send(i).unwrap();
            });
            pool.schedule(task, Duration::ZERO, true).unwrap();
            turn.store(i + 1, Ordering::SeqCst);
        }));
    }
    for s in submitters {
        s.join().unwrap();
    }
    for _ in 0..3 {
        done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(max_active.load(Ordering::SeqCst), 1, "serial tasks overlapped");
}

#[test]
fn distinct_named_queues_do_not_share_ordering() {
    let pool = test_pool("named");
    let (tx_a, rx_a) = mpsc::channel();
    let (tx_b, rx_b) = mpsc::channel();

    // A long task on queue "a" must not hold up queue "b".
    pool.schedule_named(
        Task::new(move || {
            thread::sleep(Duration::from_millis(200));
            tx_a.send(()).unwrap();
        }),
        Duration::ZERO,
        "a",
    )
    .unwrap();
    pool.schedule_named(
        Task::new(move || {
            tx_b.send(()).unwrap();
        }),
        Duration::ZERO,
        "b",
    )
    .unwrap();

    rx_b.recv_timeout(Duration::from_millis(150))
        .expect("queue b was blocked behind queue a");
    rx_a.recv_timeout(Duration::from_secs(5)).unwrap();
}

#[test]
fn parallel_tasks_genuinely_overlap() {
    let pool = test_pool("overlap");
    let (a_started_tx, a_started_rx) = mpsc::channel();
    let (b_started_tx, b_started_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();

    let done_a = done_tx.clone();
    pool.schedule_now(Task::new(move || {
        a_started_tx.send(()).unwrap();
        // Each task waits for the other's start: impossible if serialized.
        b_started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        done_a.send("a").unwrap();
    }))
    .unwrap();
    pool.schedule_now(Task::new(move || {
        b_started_tx.send(()).unwrap();
        a_started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        done_tx.send("b").unwrap();
    }))
    .unwrap();

    done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
}

#[test]
fn cancelling_a_pending_task_prevents_it_from_running() {
    let pool = test_pool("cancel-pending");
    let ran = Arc::new(AtomicBool::new(false));
    let ran_task = ran.clone();

    let handle = pool
        .schedule(
            Task::new(move || ran_task.store(true, Ordering::SeqCst)),
            Duration::from_millis(400),
            false,
        )
        .unwrap();

    assert!(pool.cancel(&handle, false));
    assert!(handle.is_cancelled());
    assert_eq!(pool.pending_count(), 0);

    thread::sleep(Duration::from_millis(600));
    assert!(!ran.load(Ordering::SeqCst), "cancelled task still ran");
}

#[test]
fn cancelling_a_running_task_fails() {
    let pool = test_pool("cancel-running");
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let handle = pool
        .schedule_now(Task::new(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }))
        .unwrap();

    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    // Already running: no interruption support on either context.
    assert!(!pool.cancel(&handle, true));
    assert!(handle.has_started());
    release_tx.send(()).unwrap();
}

#[test]
fn pending_index_drains_as_tasks_run() {
    let pool = test_pool("pending");
    let (done_tx, done_rx) = mpsc::channel();

    pool.schedule_now(Task::new(move || done_tx.send(()).unwrap()))
        .unwrap();
    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // The entry leaves the index when the task starts.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while pool.pending_count() != 0 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(pool.pending_count(), 0);
}

#[test]
fn shutdown_rejects_new_tasks() {
    let pool = test_pool("shutdown");
    pool.shutdown();
    let result = pool.schedule_now(Task::new(|| {}));
    assert!(result.is_err());
}

#[test]
fn pinned_scheduler_keeps_thread_affinity_and_fifo_order() {
    let pinned = PinnedScheduler::new("pin-test");
    let log = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = mpsc::channel();

    for i in 0..5usize {
        let log = log.clone();
        let done_tx = done_tx.clone();
        pinned
            .schedule_now(Task::new(move || {
                let name = thread::current().name().map(|n| n.to_string());
                log.lock().unwrap().push((i, name));
                done_tx.send(()).unwrap();
            }))
            .unwrap();
    }
    for _ in 0..5 {
        done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    }

    let log = log.lock().unwrap();
    assert_eq!(log.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    for (_, name) in log.iter() {
        assert_eq!(name.as_deref(), Some("pin-test"));
    }
}

#[test]
fn pinned_delayed_task_does_not_block_later_immediate_task() {
    let pinned = PinnedScheduler::new("pin-delay");
    let (tx_slow, rx_slow) = mpsc::channel();
    let (tx_fast, rx_fast) = mpsc::channel();

    pinned
        .schedule(
            Task::new(move || tx_slow.send(()).unwrap()),
            Duration::from_millis(300),
            true,
        )
        .unwrap();
    pinned
        .schedule_now(Task::new(move || tx_fast.send(()).unwrap()))
        .unwrap();

    rx_fast
        .recv_timeout(Duration::from_millis(200))
        .expect("immediate task waited behind a delayed one");
    rx_slow.recv_timeout(Duration::from_secs(5)).unwrap();
}

#[test]
#[serial]
fn default_schedulers_are_reachable_by_label() {
    let background = by_label("background").expect("background scheduler registered");
    let main = by_label("main").expect("main scheduler registered");
    assert_eq!(background.label(), "background");
    assert_eq!(main.label(), "main");
    assert!(by_label("nonexistent").is_none());
}

#[test]
#[serial]
fn default_background_scheduler_executes_work() {
    let (done_tx, done_rx) = mpsc::channel();
    flowline::background()
        .schedule_now(Task::new(move || done_tx.send(42).unwrap()))
        .unwrap();
    assert_eq!(done_rx.recv_timeout(Duration::from_secs(10)).unwrap(), 42);
}
