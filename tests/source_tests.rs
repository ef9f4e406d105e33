mod common;

use std::sync::Arc;

use common::{Probe, ProbeEvent};
use flowline::{
    emit, empty, eval, eval_cancellable, from_emitter, from_iter, ControlNode, Flow, FlowError,
    SharedObserver, Source,
};
use quickcheck::quickcheck;

#[test]
fn from_iter_delivers_in_order_then_complete_then_final() {
    let probe = Probe::new();
    from_iter(vec![1, 2, 3, 4, 5]).subscribe_with(probe.clone());

    assert_eq!(
        probe.events(),
        vec![
            ProbeEvent::Subscribe,
            ProbeEvent::Next(1),
            ProbeEvent::Next(2),
            ProbeEvent::Next(3),
            ProbeEvent::Next(4),
            ProbeEvent::Next(5),
            ProbeEvent::Complete,
            ProbeEvent::Final,
        ]
    );
}

quickcheck! {
    fn prop_from_iter_preserves_any_sequence(xs: Vec<i32>) -> bool {
        let probe = Probe::new();
        from_iter(xs.clone()).subscribe_with(probe.clone());
        probe.nexts() == xs && probe.complete_count() == 1 && probe.final_count() == 1
    }
}

#[test]
fn emit_delivers_single_value() {
    let probe = Probe::new();
    emit(42).subscribe_with(probe.clone());

    assert_eq!(
        probe.events(),
        vec![
            ProbeEvent::Subscribe,
            ProbeEvent::Next(42),
            ProbeEvent::Complete,
            ProbeEvent::Final,
        ]
    );
}

#[test]
fn empty_completes_without_items() {
    let probe = Probe::<i32>::new();
    empty::<i32>().subscribe_with(probe.clone());

    assert_eq!(
        probe.events(),
        vec![ProbeEvent::Subscribe, ProbeEvent::Complete, ProbeEvent::Final]
    );
}

#[test]
fn eval_emits_computation_result() {
    let probe = Probe::new();
    eval(|| Ok(6 * 7)).subscribe_with(probe.clone());

    assert_eq!(
        probe.events(),
        vec![
            ProbeEvent::Subscribe,
            ProbeEvent::Next(42),
            ProbeEvent::Complete,
            ProbeEvent::Final,
        ]
    );
}

#[test]
fn eval_routes_failure_to_error() {
    let probe = Probe::<i32>::new();
    eval::<i32, _>(|| Err(FlowError::Producer("backend unavailable".into())))
        .subscribe_with(probe.clone());

    assert_eq!(
        probe.events(),
        vec![
            ProbeEvent::Subscribe,
            ProbeEvent::Error(FlowError::Producer("backend unavailable".into())),
            ProbeEvent::Final,
        ]
    );
}

#[test]
fn eval_captures_panic_as_error() {
    let probe = Probe::<i32>::new();
    eval::<i32, _>(|| panic!("kaboom")).subscribe_with(probe.clone());

    assert_eq!(probe.next_count(), 0);
    assert_eq!(probe.complete_count(), 0);
    assert!(matches!(probe.first_error(), Some(FlowError::Panic(_))));
    assert_eq!(probe.final_count(), 1);
}

#[test]
fn eval_cancellable_suppresses_output_after_cooperative_cancel() {
    let probe = Probe::<i32>::new();
    eval_cancellable(|control: &ControlNode| {
        // Simulates a computation that notices the cancel mid-way and bails.
        control.cancel(false);
        Ok(13)
    })
    .subscribe_with(probe.clone());

    assert_eq!(
        probe.events(),
        vec![ProbeEvent::Subscribe, ProbeEvent::Final]
    );
}

#[test]
fn from_emitter_gives_manual_control() {
    let probe = Probe::new();
    from_emitter(|obs: SharedObserver<i32>, _control: Arc<ControlNode>| {
        obs.on_next(1);
        obs.on_next(2);
        obs.on_complete();
        obs.on_final();
    })
    .subscribe_with(probe.clone());

    assert_eq!(
        probe.events(),
        vec![
            ProbeEvent::Subscribe,
            ProbeEvent::Next(1),
            ProbeEvent::Next(2),
            ProbeEvent::Complete,
            ProbeEvent::Final,
        ]
    );
}

struct Countdown {
    from: i32,
}

impl Source<i32> for Countdown {
    fn produce(&self, downstream: SharedObserver<i32>, control: Arc<ControlNode>) {
        let mut n = self.from;
        while n > 0 {
            if control.cancel_requested() {
                downstream.on_final();
                return;
            }
            downstream.on_next(n);
            n -= 1;
        }
        downstream.on_complete();
        downstream.on_final();
    }
}

#[test]
fn custom_source_plugs_into_a_flow() {
    let probe = Probe::new();
    Flow::from_source(Countdown { from: 3 })
        .map(|x| x * 10)
        .subscribe_with(probe.clone());

    assert_eq!(probe.nexts(), vec![30, 20, 10]);
    assert_eq!(probe.complete_count(), 1);
    assert_eq!(probe.final_count(), 1);
}

#[test]
fn resubscribing_runs_an_independent_execution() {
    let flow = from_iter(vec![1, 2, 3]);

    let first = Probe::new();
    let second = Probe::new();
    flow.subscribe_with(first.clone());
    flow.subscribe_with(second.clone());

    assert_eq!(first.nexts(), vec![1, 2, 3]);
    assert_eq!(second.nexts(), vec![1, 2, 3]);
    assert_eq!(first.final_count(), 1);
    assert_eq!(second.final_count(), 1);
}
