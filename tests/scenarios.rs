//! End-to-end runs of small models.
//!
//! Each test wires a topology, runs it to the end, and checks what the
//! actors saw and how the run ended.

use dde_kernel::{
    Actor, FiringContext, Input, KernelConfig, KernelError, KernelResult, Model, Payload,
    RunOutcome, Time,
};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

// ============================================================================
// Test Actors
// ============================================================================

/// Sends a fixed list of `(port, token)` at one time, then stops.
struct Burst {
    time: f64,
    sends: Vec<(usize, u32)>,
}

impl Actor<u32> for Burst {
    fn fire(&mut self, ctx: &mut FiringContext<'_, u32>, _input: Option<Input<u32>>) -> KernelResult<()> {
        ctx.advance_to(self.time)?;
        for &(port, token) in &self.sends {
            ctx.send(port, token)?;
        }
        Ok(())
    }

    fn postfire(&mut self, _ctx: &FiringContext<'_, u32>) -> bool {
        false
    }
}

/// Emits 0, 1, 2, ... at t=0, 1, 2, ... forever.
struct Ramp {
    next: u32,
}

impl Actor<u32> for Ramp {
    fn fire(&mut self, ctx: &mut FiringContext<'_, u32>, _input: Option<Input<u32>>) -> KernelResult<()> {
        ctx.advance_to(f64::from(self.next))?;
        ctx.send(0, self.next)?;
        self.next += 1;
        Ok(())
    }
}

/// Records every input it is fired with.
#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<Input<u32>>>>,
}

impl Recorder {
    fn tokens(&self) -> Vec<u32> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|i| match i.event.payload {
                Payload::Real(t) => Some(t),
                Payload::Advance => None,
            })
            .collect()
    }

    fn times(&self) -> Vec<Time> {
        self.seen.lock().unwrap().iter().map(Input::time).collect()
    }
}

impl Actor<u32> for Recorder {
    fn fire(&mut self, _ctx: &mut FiringContext<'_, u32>, input: Option<Input<u32>>) -> KernelResult<()> {
        if let Some(input) = input {
            self.seen.lock().unwrap().push(input);
        }
        Ok(())
    }
}

/// Forwards real tokens to port 0.
struct Forward;

impl Actor<u32> for Forward {
    fn fire(&mut self, ctx: &mut FiringContext<'_, u32>, input: Option<Input<u32>>) -> KernelResult<()> {
        if let Some(token) = input.and_then(Input::into_token) {
            ctx.send(0, token)?;
        }
        Ok(())
    }
}

/// Consumes everything, sends nothing.
struct Swallow;

impl Actor<u32> for Swallow {
    fn fire(&mut self, _ctx: &mut FiringContext<'_, u32>, _input: Option<Input<u32>>) -> KernelResult<()> {
        Ok(())
    }
}

/// Fails on the first token it sees.
struct Faulty;

impl Actor<u32> for Faulty {
    fn fire(&mut self, ctx: &mut FiringContext<'_, u32>, input: Option<Input<u32>>) -> KernelResult<()> {
        match input {
            Some(_) => Err(KernelError::actor_failed(ctx.actor(), "bad token")),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Deadlock Handling
// ============================================================================

#[test_log::test]
fn artificial_deadlock_grows_the_blocked_queue() {
    let mut model = Model::new(KernelConfig::default());
    let recorder = Recorder::default();
    let writer = model
        .add_actor(
            "writer",
            Burst {
                time: 1.0,
                sends: vec![(0, 1), (0, 2), (0, 3), (1, 10)],
            },
        )
        .unwrap();
    let reader = model.add_actor("reader", recorder.clone()).unwrap();
    let low = model.connect(writer, reader).unwrap();
    let high = model.connect(writer, reader).unwrap();

    let report = model.run().unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.stats.capacity_escalations, 2);
    assert_eq!(report.channels[low.id().index()].capacity, 4);
    assert_eq!(report.channels[high.id().index()].capacity, 1);
    // Equal times: the later connection has priority.
    assert_eq!(recorder.tokens(), vec![10, 1, 2, 3]);
}

#[test_log::test]
fn mutual_wait_is_a_real_deadlock() {
    let mut model = Model::new(KernelConfig::default());
    let a = model.add_actor("a", Forward).unwrap();
    let b = model.add_actor("b", Forward).unwrap();
    model.connect(a, b).unwrap();
    model.connect(b, a).unwrap();

    let report = model.run().unwrap();

    assert_eq!(report.outcome, RunOutcome::RealDeadlock);
    assert_eq!(report.stats.stalls, 1);
    assert_eq!(report.stats.capacity_escalations, 0);
    assert!(report.channels.iter().all(|c| c.terminated));
}

#[test_log::test]
fn capacity_limit_aborts_the_run() {
    let config = KernelConfig {
        max_capacity: 4,
        ..KernelConfig::default()
    };
    let mut model = Model::new(config);
    let mut sends: Vec<(usize, u32)> = (0..10).map(|i| (0, i)).collect();
    sends.push((1, 99));
    let writer = model.add_actor("writer", Burst { time: 1.0, sends }).unwrap();
    let reader = model.add_actor("reader", Recorder::default()).unwrap();
    model.connect(writer, reader).unwrap();
    model.connect(writer, reader).unwrap();

    let err = model.run().unwrap_err();

    match err {
        KernelError::CapacityExceeded {
            channel,
            requested,
            maximum,
        } => {
            assert_eq!(channel, "writer->reader#0");
            assert_eq!(requested, 8);
            assert_eq!(maximum, 4);
        }
        other => panic!("expected CapacityExceeded, got {other:?}"),
    }
}

// ============================================================================
// Time
// ============================================================================

#[test_log::test]
fn tokens_past_completion_end_the_run() {
    let mut model = Model::new(KernelConfig::default());
    let recorder = Recorder::default();
    let ramp = model.add_actor("ramp", Ramp { next: 0 }).unwrap();
    let sink = model.add_actor("sink", recorder.clone()).unwrap();
    model.connect(ramp, sink).unwrap();
    model.set_completion_time(5.5).unwrap();

    let report = model.run().unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(recorder.tokens(), vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(report.channels[0].last_time, Time::Inactive);
}

#[test_log::test]
fn source_into_tap_stops_at_completion() {
    let mut model = Model::new(KernelConfig::default());
    let ramp = model.add_actor("ramp", Ramp { next: 0 }).unwrap();
    let tap = model.tap(ramp).unwrap();
    model.set_completion_time(5.0).unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || done_tx.send(model.run()));
    let report = done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("run did not end after the completion time")
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    let tokens: Vec<u32> = tap.drain_tokens().unwrap().into_iter().map(|(t, _)| t).collect();
    assert_eq!(tokens, vec![0, 1, 2, 3, 4, 5]);
}

#[test_log::test]
fn ignore_placeholder_is_dropped_after_real_token() {
    let mut model = Model::new(KernelConfig::default());
    let recorder = Recorder::default();
    let sink = model.add_actor("sink", recorder.clone()).unwrap();
    let placeholder = model.feed(sink).unwrap();
    let data = model.feed(sink).unwrap();
    let placeholder_id = placeholder.channel().id();

    placeholder.send_ignore(99).unwrap();
    data.send(3, Time::At(3.0)).unwrap();
    placeholder.close().unwrap();
    data.close().unwrap();

    let report = model.run().unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(recorder.tokens(), vec![3]);
    let info = &report.channels[placeholder_id.index()];
    assert_eq!(info.len, 1);
    assert_eq!(info.receiver_time, Time::Inactive);
}

#[test_log::test]
fn silent_actor_still_advances_downstream_time() {
    let config = KernelConfig {
        hide_null_tokens: false,
        ..KernelConfig::default()
    };
    let mut model = Model::new(config);
    let recorder = Recorder::default();
    let sink = model.add_actor("sink", recorder.clone()).unwrap();
    let filter = model.add_actor("filter", Swallow).unwrap();
    let feed = model.feed(filter).unwrap();
    model.connect(filter, sink).unwrap();

    for t in 1..=3 {
        feed.send(t, Time::At(f64::from(t))).unwrap();
    }
    feed.close().unwrap();

    let report = model.run().unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(recorder.tokens().is_empty());
    assert_eq!(
        recorder.times(),
        vec![Time::At(1.0), Time::At(2.0), Time::At(3.0)]
    );
}

#[test_log::test]
fn put_earlier_than_last_is_rejected() {
    let mut model: Model<u32> = Model::new(KernelConfig::default());
    let a = model.add_actor("a", Swallow).unwrap();
    let feed = model.feed(a).unwrap();
    feed.send(1, Time::At(5.0)).unwrap();
    let err = feed.send(2, Time::At(4.0)).unwrap_err();
    assert!(matches!(err, KernelError::TimeRegression { .. }));
}

// ============================================================================
// Environment, Stop, Failure
// ============================================================================

#[test_log::test]
fn open_feed_keeps_the_run_alive() {
    let mut model = Model::new(KernelConfig::default());
    let recorder = Recorder::default();
    let sink = model.add_actor("sink", recorder.clone()).unwrap();
    let feed = model.feed(sink).unwrap();

    let run = thread::spawn(move || model.run());
    thread::sleep(Duration::from_millis(100));
    feed.send(1, Time::At(1.0)).unwrap();
    feed.send(2, Time::At(2.0)).unwrap();
    feed.close().unwrap();

    let report = run.join().unwrap().unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(recorder.tokens(), vec![1, 2]);
}

#[test_log::test]
fn stop_unwinds_blocked_tasks() {
    let mut model = Model::new(KernelConfig::default());
    let sink = model.add_actor("sink", Recorder::default()).unwrap();
    let feed = model.feed(sink).unwrap();
    let coordinator = Arc::clone(model.coordinator());

    let run = thread::spawn(move || model.run());
    thread::sleep(Duration::from_millis(100));
    coordinator.request_stop().unwrap();

    let report = run.join().unwrap().unwrap();
    assert_eq!(report.outcome, RunOutcome::Stopped);
    drop(feed);
}

#[test_log::test]
fn actor_error_fails_the_run() {
    let mut model = Model::new(KernelConfig::default());
    let source = model
        .add_actor(
            "source",
            Burst {
                time: 0.0,
                sends: vec![(0, 1)],
            },
        )
        .unwrap();
    let sink = model.add_actor("sink", Faulty).unwrap();
    model.connect(source, sink).unwrap();

    let err = model.run().unwrap_err();
    assert_eq!(
        err,
        KernelError::ActorFailed {
            actor: "sink".into(),
            reason: "bad token".into(),
        }
    );
}

#[test_log::test]
fn topology_is_frozen_during_a_run() {
    let mut model = Model::new(KernelConfig::default());
    let sink = model.add_actor("sink", Recorder::default()).unwrap();
    let feed = model.feed(sink).unwrap();
    let coordinator = Arc::clone(model.coordinator());

    let run = thread::spawn(move || model.run());
    thread::sleep(Duration::from_millis(100));
    assert_eq!(coordinator.register_actor("late"), Err(KernelError::TopologyFrozen));

    feed.close().unwrap();
    let report = run.join().unwrap().unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
}
