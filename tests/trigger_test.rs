use std::time::{Duration, Instant};

use teller::error::TriggerError;
use teller::trigger::{DelayPolicy, FiringId, TimerTask, Trigger, TriggerState};
use tokio::sync::mpsc;

async fn collect(mut ready: mpsc::Receiver<FiringId>) -> Vec<String> {
    let mut fired = Vec::new();
    while let Some(id) = ready.recv().await {
        fired.push(id.to_string());
    }
    fired
}

#[tokio::test]
async fn test_repeat_two_times_three_fires_six() {
    // Purpose: one timeslice repeated twice with one 1ms event fired 3 times
    // Validates:
    // - exactly 6 signals before the channel closes
    // - at least 6ms pass between start and the last signal
    let mut trigger = Trigger::new("scenario", false);
    let slice = trigger.new_timeslice("only", 2, false);
    trigger.add_static_trigger(slice, "event", 1, 3).unwrap();

    let started = Instant::now();
    let ready = trigger.start().unwrap();
    let fired = collect(ready).await;

    assert_eq!(fired.len(), 6);
    assert!(started.elapsed() >= Duration::from_millis(6));
    trigger.stop().await;
    assert_eq!(trigger.state(), TriggerState::Stopped);
}

#[tokio::test]
async fn test_static_timer_total_time() {
    // Purpose: a static timer sleeps before every firing
    // Validates:
    // - E signals for repeat E
    // - elapsed time close to E x D
    let mut trigger = Trigger::new("static", false);
    let slice = trigger.new_timeslice("only", 1, false);
    trigger.add_static_trigger(slice, "tick", 20, 5).unwrap();

    let started = Instant::now();
    let fired = collect(trigger.start().unwrap()).await;
    let elapsed = started.elapsed();

    assert_eq!(fired, vec!["tick"; 5]);
    assert!(elapsed >= Duration::from_millis(100), "took {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1000), "took {elapsed:?}");
}

#[test]
fn test_dynamic_delays_stay_in_range() {
    // Purpose: dynamic delays are drawn from [min, min + vary)
    // Validates:
    // - every delay lies in range on every invocation
    // - the sequence length equals the repeat count
    // - the same seed reproduces the same delays
    let policy = DelayPolicy::Dynamic {
        min_millis: 10,
        vary_millis: 15,
    };
    let mut timer = TimerTask::new("jitter", policy, 50, fastrand::Rng::with_seed(99));
    for _ in 0..20 {
        let delays = timer.delays();
        assert_eq!(delays.len(), 50);
        for delay in delays {
            assert!(delay >= Duration::from_millis(10));
            assert!(delay < Duration::from_millis(25));
        }
    }

    let mut first = TimerTask::new("a", policy, 10, fastrand::Rng::with_seed(5));
    let mut second = TimerTask::new("b", policy, 10, fastrand::Rng::with_seed(5));
    assert_eq!(first.delays(), second.delays());
}

#[tokio::test]
async fn test_dynamic_timer_fires_repeat_times() {
    let mut trigger = Trigger::with_seed("dynamic", false, 3);
    let slice = trigger.new_timeslice("only", 1, false);
    trigger.add_dynamic_trigger(slice, "jitter", 1, 4, 7).unwrap();
    assert_eq!(collect(trigger.start().unwrap()).await.len(), 7);
}

#[tokio::test]
async fn test_firing_order_is_total() {
    // Purpose: timers run one after another in configured order
    // Validates:
    // - each timer drains fully before the next starts
    // - timeslices run in order, each repeat pass replays its timers
    let mut trigger = Trigger::new("ordered", false);
    let first = trigger.new_timeslice("first", 2, false);
    trigger.add_static_trigger(first, "a", 3, 2).unwrap();
    // A faster timer later in the slice must still wait its turn.
    trigger.add_static_trigger(first, "b", 1, 1).unwrap();
    let second = trigger.new_timeslice("second", 1, false);
    trigger.add_static_trigger(second, "c", 1, 1).unwrap();

    let fired = collect(trigger.start().unwrap()).await;
    assert_eq!(fired, vec!["a", "a", "b", "a", "a", "b", "c"]);
}

#[tokio::test]
async fn test_single_run_total_firings() {
    // Purpose: a non continuous trigger fires sum(repeat x event repeat) times
    let mut trigger = Trigger::new("single", false);
    let one = trigger.new_timeslice("one", 3, false);
    trigger.add_static_trigger(one, "x", 1, 2).unwrap();
    trigger.add_static_trigger(one, "y", 1, 1).unwrap();
    let two = trigger.new_timeslice("two", 2, true);
    trigger.add_static_trigger(two, "z", 1, 4).unwrap();
    let skipped = trigger.new_timeslice("skipped", 0, false);
    trigger.add_static_trigger(skipped, "never", 1, 1).unwrap();

    let fired = collect(trigger.start().unwrap()).await;
    assert_eq!(fired.len(), 3 * (2 + 1) + 2 * 4);
    assert!(!fired.iter().any(|id| id == "never"));
}

#[tokio::test]
async fn test_single_use_fires_once_in_continuous_mode() {
    // Purpose: single use timeslices run a single pass even when continuous
    // Validates:
    // - the single use events appear exactly repeat x event repeat times
    // - the other timeslice keeps firing
    let mut trigger = Trigger::new("continuous", true);
    let once = trigger.new_timeslice("once", 1, true);
    trigger.add_static_trigger(once, "intro", 1, 2).unwrap();
    let loop_slice = trigger.new_timeslice("loop", 1, false);
    trigger.add_static_trigger(loop_slice, "beat", 1, 1).unwrap();

    let mut ready = trigger.start().unwrap();
    let mut fired = Vec::new();
    while fired.len() < 30 {
        match tokio::time::timeout(Duration::from_secs(5), ready.recv()).await {
            Ok(Some(id)) => fired.push(id.to_string()),
            other => panic!("trigger ended early: {other:?}"),
        }
    }
    trigger.stop().await;

    assert_eq!(fired.iter().filter(|id| *id == "intro").count(), 2);
    assert_eq!(fired.iter().filter(|id| *id == "beat").count(), 28);
}

#[tokio::test]
async fn test_continuous_trigger_ends_when_only_single_use_work() {
    // Purpose: a continuous trigger whose work is all single use stops by itself
    let mut trigger = Trigger::new("exhausted", true);
    let once = trigger.new_timeslice("once", 2, true);
    trigger.add_static_trigger(once, "only", 1, 1).unwrap();

    let fired = tokio::time::timeout(Duration::from_secs(5), collect(trigger.start().unwrap()))
        .await
        .expect("trigger should stop on its own");
    assert_eq!(fired.len(), 2);
}

#[tokio::test]
async fn test_stop_closes_ready_channel() {
    // Purpose: stopping a continuous trigger closes its output promptly
    // Validates:
    // - stop abandons an in flight sleep
    // - the ready channel reports closed afterwards
    // - stop can be called again
    let mut trigger = Trigger::new("long", true);
    let slice = trigger.new_timeslice("slow", 1, false);
    trigger.add_static_trigger(slice, "slow", 60_000, 1).unwrap();
    let mut ready = trigger.start().unwrap();
    assert_eq!(trigger.state(), TriggerState::Running);

    let started = Instant::now();
    trigger.stop().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(ready.recv().await.is_none());

    trigger.stop().await;
    assert_eq!(trigger.state(), TriggerState::Stopped);
}

#[tokio::test]
async fn test_start_errors() {
    // Purpose: configuration errors surface from start and add
    let mut empty = Trigger::new("empty", false);
    assert_eq!(empty.start().unwrap_err(), TriggerError::NoTimers("empty".to_string()));

    let mut hollow = Trigger::new("hollow", true);
    hollow.new_timeslice("first", 1, false);
    hollow.new_timeslice("second", 3, true);
    assert_eq!(hollow.start().unwrap_err(), TriggerError::NoTimers("hollow".to_string()));

    let mut trigger = Trigger::new("twice", false);
    let slice = trigger.new_timeslice("only", 1, false);
    assert!(matches!(
        trigger.add_static_trigger(slice + 1, "missing", 1, 1),
        Err(TriggerError::UnknownTimeslice { index: 1, .. })
    ));
    trigger.add_static_trigger(slice, "event", 1, 1).unwrap();
    let _ready = trigger.start().unwrap();
    assert_eq!(
        trigger.start().unwrap_err(),
        TriggerError::AlreadyStarted("twice".to_string())
    );
    assert!(trigger.add_static_trigger(slice, "late", 1, 1).is_err());

    trigger.stop().await;
    assert_eq!(trigger.start().unwrap_err(), TriggerError::Stopped("twice".to_string()));
}
