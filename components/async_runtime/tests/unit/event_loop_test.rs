//! Unit tests for EventLoop

use std::time::Duration;

use async_runtime::{
    EventLoop, Future, MicroTask, RuntimeConfig, RuntimeError, Task, VirtualClock,
};
use core_types::Value;

use super::{log, virtual_loop};

#[test]
fn new_event_loop_has_empty_queues() {
    let event_loop = EventLoop::new();
    assert!(event_loop.is_task_queue_empty());
    assert!(event_loop.is_microtask_queue_empty());
}

#[test]
fn enqueue_task_adds_to_task_queue() {
    let event_loop = EventLoop::new();
    event_loop.enqueue_task(Task::new(|| Ok(())));
    assert!(!event_loop.is_task_queue_empty());
}

#[test]
fn enqueue_microtask_adds_to_microtask_queue() {
    let event_loop = EventLoop::new();
    event_loop.enqueue_microtask(MicroTask::new(|| Ok(())));
    assert!(!event_loop.is_microtask_queue_empty());
}

#[test]
fn task_queue_fifo_order() {
    let (event_loop, _) = virtual_loop();
    let results = log();

    for n in 1..=3 {
        let r = results.clone();
        event_loop.enqueue_task(Task::new(move || {
            r.borrow_mut().push(n);
            Ok(())
        }));
    }

    event_loop.run_until_done().unwrap();
    assert_eq!(*results.borrow(), vec![1, 2, 3]);
}

#[test]
fn microtasks_drain_between_tasks() {
    let (event_loop, _) = virtual_loop();
    let results = log();

    let r = results.clone();
    let el = event_loop.clone();
    event_loop.enqueue_task(Task::new(move || {
        r.borrow_mut().push("task1");
        let r2 = r.clone();
        el.defer(move || r2.borrow_mut().push("micro"));
        Ok(())
    }));
    let r = results.clone();
    event_loop.enqueue_task(Task::new(move || {
        r.borrow_mut().push("task2");
        Ok(())
    }));

    event_loop.run_until_done().unwrap();
    assert_eq!(*results.borrow(), vec!["task1", "micro", "task2"]);
}

#[test]
fn timers_with_equal_deadlines_fire_in_scheduling_order() {
    let (event_loop, _) = virtual_loop();
    let results = log();

    for label in ["a", "b", "c"] {
        let r = results.clone();
        event_loop.set_timeout(Duration::from_millis(10), move || r.borrow_mut().push(label));
    }

    event_loop.run_until_done().unwrap();
    assert_eq!(*results.borrow(), vec!["a", "b", "c"]);
    assert_eq!(event_loop.now(), Duration::from_millis(10));
}

#[test]
fn explicit_virtual_clock_through_builder() {
    let event_loop = EventLoop::builder()
        .clock(Box::new(VirtualClock::new()))
        .build();
    let later = Future::resolve_after(&event_loop, Duration::from_secs(3600), Value::Smi(1));

    assert_eq!(event_loop.block_on(&later).unwrap(), Value::Smi(1));
    assert_eq!(event_loop.now(), Duration::from_secs(3600));
}

#[test]
fn block_on_reports_rejection() {
    let (event_loop, sink) = virtual_loop();
    let failed = Future::rejected(&event_loop, Value::from("nope"));

    match event_loop.block_on(&failed) {
        Err(RuntimeError::Rejected(reason)) => assert_eq!(reason, Value::from("nope")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(sink.is_empty());
}

#[test]
fn block_on_stalls_on_never_settled_future() {
    let (event_loop, _) = virtual_loop();
    let never = Future::pending(&event_loop);
    assert!(matches!(
        event_loop.block_on(&never),
        Err(RuntimeError::Stalled)
    ));
}

#[test]
fn with_config_keeps_settings() {
    let config = RuntimeConfig::default().with_warn_unhandled_rejection(false);
    let event_loop = EventLoop::with_config(config.clone());
    assert_eq!(event_loop.config(), &config);
}
