//! Unit tests for the job queue

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use async_runtime::{Future, RuntimeError};
use core_types::Value;
use job_queue::{JobId, JobState, Queue, QueueCounts};

use super::{log, timed_runner, virtual_loop, Gauge};

fn id(s: &str) -> JobId {
    JobId::from(s)
}

#[test]
fn runner_receives_job_data() {
    let (el, _) = virtual_loop();
    let seen = log::<Value>();
    let sink = seen.clone();
    let queue = Queue::new(
        &el,
        move |data| {
            sink.borrow_mut().push(data.clone());
            Ok(data)
        },
        2,
    );

    queue.add("one", Value::Smi(1), None);
    queue.add("two", Value::from("two"), None);
    el.block_on(&queue.drained()).unwrap();

    assert_eq!(*seen.borrow(), vec![Value::Smi(1), Value::from("two")]);
    assert_eq!(queue.state_of(&id("one")), Some(JobState::Done));
}

#[test]
fn nothing_runs_until_the_loop_is_driven() {
    let (el, _) = virtual_loop();
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let queue = Queue::new(
        &el,
        move |_| {
            counter.set(counter.get() + 1);
            Ok(Value::Undefined)
        },
        1,
    );

    queue.add("a", Value::Null, None);
    assert_eq!(calls.get(), 0);
    assert_eq!(queue.counts().pending, 1);

    el.run_until_done().unwrap();
    assert_eq!(calls.get(), 1);
}

#[test]
fn dependent_starts_after_dependency_is_done() {
    let (el, _) = virtual_loop();
    let order = log::<String>();
    let runner_el = el.clone();
    let events = order.clone();
    let queue = Queue::new(
        &el,
        move |data| {
            let name = data.to_string();
            events.borrow_mut().push(format!("start {}", name));
            let events = events.clone();
            let finished = Future::resolve_after(&runner_el, Duration::from_millis(10), data)
                .tap(move |value| {
                    events.borrow_mut().push(format!("end {}", value));
                    Ok(Value::Undefined)
                });
            Ok(finished.into())
        },
        4,
    );

    queue.add("b", Value::from("b"), Some(vec![id("a")]));
    queue.add("a", Value::from("a"), None);
    el.block_on(&queue.drained()).unwrap();

    assert_eq!(*order.borrow(), vec!["start a", "end a", "start b", "end b"]);
}

#[test]
fn many_independent_jobs_run_in_insertion_order() {
    let (el, _) = virtual_loop();
    let seen = log::<Value>();
    let sink = seen.clone();
    let queue = Queue::new(
        &el,
        move |data| {
            sink.borrow_mut().push(data.clone());
            Ok(data)
        },
        4,
    );

    let total = 20_000;
    for n in 0..total {
        queue.add(format!("job-{}", n), Value::Smi(n), None);
    }
    el.block_on(&queue.drained()).unwrap();

    let expected: Vec<Value> = (0..total).map(Value::Smi).collect();
    assert_eq!(*seen.borrow(), expected);
    assert_eq!(queue.counts().done, total as usize);
}

#[test]
fn idle_settles_when_only_blocked_jobs_remain() {
    let (el, _) = virtual_loop();
    let queue = Queue::new(&el, timed_runner(&el, 10, Rc::new(Gauge::default())), 2);

    queue.add("a", Value::Null, None);
    queue.add("c", Value::Null, Some(vec![id("missing")]));
    let idle = queue.idle();
    assert!(!idle.is_settled());

    el.block_on(&idle).unwrap();
    assert_eq!(
        queue.counts(),
        QueueCounts {
            pending: 1,
            running: 0,
            done: 1,
            errored: 0,
        }
    );
    assert_eq!(queue.state_of(&id("c")), Some(JobState::Pending));
    assert!(matches!(
        el.block_on(&queue.drained()),
        Err(RuntimeError::Stalled)
    ));
}

#[test]
fn running_jobs_never_exceed_concurrency() {
    let (el, _) = virtual_loop();
    let gauge = Rc::new(Gauge::default());
    let queue = Queue::new(&el, timed_runner(&el, 10, gauge.clone()), 2);

    for n in 0..6 {
        queue.add(format!("job-{}", n), Value::Smi(n), None);
    }
    el.block_on(&queue.drained()).unwrap();

    assert_eq!(gauge.peak(), 2);
    assert_eq!(queue.counts().done, 6);
    assert_eq!(el.now(), Duration::from_millis(30));
}

#[test]
fn raising_concurrency_reopens_admission() {
    let (el, _) = virtual_loop();
    let gauge = Rc::new(Gauge::default());
    let queue = Queue::new(&el, timed_runner(&el, 10, gauge.clone()), 1);

    for n in 0..3 {
        queue.add(format!("job-{}", n), Value::Smi(n), None);
    }
    let handle = queue.clone();
    el.set_timeout(Duration::from_millis(5), move || handle.set_concurrency(3));
    el.block_on(&queue.drained()).unwrap();

    assert_eq!(gauge.peak(), 3);
    assert_eq!(queue.concurrency(), 3);
    assert_eq!(el.now(), Duration::from_millis(15));
}

#[test]
fn zero_concurrency_is_clamped_to_one() {
    let (el, _) = virtual_loop();
    let gauge = Rc::new(Gauge::default());
    let queue = Queue::new(&el, timed_runner(&el, 10, gauge.clone()), 4);
    queue.set_concurrency(0);

    queue.add("a", Value::Null, None);
    queue.add("b", Value::Null, None);
    el.block_on(&queue.drained()).unwrap();

    assert_eq!(queue.concurrency(), 1);
    assert_eq!(gauge.peak(), 1);
}

#[test]
fn add_is_idempotent_across_states() {
    let (el, _) = virtual_loop();
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let queue = Queue::new(
        &el,
        move |_| {
            counter.set(counter.get() + 1);
            Ok(Value::Undefined)
        },
        1,
    );

    assert!(queue.add("a", Value::Smi(1), None));
    assert!(!queue.add("a", Value::Smi(2), None));
    el.block_on(&queue.drained()).unwrap();
    assert!(!queue.add("a", Value::Smi(3), None));

    el.run_until_done().unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(queue.job(&id("a")).map(|job| job.data), Some(Value::Smi(1)));
    assert!(queue.drained().is_settled());
}

#[test]
fn failed_job_is_recorded_and_blocks_dependents() {
    let (el, sink) = virtual_loop();
    let queue = Queue::new(
        &el,
        |data| {
            if data == Value::from("bad") {
                Err(Value::from("boom"))
            } else {
                Ok(data)
            }
        },
        2,
    );

    queue.add("bad", Value::from("bad"), None);
    queue.add("after", Value::from("after"), Some(vec![id("bad")]));
    queue.add("other", Value::from("other"), None);

    el.block_on(&queue.idle()).unwrap();
    el.run_until_done().unwrap();

    assert_eq!(queue.state_of(&id("bad")), Some(JobState::Errored));
    assert_eq!(queue.error_of(&id("bad")), Some(Value::from("boom")));
    assert_eq!(queue.state_of(&id("after")), Some(JobState::Pending));
    assert!(queue.is_done(&id("other")));
    assert!(!queue.drained().is_settled());
    assert!(sink.is_empty());
}

#[test]
fn rejected_runner_future_marks_job_errored() {
    let (el, sink) = virtual_loop();
    let runner_el = el.clone();
    let queue = Queue::new(
        &el,
        move |_| {
            let failed =
                Future::reject_after(&runner_el, Duration::from_millis(5), Value::from("late"));
            Ok(failed.into())
        },
        1,
    );

    queue.add("a", Value::Null, None);
    el.block_on(&queue.drained()).unwrap();

    assert_eq!(queue.error_of(&id("a")), Some(Value::from("late")));
    assert_eq!(queue.counts().errored, 1);
    assert!(sink.is_empty());
}

#[test]
fn stop_holds_jobs_until_resume() {
    let (el, _) = virtual_loop();
    let queue = Queue::new(&el, timed_runner(&el, 10, Rc::new(Gauge::default())), 1);

    queue.add("a", Value::Null, None);
    queue.add("b", Value::Null, None);
    queue.stop();
    assert!(!queue.is_running());

    el.run_until_done().unwrap();
    assert_eq!(queue.counts().pending, 2);
    assert!(!queue.drained().is_settled());

    queue.resume();
    el.block_on(&queue.drained()).unwrap();
    assert_eq!(queue.counts().done, 2);
}

#[test]
fn stop_lets_running_job_finish() {
    let (el, _) = virtual_loop();
    let queue = Queue::new(&el, timed_runner(&el, 10, Rc::new(Gauge::default())), 1);

    queue.add("a", Value::Null, None);
    queue.add("b", Value::Null, None);
    let handle = queue.clone();
    el.set_timeout(Duration::from_millis(5), move || handle.stop());
    el.run_until_done().unwrap();

    assert!(queue.is_done(&id("a")));
    assert_eq!(queue.state_of(&id("b")), Some(JobState::Pending));
}

#[test]
fn adding_after_drain_resets_drained() {
    let (el, _) = virtual_loop();
    let queue = Queue::new(&el, Ok, 1);

    queue.add("a", Value::Null, None);
    let first = queue.drained();
    el.block_on(&first).unwrap();

    queue.add("b", Value::Null, None);
    let second = queue.drained();
    assert!(!second.ptr_eq(&first));
    assert!(!second.is_settled());

    el.block_on(&second).unwrap();
    assert!(queue.is_done(&id("b")));
}

#[test]
fn counts_serialize_as_json() {
    let (el, _) = virtual_loop();
    let queue = Queue::new(&el, Ok, 1);
    queue.add("a", Value::Null, None);
    queue.add("b", Value::Null, Some(vec![id("never")]));
    el.run_until_done().unwrap();

    let json = serde_json::to_value(queue.counts()).unwrap();
    assert_eq!(
        json,
        serde_json::json!({ "pending": 1, "running": 0, "done": 1, "errored": 0 })
    );
}

#[test]
fn job_state_serializes_in_snake_case() {
    assert_eq!(
        serde_json::to_string(&JobState::Errored).unwrap(),
        "\"errored\""
    );
    let state: JobState = serde_json::from_str("\"running\"").unwrap();
    assert_eq!(state, JobState::Running);
}
