//! Queue Pipeline Integration Tests
//!
//! Tests jobs whose runners are built from the future combinators:
//! Queue -> runner -> combinators -> Future -> Queue bookkeeping

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use async_runtime::{ClockMode, EventLoop, Future, RuntimeConfig};
use core_types::{ErrorKind, Value};
use job_queue::{JobId, JobState, Queue};

fn virtual_loop() -> EventLoop {
    EventLoop::with_config(RuntimeConfig::default().with_clock(ClockMode::Virtual))
}

fn after(el: &EventLoop, ms: u64, value: Value) -> Value {
    Future::resolve_after(el, Duration::from_millis(ms), value).into()
}

/// Test: a job fans out with `all` and its dependent sees the result
#[test]
fn test_pipeline_fan_out_then_reduce() {
    let el = virtual_loop();
    let results = Rc::new(RefCell::new(Vec::new()));

    let runner_el = el.clone();
    let sink = results.clone();
    let queue = Queue::new(
        &el,
        move |data| {
            let parts: Vec<Value> = data
                .as_array()
                .unwrap_or_default()
                .iter()
                .enumerate()
                .map(|(i, v)| after(&runner_el, 5 * (i as u64 + 1), v.clone()))
                .collect();
            let sink = sink.clone();
            let total = Future::reduce(
                &runner_el,
                parts,
                |acc: Value, value: Value, _| {
                    let sum = acc.as_number().unwrap_or(0.0) + value.as_number().unwrap_or(0.0);
                    Ok(Value::Double(sum))
                },
                Value::Smi(0),
            )
            .tap(move |sum| {
                sink.borrow_mut().push(sum);
                Ok(Value::Undefined)
            });
            Ok(total.into())
        },
        2,
    );

    queue.add(
        "small",
        Value::Array(vec![Value::Smi(1), Value::Smi(2)]),
        None,
    );
    queue.add(
        "large",
        Value::Array(vec![Value::Smi(10), Value::Smi(20), Value::Smi(30)]),
        Some(vec![JobId::from("small")]),
    );
    el.block_on(&queue.drained()).expect("queue should drain");

    assert_eq!(
        *results.borrow(),
        vec![Value::Double(3.0), Value::Double(60.0)]
    );
}

/// Test: a job bounded by `time_limit` fails and blocks its dependents
#[test]
fn test_pipeline_timeout_blocks_dependents() {
    let el = virtual_loop();
    let runner_el = el.clone();
    let queue = Queue::new(
        &el,
        move |data| {
            let ms = data.as_number().unwrap_or(0.0) as u64;
            let work = Future::resolve_after(&runner_el, Duration::from_millis(ms), data);
            Ok(Future::time_limit(&runner_el, Duration::from_millis(50), &work).into())
        },
        4,
    );

    queue.add("fast", Value::Smi(10), None);
    queue.add("slow", Value::Smi(100), None);
    queue.add("report", Value::Smi(1), Some(vec![JobId::from("slow")]));
    el.block_on(&queue.idle()).expect("queue should go idle");

    assert!(queue.is_done(&JobId::from("fast")));
    let reason = queue.error_of(&JobId::from("slow")).expect("slow job failed");
    assert_eq!(reason.as_error().map(|e| e.kind), Some(ErrorKind::TimeoutError));
    assert_eq!(queue.state_of(&JobId::from("report")), Some(JobState::Pending));
}

/// Test: jobs feed a shared collection awaited with `map_object`
#[test]
fn test_pipeline_map_object_over_job_outputs() {
    let el = virtual_loop();
    let outputs: Rc<RefCell<Vec<(String, Value)>>> = Rc::new(RefCell::new(Vec::new()));

    let runner_el = el.clone();
    let sink = outputs.clone();
    let queue = Queue::new(
        &el,
        move |data| {
            let name = data.to_string();
            let future = Future::resolve_after(&runner_el, Duration::from_millis(3), data);
            sink.borrow_mut().push((name, future.clone().into()));
            Ok(future.into())
        },
        1,
    );

    queue.add("x", Value::from("x"), None);
    queue.add("y", Value::from("y"), None);
    el.block_on(&queue.drained()).expect("queue should drain");

    let entries = outputs.borrow().clone();
    let upper = Future::map_object(&el, entries, |value, key| {
        Ok(Value::from(format!("{}={}", key, value.to_string().to_uppercase())))
    });
    let object = el.block_on(&upper).expect("map_object should fulfill");

    let expected: std::collections::BTreeMap<String, Value> = [
        ("x".to_string(), Value::from("x=X")),
        ("y".to_string(), Value::from("y=Y")),
    ]
    .into_iter()
    .collect();
    assert_eq!(object, Value::Object(expected));
}
