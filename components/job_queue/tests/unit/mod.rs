//! Unit tests for job_queue

mod queue_test;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use async_runtime::{ClockMode, EventLoop, Future, MemorySink, RuntimeConfig};
use core_types::Value;

/// Loop on virtual time, reporting into a fresh memory sink.
pub fn virtual_loop() -> (EventLoop, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let event_loop = EventLoop::builder()
        .config(RuntimeConfig::default().with_clock(ClockMode::Virtual))
        .sink(sink.clone())
        .build();
    (event_loop, sink)
}

/// Shared log for ordering assertions.
pub fn log<T>() -> Rc<RefCell<Vec<T>>> {
    Rc::new(RefCell::new(Vec::new()))
}

/// Tracks how many jobs run at once.
#[derive(Default)]
pub struct Gauge {
    active: Cell<usize>,
    peak: Cell<usize>,
}

impl Gauge {
    pub fn enter(&self) {
        self.active.set(self.active.get() + 1);
        self.peak.set(self.peak.get().max(self.active.get()));
    }

    pub fn leave(&self) {
        self.active.set(self.active.get() - 1);
    }

    pub fn peak(&self) -> usize {
        self.peak.get()
    }
}

/// Runner whose jobs take `ms` milliseconds of loop time, tracked by `gauge`.
pub fn timed_runner(
    el: &EventLoop,
    ms: u64,
    gauge: Rc<Gauge>,
) -> impl Fn(Value) -> Result<Value, Value> + 'static {
    let el = el.clone();
    move |data| {
        gauge.enter();
        let gauge = gauge.clone();
        let finished = Future::resolve_after(&el, Duration::from_millis(ms), data).tap(move |_| {
            gauge.leave();
            Ok(Value::Undefined)
        });
        Ok(finished.into())
    }
}
