//! Event loop implementation.
//!
//! This module provides the event loop that coordinates task, microtask and
//! timer execution following the JavaScript event loop model. It is also the
//! deferred-execution primitive futures rely on: anything enqueued as a
//! microtask runs after the current synchronous code, in insertion order.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use core_types::Value;

use crate::clock::{Clock, SystemClock, VirtualClock};
use crate::config::{ClockMode, RuntimeConfig};
use crate::diagnostics::{DiagnosticSink, TracingSink, UnhandledRejection};
use crate::error::RuntimeError;
use crate::future::Future;
use crate::task_queue::{MicroTask, MicrotaskQueue, Task, TaskQueue, TimerId, TimerQueue};

type Settlement = Box<dyn FnOnce()>;

pub(crate) struct LoopInner {
    task_queue: RefCell<TaskQueue>,
    microtask_queue: RefCell<MicrotaskQueue>,
    timers: RefCell<TimerQueue>,
    clock: Box<dyn Clock>,
    config: RuntimeConfig,
    sink: Arc<dyn DiagnosticSink>,
    /// Reaction batches of futures settled while another batch is running.
    settlements: RefCell<VecDeque<Settlement>>,
    settling: Cell<bool>,
}

/// Clears the settling flag even if a reaction panics.
struct SettlingGuard<'a>(&'a Cell<bool>);

impl Drop for SettlingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// The event loop.
///
/// Each iteration (turn) of the loop:
/// 1. Drains all microtasks
/// 2. Takes the oldest task and executes it; when the task queue is empty,
///    the earliest due timer is queued as a task first
/// 3. Repeats
///
/// `EventLoop` is a cheap handle; clones share the same queues. Futures keep
/// a weak reference to their loop, so dropping every handle discards work
/// that is still queued.
///
/// # Examples
///
/// ```
/// use async_runtime::{EventLoop, Future};
/// use core_types::Value;
///
/// let event_loop = EventLoop::new();
/// let future = Future::resolved(&event_loop, Value::Smi(42));
/// assert_eq!(event_loop.block_on(&future).unwrap(), Value::Smi(42));
/// ```
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

impl EventLoop {
    /// Creates an event loop with the default configuration.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates an event loop with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Starts building an event loop with custom collaborators.
    pub fn builder() -> EventLoopBuilder {
        EventLoopBuilder::default()
    }

    /// The configuration this loop was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Current time of the loop's clock.
    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    /// Adds a task to the task queue.
    pub fn enqueue_task(&self, task: Task) {
        self.inner.task_queue.borrow_mut().enqueue(task);
    }

    /// Adds a microtask to the microtask queue.
    ///
    /// The microtask will be executed after the current synchronous code
    /// completes, before any task.
    pub fn enqueue_microtask(&self, microtask: MicroTask) {
        self.inner.microtask_queue.borrow_mut().enqueue(microtask);
    }

    /// Runs `f` on a later turn, after every microtask queued before it.
    pub fn defer<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        self.enqueue_microtask(MicroTask::new(move || {
            f();
            Ok(())
        }));
    }

    /// Runs `f` as a task once `delay` has elapsed on the loop's clock.
    pub fn set_timeout<F>(&self, delay: Duration, f: F) -> TimerId
    where
        F: FnOnce() + 'static,
    {
        let deadline = self.now() + delay;
        self.inner.timers.borrow_mut().schedule(
            deadline,
            Task::new(move || {
                f();
                Ok(())
            }),
        )
    }

    /// Cancels a timer that has not fired yet.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        self.inner.timers.borrow_mut().cancel(id)
    }

    /// Returns true if the task queue is empty.
    pub fn is_task_queue_empty(&self) -> bool {
        self.inner.task_queue.borrow().is_empty()
    }

    /// Returns true if the microtask queue is empty.
    pub fn is_microtask_queue_empty(&self) -> bool {
        self.inner.microtask_queue.borrow().is_empty()
    }

    /// Returns true if at least one timer has not fired yet.
    pub fn has_pending_timers(&self) -> bool {
        !self.inner.timers.borrow_mut().is_empty()
    }

    /// Runs all microtasks in the queue until empty.
    ///
    /// New microtasks added during execution are also processed before this
    /// method returns. Stops at the first microtask that fails; the rest stay
    /// queued.
    pub fn run_all_microtasks(&self) -> Result<(), RuntimeError> {
        loop {
            let next = self.inner.microtask_queue.borrow_mut().dequeue();
            match next {
                Some(microtask) => microtask.run()?,
                None => return Ok(()),
            }
        }
    }

    /// Processes one complete cycle: one ready task followed by all
    /// microtasks. Never waits for a timer that is not due yet.
    pub fn process_one_cycle(&self) -> Result<(), RuntimeError> {
        self.run_all_microtasks()?;
        if let Some(task) = self.next_task(false) {
            task.run()?;
        }
        self.run_all_microtasks()
    }

    /// Runs the event loop until all tasks, microtasks and timers are
    /// processed, waiting on the clock for future timers.
    pub fn run_until_done(&self) -> Result<(), RuntimeError> {
        loop {
            self.run_all_microtasks()?;
            match self.next_task(true) {
                Some(task) => task.run()?,
                None => return Ok(()),
            }
        }
    }

    /// Drives the loop until `future` settles and returns its value.
    ///
    /// Observing the future counts as handling its rejection, and wakes it
    /// if it is dormant. A rejection is returned as
    /// [`RuntimeError::Rejected`]; [`RuntimeError::Stalled`] means no queued
    /// work can settle it anymore.
    pub fn block_on(&self, future: &Future) -> Result<Value, RuntimeError> {
        let slot: Rc<RefCell<Option<Result<Value, Value>>>> = Rc::new(RefCell::new(None));
        let sink = slot.clone();
        future.observe(move |outcome| *sink.borrow_mut() = Some(outcome));

        loop {
            self.run_all_microtasks()?;
            let outcome = slot.borrow_mut().take();
            if let Some(outcome) = outcome {
                return outcome.map_err(RuntimeError::Rejected);
            }
            match self.next_task(true) {
                Some(task) => task.run()?,
                None => return Err(RuntimeError::Stalled),
            }
        }
    }

    pub(crate) fn handle(&self) -> LoopHandle {
        LoopHandle {
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn next_task(&self, wait: bool) -> Option<Task> {
        if self.inner.task_queue.borrow().is_empty() {
            self.enqueue_due_timer(wait);
        }
        self.inner.task_queue.borrow_mut().dequeue()
    }

    /// Moves the earliest timer into the task queue once it is due.
    fn enqueue_due_timer(&self, wait: bool) {
        let deadline = match self.inner.timers.borrow_mut().next_deadline() {
            Some(deadline) => deadline,
            None => return,
        };
        if wait {
            self.inner.clock.wait_until(deadline);
        }

        let now = self.inner.clock.now();
        let due = self.inner.timers.borrow_mut().pop_due(now);
        if let Some(task) = due {
            tracing::trace!(deadline_ms = deadline.as_millis() as u64, "timer fired");
            self.inner.task_queue.borrow_mut().enqueue(task);
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("config", &self.inner.config)
            .field("tasks", &self.inner.task_queue.borrow().len())
            .field("microtasks", &self.inner.microtask_queue.borrow().len())
            .finish()
    }
}

/// Builds an [`EventLoop`] with a custom clock or diagnostics sink.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use async_runtime::{ClockMode, EventLoop, MemorySink, RuntimeConfig};
///
/// let sink = Arc::new(MemorySink::new());
/// let event_loop = EventLoop::builder()
///     .config(RuntimeConfig::default().with_clock(ClockMode::Virtual))
///     .sink(sink.clone())
///     .build();
/// assert!(event_loop.config().warn_unhandled_rejection);
/// ```
#[derive(Default)]
pub struct EventLoopBuilder {
    config: RuntimeConfig,
    sink: Option<Arc<dyn DiagnosticSink>>,
    clock: Option<Box<dyn Clock>>,
}

impl EventLoopBuilder {
    /// Sets the runtime configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the sink receiving unhandled-rejection reports.
    pub fn sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Uses an explicit clock instead of the one named by the config.
    pub fn clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Creates the event loop.
    pub fn build(self) -> EventLoop {
        let clock = self.clock.unwrap_or_else(|| match self.config.clock {
            ClockMode::System => Box::new(SystemClock::new()),
            ClockMode::Virtual => Box::new(VirtualClock::new()),
        });
        EventLoop {
            inner: Rc::new(LoopInner {
                task_queue: RefCell::new(TaskQueue::new()),
                microtask_queue: RefCell::new(MicrotaskQueue::new()),
                timers: RefCell::new(TimerQueue::new()),
                clock,
                config: self.config,
                sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
                settlements: RefCell::new(VecDeque::new()),
                settling: Cell::new(false),
            }),
        }
    }
}

/// Weak handle held by futures.
#[derive(Clone)]
pub(crate) struct LoopHandle {
    inner: Weak<LoopInner>,
}

impl LoopHandle {
    pub(crate) fn upgrade(&self) -> Option<EventLoop> {
        self.inner.upgrade().map(|inner| EventLoop { inner })
    }

    pub(crate) fn defer<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        match self.upgrade() {
            Some(event_loop) => event_loop.defer(f),
            None => tracing::trace!("event loop dropped, deferred callback discarded"),
        }
    }

    pub(crate) fn set_timeout<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + 'static,
    {
        match self.upgrade() {
            Some(event_loop) => {
                event_loop.set_timeout(delay, f);
            }
            None => tracing::trace!("event loop dropped, timer discarded"),
        }
    }

    /// Runs the reactions of a settled future.
    ///
    /// The outermost call drains a worklist; a future settled by a reaction
    /// queues its own batch there instead of recursing, so the stack depth
    /// stays constant however long a chain of pending futures is.
    pub(crate) fn run_settlement<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        let inner = match self.inner.upgrade() {
            Some(inner) => inner,
            None => return f(),
        };
        if inner.settling.replace(true) {
            inner.settlements.borrow_mut().push_back(Box::new(f));
            return;
        }

        let _guard = SettlingGuard(&inner.settling);
        f();
        loop {
            let next = inner.settlements.borrow_mut().pop_front();
            match next {
                Some(settlement) => settlement(),
                None => break,
            }
        }
    }

    /// Fails the loop from a later microtask.
    pub(crate) fn raise(&self, reason: Value) {
        if let Some(event_loop) = self.upgrade() {
            event_loop.enqueue_microtask(MicroTask::new(move || Err(RuntimeError::Uncaught(reason))));
        }
    }

    pub(crate) fn warn_unhandled_rejection(&self) -> bool {
        self.inner
            .upgrade()
            .map(|inner| inner.config.warn_unhandled_rejection)
            .unwrap_or(false)
    }

    pub(crate) fn report_unhandled(&self, reason: &Value) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .sink
                .unhandled_rejection(&UnhandledRejection::from_reason(reason));
        }
    }
}
