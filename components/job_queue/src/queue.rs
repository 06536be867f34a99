//! Concurrency-limited, dependency-aware job queue.
//!
//! A single scheduling loop walks the pending jobs in insertion order and
//! admits every job whose dependencies are done. Admission waits on the
//! `ready` gate, which stays unsettled while the number of running jobs is at
//! the concurrency cap. Passes repeat until one admits nothing.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use async_runtime::{EventLoop, Future};
use core_types::Value;
use serde::{Deserialize, Serialize};

use crate::job::{Job, JobId, JobState};

/// Concurrency used by [`Queue::with_default_concurrency`].
pub const DEFAULT_CONCURRENCY: usize = 4;

type Runner = Box<dyn Fn(Value) -> Result<Value, Value>>;

/// Number of jobs in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Jobs waiting to start.
    pub pending: usize,
    /// Jobs handed to the runner.
    pub running: usize,
    /// Jobs whose runner succeeded.
    pub done: usize,
    /// Jobs whose runner failed.
    pub errored: usize,
}

struct QueueState {
    jobs: HashMap<JobId, Job>,
    pending: HashSet<JobId>,
    /// Insertion order of pending jobs; compacted at the start of each pass.
    order: Vec<JobId>,
    running: HashSet<JobId>,
    done: HashSet<JobId>,
    errored: HashSet<JobId>,
    concurrency: usize,

    loop_running: bool,
    queue_running: bool,
    can_loop_again: bool,
    pass: VecDeque<JobId>,

    ready: Future,
    drained: Future,
    idle: Future,
}

impl QueueState {
    fn contains(&self, id: &JobId) -> bool {
        self.jobs.contains_key(id)
    }

    fn state_of(&self, id: &JobId) -> Option<JobState> {
        if self.running.contains(id) {
            Some(JobState::Running)
        } else if self.done.contains(id) {
            Some(JobState::Done)
        } else if self.errored.contains(id) {
            Some(JobState::Errored)
        } else if self.contains(id) {
            Some(JobState::Pending)
        } else {
            None
        }
    }

    fn start_pass(&mut self) {
        self.can_loop_again = false;
        let pending = &self.pending;
        self.order.retain(|id| pending.contains(id));
        self.pass = self.order.iter().cloned().collect();
    }

    /// Next job of the current pass that is still pending and unblocked.
    fn next_eligible(&mut self) -> Option<JobId> {
        while let Some(id) = self.pass.pop_front() {
            if !self.pending.contains(&id) {
                continue;
            }
            let unblocked = self
                .jobs
                .get(&id)
                .map_or(false, |job| job.is_unblocked(|dep| self.done.contains(dep)));
            if unblocked {
                return Some(id);
            }
        }
        None
    }
}

struct QueueInner {
    event_loop: EventLoop,
    runner: Runner,
    state: RefCell<QueueState>,
}

/// Runs identified jobs with a concurrency cap and dependency ordering.
///
/// Two signals are observable as futures:
/// - [`drained`](Queue::drained): nothing pending and nothing running
/// - [`idle`](Queue::idle): no progress possible right now, either drained
///   or every remaining job is blocked on a dependency that is not done
///
/// Each is replaced by a fresh future whenever its condition stops holding.
///
/// A failed job is recorded and never joins the done set, so jobs depending
/// on it stay pending.
///
/// # Examples
///
/// ```
/// use async_runtime::{ClockMode, EventLoop, RuntimeConfig};
/// use core_types::Value;
/// use job_queue::Queue;
///
/// let el = EventLoop::with_config(RuntimeConfig::default().with_clock(ClockMode::Virtual));
/// let queue = Queue::new(&el, |data| Ok(data), 2);
/// queue.add("fetch", Value::from("a"), None);
/// queue.add("parse", Value::from("b"), Some(vec!["fetch".into()]));
///
/// el.block_on(&queue.drained()).unwrap();
/// assert!(queue.is_done(&"parse".into()));
/// ```
#[derive(Clone)]
pub struct Queue {
    inner: Rc<QueueInner>,
}

impl Queue {
    /// Creates a running queue.
    ///
    /// `runner` receives each job's data. An `Ok` thenable is awaited; an
    /// `Err` or a rejection marks the job as errored. A `concurrency` of 0 is
    /// treated as 1.
    pub fn new<F>(event_loop: &EventLoop, runner: F, concurrency: usize) -> Self
    where
        F: Fn(Value) -> Result<Value, Value> + 'static,
    {
        let settled = || Future::resolved(event_loop, Value::Undefined);
        Self {
            inner: Rc::new(QueueInner {
                event_loop: event_loop.clone(),
                runner: Box::new(runner),
                state: RefCell::new(QueueState {
                    jobs: HashMap::new(),
                    pending: HashSet::new(),
                    order: Vec::new(),
                    running: HashSet::new(),
                    done: HashSet::new(),
                    errored: HashSet::new(),
                    concurrency: concurrency.max(1),
                    loop_running: false,
                    queue_running: true,
                    can_loop_again: false,
                    pass: VecDeque::new(),
                    ready: settled(),
                    drained: settled(),
                    idle: settled(),
                }),
            }),
        }
    }

    /// Creates a running queue with [`DEFAULT_CONCURRENCY`].
    pub fn with_default_concurrency<F>(event_loop: &EventLoop, runner: F) -> Self
    where
        F: Fn(Value) -> Result<Value, Value> + 'static,
    {
        Self::new(event_loop, runner, DEFAULT_CONCURRENCY)
    }

    /// Enqueues a job.
    ///
    /// Returns false, changing nothing, if `id` is already pending, running,
    /// done or errored.
    pub fn add(&self, id: impl Into<JobId>, data: Value, dependencies: Option<Vec<JobId>>) -> bool {
        let id = id.into();
        let start = {
            let mut state = self.inner.state.borrow_mut();
            if state.contains(&id) {
                tracing::trace!(job = %id, "job already known, ignored");
                return false;
            }

            state.jobs.insert(id.clone(), Job::new(id.clone(), data, dependencies));
            state.pending.insert(id.clone());
            state.order.push(id.clone());
            state.can_loop_again = true;
            if state.drained.is_settled() {
                state.drained = Future::pending(&self.inner.event_loop);
            }
            state.queue_running && !state.loop_running
        };

        tracing::debug!(job = %id, "job added");
        if start {
            self.inner.start_loop();
        }
        true
    }

    /// Changes the concurrency cap. 0 is treated as 1.
    ///
    /// Raising the cap reopens admission immediately.
    pub fn set_concurrency(&self, concurrency: usize) {
        let gate = {
            let mut state = self.inner.state.borrow_mut();
            state.concurrency = concurrency.max(1);
            (state.running.len() < state.concurrency).then(|| state.ready.clone())
        };
        if let Some(gate) = gate {
            gate.resolve(Value::Undefined);
        }
    }

    /// Stops admitting jobs. Running jobs finish normally.
    pub fn stop(&self) {
        self.inner.state.borrow_mut().queue_running = false;
    }

    /// Restarts admission after [`stop`](Queue::stop).
    pub fn resume(&self) {
        self.inner.state.borrow_mut().queue_running = true;
        self.inner.start_loop();
    }

    /// Future settled once nothing is pending or running.
    pub fn drained(&self) -> Future {
        self.inner.state.borrow().drained.clone()
    }

    /// Future settled once no job can make progress.
    pub fn idle(&self) -> Future {
        self.inner.state.borrow().idle.clone()
    }

    /// Current concurrency cap.
    pub fn concurrency(&self) -> usize {
        self.inner.state.borrow().concurrency
    }

    /// Returns true unless the queue is stopped.
    pub fn is_running(&self) -> bool {
        self.inner.state.borrow().queue_running
    }

    /// Number of jobs in each state.
    pub fn counts(&self) -> QueueCounts {
        let state = self.inner.state.borrow();
        QueueCounts {
            pending: state.pending.len(),
            running: state.running.len(),
            done: state.done.len(),
            errored: state.errored.len(),
        }
    }

    /// State of a job, or `None` if it was never added.
    pub fn state_of(&self, id: &JobId) -> Option<JobState> {
        self.inner.state.borrow().state_of(id)
    }

    /// Returns true if the job's runner succeeded.
    pub fn is_done(&self, id: &JobId) -> bool {
        self.inner.state.borrow().done.contains(id)
    }

    /// Failure reason of an errored job.
    pub fn error_of(&self, id: &JobId) -> Option<Value> {
        self.inner
            .state
            .borrow()
            .jobs
            .get(id)
            .and_then(|job| job.error.clone())
    }

    /// Snapshot of a job.
    pub fn job(&self, id: &JobId) -> Option<Job> {
        self.inner.state.borrow().jobs.get(id).cloned()
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("counts", &self.counts())
            .field("concurrency", &self.concurrency())
            .field("running", &self.is_running())
            .finish()
    }
}

enum AfterJob {
    Restart,
    Finish,
    Nothing,
}

impl QueueInner {
    /// Starts the scheduling loop unless one is active.
    fn start_loop(self: &Rc<Self>) {
        {
            let mut state = self.state.borrow_mut();
            if state.loop_running {
                return;
            }
            state.loop_running = true;
            state.start_pass();
        }
        self.advance();
    }

    /// Walks the current pass until a job waits on the gate or no pass
    /// admits anything.
    fn advance(self: &Rc<Self>) {
        loop {
            let next = self.state.borrow_mut().next_eligible();
            match next {
                Some(id) => {
                    let gate = {
                        let mut state = self.state.borrow_mut();
                        if state.idle.is_settled() {
                            state.idle = Future::pending(&self.event_loop);
                        }
                        state.can_loop_again = true;
                        state.ready.clone()
                    };

                    let queue = Rc::downgrade(self);
                    let event_loop = self.event_loop.clone();
                    gate.observe(move |_| {
                        event_loop.defer(move || {
                            if let Some(queue) = queue.upgrade() {
                                queue.after_gate(id);
                            }
                        });
                    });
                    return;
                }
                None => {
                    let again = {
                        let mut state = self.state.borrow_mut();
                        if state.can_loop_again {
                            state.start_pass();
                            true
                        } else {
                            false
                        }
                    };
                    if !again {
                        self.finish_run();
                        return;
                    }
                }
            }
        }
    }

    fn after_gate(self: &Rc<Self>, id: JobId) {
        let (queue_running, still_pending) = {
            let state = self.state.borrow();
            (state.queue_running, state.pending.contains(&id))
        };

        // Stopped while waiting on the gate
        if !queue_running {
            self.finish_run();
            return;
        }
        if still_pending {
            self.run_job(id);
        }
        self.advance();
    }

    fn run_job(self: &Rc<Self>, id: JobId) {
        let data = {
            let mut state = self.state.borrow_mut();
            state.pending.remove(&id);
            state.running.insert(id.clone());
            if state.running.len() >= state.concurrency && state.ready.is_settled() {
                state.ready = Future::pending(&self.event_loop);
            }
            state
                .jobs
                .get(&id)
                .map(|job| job.data.clone())
                .unwrap_or(Value::Undefined)
        };

        tracing::debug!(job = %id, "job started");
        let outcome = match (self.runner)(data) {
            Ok(value) => Future::resolved(&self.event_loop, value),
            Err(reason) => Future::rejected(&self.event_loop, reason),
        };

        let queue: Weak<Self> = Rc::downgrade(self);
        outcome.observe(move |result| {
            if let Some(queue) = queue.upgrade() {
                queue.complete(id, result);
            }
        });
    }

    fn complete(self: &Rc<Self>, id: JobId, result: Result<Value, Value>) {
        let gate = {
            let mut state = self.state.borrow_mut();
            match result {
                Ok(_) => {
                    tracing::debug!(job = %id, "job done");
                    state.done.insert(id.clone());
                    state.can_loop_again = true;
                }
                Err(reason) => {
                    tracing::warn!(job = %id, reason = %reason, "job failed");
                    if let Some(job) = state.jobs.get_mut(&id) {
                        job.error = Some(reason);
                    }
                    state.errored.insert(id.clone());
                }
            }
            state.running.remove(&id);
            (state.running.len() < state.concurrency).then(|| state.ready.clone())
        };
        if let Some(gate) = gate {
            gate.resolve(Value::Undefined);
        }

        // Last, since finished work may have unblocked dependents
        let next = {
            let state = self.state.borrow();
            if state.loop_running {
                AfterJob::Nothing
            } else if state.queue_running && !state.pending.is_empty() {
                AfterJob::Restart
            } else {
                AfterJob::Finish
            }
        };
        match next {
            AfterJob::Restart => self.start_loop(),
            AfterJob::Finish => self.finish_run(),
            AfterJob::Nothing => {}
        }
    }

    fn finish_run(&self) {
        let (idle, drained) = {
            let mut state = self.state.borrow_mut();
            state.loop_running = false;
            if state.pending.is_empty() {
                state.order.clear();
            }
            (
                state.running.is_empty().then(|| state.idle.clone()),
                (state.pending.is_empty() && state.running.is_empty())
                    .then(|| state.drained.clone()),
            )
        };

        if let Some(idle) = idle {
            tracing::debug!("queue idle");
            idle.resolve(Value::Undefined);
        }
        if let Some(drained) = drained {
            tracing::debug!("queue drained");
            drained.resolve(Value::Undefined);
        }
    }
}
