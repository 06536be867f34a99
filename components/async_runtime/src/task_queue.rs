//! Task, microtask and timer queue management.
//!
//! This module provides the queues used by the event loop. Tasks are
//! executed one at a time, with all microtasks draining after each task.
//! Timers turn into tasks once their deadline has passed.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::time::Duration;

use crate::error::RuntimeError;

type Callback = Box<dyn FnOnce() -> Result<(), RuntimeError>>;

/// A task to be executed by the event loop.
///
/// Tasks represent work for a later iteration of the loop, such as timer
/// callbacks.
pub struct Task {
    callback: Callback,
}

impl Task {
    /// Creates a new Task from a closure.
    ///
    /// # Arguments
    ///
    /// * `f` - The function to execute when the task runs
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), RuntimeError> + 'static,
    {
        Self {
            callback: Box::new(f),
        }
    }

    /// Executes the task.
    pub fn run(self) -> Result<(), RuntimeError> {
        (self.callback)()
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task {{ ... }}")
    }
}

/// A microtask to be executed by the event loop.
///
/// Microtasks run after the current synchronous code and before the next
/// task. Future reactions and unhandled-rejection checks are microtasks.
pub struct MicroTask {
    callback: Callback,
}

impl MicroTask {
    /// Creates a new MicroTask from a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), RuntimeError> + 'static,
    {
        Self {
            callback: Box::new(f),
        }
    }

    /// Executes the microtask.
    pub fn run(self) -> Result<(), RuntimeError> {
        (self.callback)()
    }
}

impl std::fmt::Debug for MicroTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MicroTask {{ ... }}")
    }
}

/// A queue for tasks.
///
/// Tasks are processed in FIFO order, one at a time.
#[derive(Debug, Default)]
pub struct TaskQueue {
    queue: VecDeque<Task>,
}

impl TaskQueue {
    /// Creates a new empty TaskQueue.
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Adds a task to the end of the queue.
    pub fn enqueue(&mut self, task: Task) {
        self.queue.push_back(task);
    }

    /// Removes and returns the next task from the queue.
    pub fn dequeue(&mut self) -> Option<Task> {
        self.queue.pop_front()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns the number of tasks in the queue.
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// A queue for microtasks.
///
/// Microtasks are drained completely after each task.
#[derive(Debug, Default)]
pub struct MicrotaskQueue {
    queue: VecDeque<MicroTask>,
}

impl MicrotaskQueue {
    /// Creates a new empty MicrotaskQueue.
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Adds a microtask to the end of the queue.
    pub fn enqueue(&mut self, microtask: MicroTask) {
        self.queue.push_back(microtask);
    }

    /// Removes and returns the next microtask from the queue.
    pub fn dequeue(&mut self) -> Option<MicroTask> {
        self.queue.pop_front()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns the number of microtasks in the queue.
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Identifies a scheduled timer, for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct Timer {
    deadline: Duration,
    id: TimerId,
    task: Task,
}

// Min-heap on (deadline, id); ids grow monotonically so equal deadlines fire
// in scheduling order.
impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.0.cmp(&self.id.0))
    }
}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Timer {}

/// Timers ordered by deadline, then by scheduling order.
#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Timer>,
    cancelled: HashSet<TimerId>,
    next_id: u64,
}

impl TimerQueue {
    /// Creates an empty timer queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `task` to become runnable at `deadline`.
    pub fn schedule(&mut self, deadline: Duration, task: Task) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.heap.push(Timer { deadline, id, task });
        id
    }

    /// Cancels a timer. Returns false if it already fired or was unknown.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        if self.heap.iter().any(|timer| timer.id == id) {
            self.cancelled.insert(id)
        } else {
            false
        }
    }

    /// Deadline of the earliest live timer.
    pub fn next_deadline(&mut self) -> Option<Duration> {
        self.discard_cancelled();
        self.heap.peek().map(|timer| timer.deadline)
    }

    /// Removes and returns the earliest timer if it is due at `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<Task> {
        self.discard_cancelled();
        if self.heap.peek()?.deadline > now {
            return None;
        }
        self.heap.pop().map(|timer| timer.task)
    }

    /// Returns true if no live timer is scheduled.
    pub fn is_empty(&mut self) -> bool {
        self.next_deadline().is_none()
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.heap.len() - self.cancelled.len()
    }

    fn discard_cancelled(&mut self) {
        while let Some(timer) = self.heap.peek() {
            if !self.cancelled.remove(&timer.id) {
                break;
            }
            self.heap.pop();
        }
    }
}

impl std::fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerQueue")
            .field("len", &self.len())
            .finish()
    }
}
