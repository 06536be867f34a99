//! Future implementation.
//!
//! A [`Future`] represents the eventual outcome of an asynchronous operation.
//! It extends the usual promise model with a dormant (lazy) start, tap-mode
//! reactions that pass the chain through unchanged, terminal consumers, and
//! unhandled-rejection tracking.
//!
//! Reactions attached to a future that is already settled never run in the
//! same turn: they are deferred through the event loop's microtask queue.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use core_types::{JsError, SettleFn, Thenable, Value};

use crate::event_loop::{EventLoop, LoopHandle};

/// The state of a Future.
///
/// Once settled (Fulfilled or Rejected), a Future cannot change state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    /// Holds an executor that has not run yet.
    Dormant,
    /// Neither fulfilled nor rejected.
    Pending,
    /// Settled with a value.
    Fulfilled,
    /// Settled with a failure reason.
    Rejected,
}

impl FutureState {
    /// Returns true for Fulfilled and Rejected.
    pub fn is_settled(self) -> bool {
        matches!(self, FutureState::Fulfilled | FutureState::Rejected)
    }

    /// Lowercase state name.
    pub fn as_str(self) -> &'static str {
        match self {
            FutureState::Dormant => "dormant",
            FutureState::Pending => "pending",
            FutureState::Fulfilled => "fulfilled",
            FutureState::Rejected => "rejected",
        }
    }
}

/// A handler attached to a future.
///
/// Returning `Err` is the equivalent of throwing: the downstream future is
/// rejected with the error value. Returning a thenable makes the downstream
/// future follow it.
#[derive(Clone)]
pub struct Function {
    callback: Rc<dyn Fn(Value) -> Result<Value, Value>>,
}

impl Function {
    /// Creates a new Function from a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, Value> + 'static,
    {
        Self {
            callback: Rc::new(f),
        }
    }

    /// Calls the function with the given argument.
    pub fn call(&self, arg: Value) -> Result<Value, Value> {
        (self.callback)(arg)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function {{ ... }}")
    }
}

type Executor = Box<dyn FnOnce(Resolver) -> Result<(), Value>>;
type Observer = Box<dyn FnOnce(Result<Value, Value>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Creates a downstream future.
    Chain,
    /// Side effect only; returns the same future.
    Tap,
    /// Like `Tap`, but failures are raised on the event loop.
    Terminal,
}

enum Reaction {
    Chain {
        downstream: Option<Future>,
        on_fulfilled: Option<Function>,
        on_rejected: Option<Function>,
        terminal: bool,
    },
    Observe(Observer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RejectionTracking {
    Untracked,
    Unobserved,
    Handled,
}

struct Inner {
    state: FutureState,
    value: Value,
    executor: Option<Executor>,
    reactions: Vec<Reaction>,
    rejection: RejectionTracking,
}

// Chains of pending futures own each other through their reactions; unlink
// them one at a time so dropping a long chain does not recurse.
impl Drop for Inner {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.reactions);
        while let Some(reaction) = stack.pop() {
            if let Reaction::Chain {
                downstream: Some(mut downstream),
                ..
            } = reaction
            {
                if let Some(cell) = Rc::get_mut(&mut downstream.inner) {
                    stack.append(&mut cell.get_mut().reactions);
                }
            }
        }
    }
}

/// A single eventual outcome, bound to an [`EventLoop`].
///
/// Cloning a `Future` yields another handle to the same state.
///
/// # Examples
///
/// ```
/// use async_runtime::{EventLoop, Future};
/// use core_types::Value;
///
/// let event_loop = EventLoop::new();
/// let future = Future::new(&event_loop, |resolver| {
///     resolver.resolve(Value::Smi(20));
///     Ok(())
/// })
/// .and_then(|v| Ok(Value::Smi(v.as_number().unwrap_or(0.0) as i32 + 1)));
///
/// assert_eq!(event_loop.block_on(&future).unwrap(), Value::Smi(21));
/// ```
#[derive(Clone)]
pub struct Future {
    inner: Rc<RefCell<Inner>>,
    handle: LoopHandle,
}

/// Settle-once pair handed to executors.
///
/// Only the first call to either [`resolve`](Resolver::resolve) or
/// [`reject`](Resolver::reject), on any clone, has an effect.
#[derive(Clone)]
pub struct Resolver {
    future: Future,
    triggered: Rc<Cell<bool>>,
}

impl Resolver {
    fn new(future: Future) -> Self {
        Self {
            future,
            triggered: Rc::new(Cell::new(false)),
        }
    }

    /// Resolves the future, following `value` if it is thenable.
    pub fn resolve(&self, value: Value) {
        if !self.triggered.replace(true) {
            self.future.resolve(value);
        }
    }

    /// Rejects the future.
    pub fn reject(&self, reason: Value) {
        if !self.triggered.replace(true) {
            self.future.reject(reason);
        }
    }

    /// Returns true once either side has been called.
    pub fn is_triggered(&self) -> bool {
        self.triggered.get()
    }

    fn into_settle_fns(self) -> (SettleFn, SettleFn) {
        let other = self.clone();
        (
            Box::new(move |value| self.resolve(value)),
            Box::new(move |reason| other.reject(reason)),
        )
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("triggered", &self.triggered.get())
            .finish()
    }
}

impl Future {
    fn with_state(handle: LoopHandle, state: FutureState, value: Value) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state,
                value,
                executor: None,
                reactions: Vec::new(),
                rejection: RejectionTracking::Untracked,
            })),
            handle,
        }
    }

    pub(crate) fn pending_on(handle: &LoopHandle) -> Self {
        Self::with_state(handle.clone(), FutureState::Pending, Value::Undefined)
    }

    pub(crate) fn resolved_on(handle: &LoopHandle, value: Value) -> Self {
        if let Value::Thenable(thenable) = &value {
            if let Some(future) = thenable.as_any().downcast_ref::<Future>() {
                return future.clone();
            }
            let future = Self::pending_on(handle);
            future.resolve(value);
            return future;
        }
        Self::with_state(handle.clone(), FutureState::Fulfilled, value)
    }

    fn dormant_on<F>(handle: &LoopHandle, executor: F) -> Self
    where
        F: FnOnce(Resolver) -> Result<(), Value> + 'static,
    {
        let future = Self::with_state(handle.clone(), FutureState::Dormant, Value::Undefined);
        future.inner.borrow_mut().executor = Some(Box::new(executor));
        future
    }

    /// Creates a future and runs `executor` synchronously.
    ///
    /// An `Err` returned by the executor rejects the future, unless the
    /// resolver was already used.
    pub fn new<F>(event_loop: &EventLoop, executor: F) -> Self
    where
        F: FnOnce(Resolver) -> Result<(), Value> + 'static,
    {
        let future = Self::dormant_on(&event_loop.handle(), executor);
        future.exec();
        future
    }

    /// Creates a pending future without an executor; the owner settles it
    /// with [`resolve`](Future::resolve) or [`reject`](Future::reject).
    pub fn pending(event_loop: &EventLoop) -> Self {
        Self::pending_on(&event_loop.handle())
    }

    /// Creates a dormant future.
    ///
    /// `executor` runs the first time a fulfillment handler is attached, or
    /// when [`exec`](Future::exec) is called. Rejection-only handlers do not
    /// wake it.
    pub fn dormant<F>(event_loop: &EventLoop, executor: F) -> Self
    where
        F: FnOnce(Resolver) -> Result<(), Value> + 'static,
    {
        Self::dormant_on(&event_loop.handle(), executor)
    }

    /// Returns a future for `value`.
    ///
    /// A native future is returned as is, a foreign thenable is wrapped, and
    /// any other value produces an already fulfilled future.
    pub fn resolved(event_loop: &EventLoop, value: Value) -> Self {
        Self::resolved_on(&event_loop.handle(), value)
    }

    /// Returns an already rejected future.
    pub fn rejected(event_loop: &EventLoop, reason: Value) -> Self {
        let future = Self::pending(event_loop);
        future.reject(reason);
        future
    }

    /// Returns true if `value` exposes a continuation-registration operation.
    pub fn is_thenable(value: &Value) -> bool {
        value.as_thenable().is_some()
    }

    /// Adapts any thenable to a native future.
    pub fn from_thenable(event_loop: &EventLoop, value: Value) -> Self {
        Self::resolved(event_loop, value)
    }

    /// Returns a future fulfilled with `value` after `delay`.
    pub fn resolve_after(event_loop: &EventLoop, delay: Duration, value: Value) -> Self {
        let future = Self::pending(event_loop);
        future.resolve_timeout(delay, value);
        future
    }

    /// Returns a future rejected with `reason` after `delay`.
    pub fn reject_after(event_loop: &EventLoop, delay: Duration, reason: Value) -> Self {
        let future = Self::pending(event_loop);
        future.reject_timeout(delay, reason);
        future
    }

    /// Returns a future fulfilled with `value` once `delay` has elapsed on a
    /// loop that keeps up.
    ///
    /// The delay runs as two halves, each behind a zero-delay timer. Work
    /// that holds the loop up pushes every step back, so a busy loop
    /// stretches the timeout instead of firing it as soon as it catches up.
    pub fn resolve_busy_after(event_loop: &EventLoop, delay: Duration, value: Value) -> Self {
        let future = Self::pending(event_loop);
        let half = delay / 2;
        // Popped from the back
        let steps = vec![Duration::ZERO, delay - half, half, Duration::ZERO];
        let target = future.clone();
        chain_timers(
            future.handle.clone(),
            steps,
            Box::new(move || target.resolve(value)),
        );
        future
    }

    /// Runs the executor of a dormant future. No-op in any other state.
    pub fn exec(&self) {
        let executor = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != FutureState::Dormant {
                return;
            }
            inner.state = FutureState::Pending;
            inner.executor.take()
        };

        if let Some(executor) = executor {
            let resolver = Resolver::new(self.clone());
            if let Err(reason) = executor(resolver.clone()) {
                resolver.reject(reason);
            }
        }
    }

    /// Resolves the future.
    ///
    /// A thenable value is followed until it settles. Resolving a future
    /// with itself rejects it with a `TypeError`. No-op once settled.
    pub fn resolve(&self, value: Value) {
        if self.is_settled() {
            return;
        }

        if let Value::Thenable(thenable) = &value {
            let is_self = thenable
                .as_any()
                .downcast_ref::<Future>()
                .map_or(false, |other| other.ptr_eq(self));
            if is_self {
                self.reject(JsError::type_error("chaining cycle detected for future").into());
                return;
            }

            let resolver = Resolver::new(self.clone());
            let (on_fulfilled, on_rejected) = resolver.clone().into_settle_fns();
            if let Err(reason) = thenable.subscribe(on_fulfilled, on_rejected) {
                resolver.reject(reason);
            }
            return;
        }

        self.settle(FutureState::Fulfilled, value);
    }

    /// Alias of [`resolve`](Future::resolve).
    pub fn fulfill(&self, value: Value) {
        self.resolve(value);
    }

    /// Rejects the future. No-op once settled.
    ///
    /// With no reaction attached, the rejection is reported to the loop's
    /// diagnostics sink unless something observes it before the next
    /// microtask.
    pub fn reject(&self, reason: Value) {
        if self.is_settled() {
            return;
        }
        self.settle(FutureState::Rejected, reason);
    }

    /// Resolves the future after `delay`.
    pub fn resolve_timeout(&self, delay: Duration, value: Value) {
        let future = self.clone();
        self.handle.set_timeout(delay, move || future.resolve(value));
    }

    /// Rejects the future after `delay`.
    pub fn reject_timeout(&self, delay: Duration, reason: Value) {
        let future = self.clone();
        self.handle.set_timeout(delay, move || future.reject(reason));
    }

    /// Attaches handlers and returns the downstream future.
    ///
    /// A missing handler passes the outcome through unchanged. Handlers never
    /// run in the turn that attaches them.
    pub fn then(&self, on_fulfilled: Option<Function>, on_rejected: Option<Function>) -> Future {
        self.register(on_fulfilled, on_rejected, Mode::Chain)
    }

    /// Shorthand for `then(Some(f), None)`.
    pub fn and_then<F>(&self, f: F) -> Future
    where
        F: Fn(Value) -> Result<Value, Value> + 'static,
    {
        self.then(Some(Function::new(f)), None)
    }

    /// Shorthand for `then(None, Some(f))`.
    pub fn catch<F>(&self, f: F) -> Future
    where
        F: Fn(Value) -> Result<Value, Value> + 'static,
    {
        self.then(None, Some(Function::new(f)))
    }

    /// Runs `f` on fulfillment for its side effect and returns this future.
    pub fn tap<F>(&self, f: F) -> Future
    where
        F: Fn(Value) -> Result<Value, Value> + 'static,
    {
        self.register(Some(Function::new(f)), None, Mode::Tap)
    }

    /// Runs `f` on rejection for its side effect and returns this future.
    pub fn tap_catch<F>(&self, f: F) -> Future
    where
        F: Fn(Value) -> Result<Value, Value> + 'static,
    {
        self.register(None, Some(Function::new(f)), Mode::Tap)
    }

    /// Runs `f` on either outcome for its side effect and returns this
    /// future.
    pub fn finally<F>(&self, f: F) -> Future
    where
        F: Fn(Value) -> Result<Value, Value> + 'static,
    {
        let f = Function::new(f);
        self.register(Some(f.clone()), Some(f), Mode::Tap)
    }

    /// Terminal consumer.
    ///
    /// Like a tap, but an `Err` from a handler, or a rejection without a
    /// rejection handler, is raised as [`RuntimeError::Uncaught`] from a
    /// later microtask.
    ///
    /// [`RuntimeError::Uncaught`]: crate::RuntimeError::Uncaught
    pub fn done(&self, on_fulfilled: Option<Function>, on_rejected: Option<Function>) -> Future {
        self.register(on_fulfilled, on_rejected, Mode::Terminal)
    }

    /// Adapts settlement to an `(error, value)` callback.
    ///
    /// `cb` receives `(None, value)` on fulfillment and
    /// `(Some(reason), Undefined)` on rejection. An `Err` from `cb` is raised
    /// on the event loop.
    pub fn callback<F>(&self, cb: F) -> Future
    where
        F: Fn(Option<Value>, Value) -> Result<(), Value> + 'static,
    {
        let cb = Rc::new(cb);
        let on_error = cb.clone();
        self.done(
            Some(Function::new(move |value| {
                cb(None, value).map(|_| Value::Undefined)
            })),
            Some(Function::new(move |reason| {
                on_error(Some(reason), Value::Undefined).map(|_| Value::Undefined)
            })),
        )
    }

    /// Like [`callback`](Future::callback), but an array result is spread
    /// into the argument list.
    pub fn callback_all<F>(&self, cb: F) -> Future
    where
        F: Fn(Option<Value>, Vec<Value>) -> Result<(), Value> + 'static,
    {
        let cb = Rc::new(cb);
        let on_error = cb.clone();
        self.done(
            Some(Function::new(move |value| {
                let args = match value {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                cb(None, args).map(|_| Value::Undefined)
            })),
            Some(Function::new(move |reason| {
                on_error(Some(reason), Vec::new()).map(|_| Value::Undefined)
            })),
        )
    }

    /// Registers a one-shot observer receiving the outcome.
    ///
    /// Observing wakes a dormant future and counts as handling a rejection.
    /// The observer never runs in the turn that registers it.
    pub fn observe<F>(&self, f: F)
    where
        F: FnOnce(Result<Value, Value>) + 'static,
    {
        self.exec();
        let (state, value) = self.snapshot();
        match state {
            FutureState::Dormant | FutureState::Pending => {
                self.inner
                    .borrow_mut()
                    .reactions
                    .push(Reaction::Observe(Box::new(f)));
            }
            FutureState::Fulfilled => self.handle.defer(move || f(Ok(value))),
            FutureState::Rejected => {
                self.mark_handled();
                self.handle.defer(move || f(Err(value)));
            }
        }
    }

    /// Current state.
    pub fn state(&self) -> FutureState {
        self.inner.borrow().state
    }

    /// Lowercase state name: `dormant`, `pending`, `fulfilled` or
    /// `rejected`.
    pub fn status(&self) -> &'static str {
        self.state().as_str()
    }

    /// Returns true once fulfilled or rejected.
    pub fn is_settled(&self) -> bool {
        self.state().is_settled()
    }

    /// The settlement payload, if settled.
    pub fn value(&self) -> Option<Value> {
        let inner = self.inner.borrow();
        inner.state.is_settled().then(|| inner.value.clone())
    }

    /// Debug string such as `Future { <FULFILLED> 42 }`.
    pub fn inspect(&self) -> String {
        let inner = self.inner.borrow();
        match inner.state {
            FutureState::Dormant => "Future { <DORMANT> }".to_string(),
            FutureState::Pending => "Future { <PENDING> }".to_string(),
            FutureState::Fulfilled => format!("Future {{ <FULFILLED> {} }}", inner.value),
            FutureState::Rejected => format!("Future {{ <REJECTED> {} }}", inner.value),
        }
    }

    /// Returns true if both handles point to the same future.
    pub fn ptr_eq(&self, other: &Future) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Suppresses the unhandled-rejection report for this future.
    pub(crate) fn mark_handled(&self) {
        self.inner.borrow_mut().rejection = RejectionTracking::Handled;
    }

    fn snapshot(&self) -> (FutureState, Value) {
        let inner = self.inner.borrow();
        (inner.state, inner.value.clone())
    }

    fn settle(&self, state: FutureState, value: Value) {
        let reactions = {
            let mut inner = self.inner.borrow_mut();
            inner.state = state;
            inner.value = value.clone();
            inner.executor = None;
            std::mem::take(&mut inner.reactions)
        };

        if state == FutureState::Rejected && reactions.is_empty() {
            self.track_rejection();
            return;
        }

        if reactions.is_empty() {
            return;
        }

        let fulfilled = state == FutureState::Fulfilled;
        let future = self.clone();
        self.handle.run_settlement(move || {
            for reaction in reactions {
                future.dispatch(reaction, fulfilled, value.clone());
            }
        });
    }

    fn track_rejection(&self) {
        if !self.handle.warn_unhandled_rejection() {
            return;
        }
        {
            let mut inner = self.inner.borrow_mut();
            if inner.rejection == RejectionTracking::Handled {
                return;
            }
            inner.rejection = RejectionTracking::Unobserved;
        }

        let future = self.clone();
        self.handle.defer(move || {
            let (tracking, reason) = {
                let inner = future.inner.borrow();
                (inner.rejection, inner.value.clone())
            };
            if tracking == RejectionTracking::Unobserved {
                future.handle.report_unhandled(&reason);
            }
        });
    }

    fn dispatch(&self, reaction: Reaction, fulfilled: bool, value: Value) {
        let (downstream, on_fulfilled, on_rejected, terminal) = match reaction {
            Reaction::Observe(observer) => {
                observer(if fulfilled { Ok(value) } else { Err(value) });
                return;
            }
            Reaction::Chain {
                downstream,
                on_fulfilled,
                on_rejected,
                terminal,
            } => (downstream, on_fulfilled, on_rejected, terminal),
        };

        let handler = if fulfilled { on_fulfilled } else { on_rejected };
        match (handler, downstream) {
            (Some(handler), Some(downstream)) => match handler.call(value) {
                Ok(result) => downstream.resolve(result),
                Err(reason) => downstream.reject(reason),
            },
            (None, Some(downstream)) => {
                if fulfilled {
                    downstream.resolve(value);
                } else {
                    downstream.reject(value);
                }
            }
            (Some(handler), None) => {
                let result = handler.call(value);
                if let (true, Err(reason)) = (terminal, result) {
                    self.handle.raise(reason);
                }
            }
            (None, None) => {
                if terminal && !fulfilled {
                    self.handle.raise(value);
                }
            }
        }
    }

    fn register(
        &self,
        on_fulfilled: Option<Function>,
        on_rejected: Option<Function>,
        mode: Mode,
    ) -> Future {
        if on_fulfilled.is_some() {
            self.exec();
        }

        let downstream = match mode {
            Mode::Chain => Some(Self::pending_on(&self.handle)),
            Mode::Tap | Mode::Terminal => None,
        };
        let returned = downstream.clone().unwrap_or_else(|| self.clone());
        let terminal = mode == Mode::Terminal;

        let (state, value) = self.snapshot();
        match state {
            FutureState::Dormant | FutureState::Pending => {
                self.inner.borrow_mut().reactions.push(Reaction::Chain {
                    downstream,
                    on_fulfilled,
                    on_rejected,
                    terminal,
                });
                returned
            }
            FutureState::Fulfilled => {
                if on_fulfilled.is_none() {
                    return self.clone();
                }
                self.schedule(
                    Reaction::Chain {
                        downstream,
                        on_fulfilled,
                        on_rejected: None,
                        terminal,
                    },
                    true,
                    value,
                );
                returned
            }
            FutureState::Rejected => {
                if on_rejected.is_none() && !terminal {
                    return self.clone();
                }
                self.mark_handled();
                self.schedule(
                    Reaction::Chain {
                        downstream,
                        on_fulfilled: None,
                        on_rejected,
                        terminal,
                    },
                    false,
                    value,
                );
                returned
            }
        }
    }

    fn schedule(&self, reaction: Reaction, fulfilled: bool, value: Value) {
        let future = self.clone();
        self.handle
            .defer(move || future.dispatch(reaction, fulfilled, value));
    }
}

/// Runs `done` after the timers in `steps` fire one after another.
fn chain_timers(handle: LoopHandle, mut steps: Vec<Duration>, done: Box<dyn FnOnce()>) {
    match steps.pop() {
        Some(step) => {
            let next = handle.clone();
            handle.set_timeout(step, move || chain_timers(next, steps, done));
        }
        None => done(),
    }
}

impl Thenable for Future {
    fn subscribe(&self, on_fulfilled: SettleFn, on_rejected: SettleFn) -> Result<(), Value> {
        self.observe(move |outcome| match outcome {
            Ok(value) => on_fulfilled(value),
            Err(reason) => on_rejected(reason),
        });
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl From<Future> for Value {
    fn from(future: Future) -> Self {
        Value::Thenable(Rc::new(future))
    }
}

impl fmt::Debug for Future {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inspect())
    }
}
