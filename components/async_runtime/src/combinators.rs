//! Combinators over collections of values and futures.
//!
//! Every element is first wrapped with [`Future::resolved`], so plain values
//! behave like already fulfilled futures. When an iterator is given, it is
//! chained on each element before aggregation and is never called once the
//! aggregate has settled.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use core_types::{JsError, Value};

use crate::event_loop::{EventLoop, LoopHandle};
use crate::future::{Function, Future};

type Iteratee = Rc<dyn Fn(Value, usize) -> Result<Value, Value>>;
type Step = Rc<dyn Fn(Value, Value, usize) -> Result<Value, Value>>;

/// Shared bookkeeping of one aggregate future.
struct Aggregate {
    target: Future,
    settled: Cell<bool>,
    remaining: Cell<usize>,
    slots: RefCell<Vec<Value>>,
    kept: RefCell<Vec<bool>>,
}

impl Aggregate {
    fn new(target: Future, len: usize) -> Rc<Self> {
        Rc::new(Self {
            target,
            settled: Cell::new(false),
            remaining: Cell::new(len),
            slots: RefCell::new(vec![Value::Undefined; len]),
            kept: RefCell::new(vec![true; len]),
        })
    }

    /// Stores a slot; returns true when it was the last one outstanding.
    fn fill(&self, index: usize, value: Value) -> bool {
        self.slots.borrow_mut()[index] = value;
        let remaining = self.remaining.get() - 1;
        self.remaining.set(remaining);
        remaining == 0
    }

    fn take_slots(&self) -> Vec<Value> {
        std::mem::take(&mut *self.slots.borrow_mut())
    }

    fn resolve(&self, value: Value) {
        self.settled.set(true);
        self.target.resolve(value);
    }

    fn reject(&self, reason: Value) {
        self.settled.set(true);
        self.target.reject(reason);
    }
}

/// Wraps `value` and chains the iterator, skipping it once `state` settled.
fn element(
    handle: &LoopHandle,
    value: Value,
    index: usize,
    iterator: Option<&Iteratee>,
    state: &Rc<Aggregate>,
) -> Future {
    let future = Future::resolved_on(handle, value);
    match iterator {
        None => future,
        Some(iterator) => {
            let iterator = iterator.clone();
            let state = state.clone();
            future.and_then(move |value| {
                if state.settled.get() {
                    return Ok(Value::Undefined);
                }
                iterator(value, index)
            })
        }
    }
}

fn callback<F>(f: F) -> Option<Function>
where
    F: Fn(Value) + 'static,
{
    Some(Function::new(move |value| {
        f(value);
        Ok(Value::Undefined)
    }))
}

impl Future {
    /// Fulfills with every element's value, in input order, or rejects with
    /// the first failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use async_runtime::{ClockMode, EventLoop, Future, RuntimeConfig};
    /// use core_types::Value;
    ///
    /// let el = EventLoop::with_config(RuntimeConfig::default().with_clock(ClockMode::Virtual));
    /// let all = Future::all(&el, vec![
    ///     Future::resolve_after(&el, Duration::from_millis(20), Value::from("a")).into(),
    ///     Value::from("b"),
    /// ]);
    /// assert_eq!(
    ///     el.block_on(&all).unwrap(),
    ///     Value::Array(vec![Value::from("a"), Value::from("b")])
    /// );
    /// ```
    pub fn all<I>(event_loop: &EventLoop, values: I) -> Future
    where
        I: IntoIterator<Item = Value>,
    {
        Self::gather(event_loop, values, None)
    }

    /// Like [`all`](Future::all), with `iterator` applied to each value.
    pub fn map<I, F>(event_loop: &EventLoop, values: I, iterator: F) -> Future
    where
        I: IntoIterator<Item = Value>,
        F: Fn(Value, usize) -> Result<Value, Value> + 'static,
    {
        let iterator: Iteratee = Rc::new(iterator);
        Self::gather(event_loop, values, Some(iterator))
    }

    /// Alias of [`map`](Future::map).
    pub fn every<I, F>(event_loop: &EventLoop, values: I, iterator: F) -> Future
    where
        I: IntoIterator<Item = Value>,
        F: Fn(Value, usize) -> Result<Value, Value> + 'static,
    {
        Self::map(event_loop, values, iterator)
    }

    fn gather<I>(event_loop: &EventLoop, values: I, iterator: Option<Iteratee>) -> Future
    where
        I: IntoIterator<Item = Value>,
    {
        let handle = event_loop.handle();
        let items: Vec<Value> = values.into_iter().collect();
        let target = Future::pending(event_loop);
        if items.is_empty() {
            target.resolve(Value::Array(Vec::new()));
            return target;
        }

        let state = Aggregate::new(target.clone(), items.len());
        for (index, value) in items.into_iter().enumerate() {
            if state.settled.get() {
                break;
            }
            let on_value = state.clone();
            let on_error = state.clone();
            element(&handle, value, index, iterator.as_ref(), &state).then(
                callback(move |value| {
                    if !on_value.settled.get() && on_value.fill(index, value) {
                        on_value.resolve(Value::Array(on_value.take_slots()));
                    }
                }),
                callback(move |reason| {
                    if !on_error.settled.get() {
                        on_error.reject(reason);
                    }
                }),
            );
        }
        target
    }

    /// Fulfills with the first value to succeed, or rejects with the array
    /// of every failure reason, in input order.
    ///
    /// An empty input rejects with a `RangeError`.
    pub fn any<I>(event_loop: &EventLoop, values: I) -> Future
    where
        I: IntoIterator<Item = Value>,
    {
        Self::first_success(event_loop, values, None)
    }

    /// Like [`any`](Future::any), with `iterator` applied to each value.
    pub fn some<I, F>(event_loop: &EventLoop, values: I, iterator: F) -> Future
    where
        I: IntoIterator<Item = Value>,
        F: Fn(Value, usize) -> Result<Value, Value> + 'static,
    {
        let iterator: Iteratee = Rc::new(iterator);
        Self::first_success(event_loop, values, Some(iterator))
    }

    fn first_success<I>(event_loop: &EventLoop, values: I, iterator: Option<Iteratee>) -> Future
    where
        I: IntoIterator<Item = Value>,
    {
        let handle = event_loop.handle();
        let items: Vec<Value> = values.into_iter().collect();
        let target = Future::pending(event_loop);
        if items.is_empty() {
            target.reject(JsError::range_error("Future::any(): empty array").into());
            return target;
        }

        let state = Aggregate::new(target.clone(), items.len());
        for (index, value) in items.into_iter().enumerate() {
            if state.settled.get() {
                break;
            }
            let on_value = state.clone();
            let on_error = state.clone();
            element(&handle, value, index, iterator.as_ref(), &state).then(
                callback(move |value| {
                    if !on_value.settled.get() {
                        on_value.resolve(value);
                    }
                }),
                callback(move |reason| {
                    if !on_error.settled.get() && on_error.fill(index, reason) {
                        on_error.reject(Value::Array(on_error.take_slots()));
                    }
                }),
            );
        }
        target
    }

    /// Keeps the values whose iterator result is truthy, in input order.
    ///
    /// Any element or iterator failure rejects the whole aggregate.
    ///
    /// # Examples
    ///
    /// ```
    /// use async_runtime::{EventLoop, Future};
    /// use core_types::Value;
    ///
    /// let el = EventLoop::new();
    /// let small = Future::filter(&el, [1, 7, 3].map(Value::Smi), |v, _| {
    ///     Ok(Value::Boolean(v.as_number().unwrap_or(0.0) < 5.0))
    /// });
    /// assert_eq!(
    ///     el.block_on(&small).unwrap(),
    ///     Value::Array(vec![Value::Smi(1), Value::Smi(3)])
    /// );
    /// ```
    pub fn filter<I, F>(event_loop: &EventLoop, values: I, iterator: F) -> Future
    where
        I: IntoIterator<Item = Value>,
        F: Fn(Value, usize) -> Result<Value, Value> + 'static,
    {
        let handle = event_loop.handle();
        let items: Vec<Value> = values.into_iter().collect();
        let target = Future::pending(event_loop);
        if items.is_empty() {
            target.resolve(Value::Array(Vec::new()));
            return target;
        }

        let state = Aggregate::new(target.clone(), items.len());
        let iterator: Iteratee = Rc::new(iterator);
        for (index, value) in items.into_iter().enumerate() {
            if state.settled.get() {
                break;
            }
            let recorder = state.clone();
            let iterator = iterator.clone();
            let predicate = Future::resolved_on(&handle, value).and_then(move |value| {
                if recorder.settled.get() {
                    return Ok(Value::Undefined);
                }
                recorder.slots.borrow_mut()[index] = value.clone();
                iterator(value, index)
            });

            let on_value = state.clone();
            let on_error = state.clone();
            predicate.then(
                callback(move |verdict| {
                    if on_value.settled.get() {
                        return;
                    }
                    if !verdict.is_truthy() {
                        on_value.kept.borrow_mut()[index] = false;
                    }
                    let remaining = on_value.remaining.get() - 1;
                    on_value.remaining.set(remaining);
                    if remaining == 0 {
                        let kept = std::mem::take(&mut *on_value.kept.borrow_mut());
                        let values = on_value
                            .take_slots()
                            .into_iter()
                            .zip(kept)
                            .filter_map(|(value, keep)| keep.then_some(value))
                            .collect();
                        on_value.resolve(Value::Array(values));
                    }
                }),
                callback(move |reason| {
                    if !on_error.settled.get() {
                        on_error.reject(reason);
                    }
                }),
            );
        }
        target
    }

    /// Runs `iterator` on each value strictly in series.
    ///
    /// The next element is only awaited once the previous iterator result
    /// has settled. Fulfills with the last iterator result, or rejects with
    /// the first failure.
    pub fn for_each<I, F>(event_loop: &EventLoop, values: I, iterator: F) -> Future
    where
        I: IntoIterator<Item = Value>,
        F: Fn(Value, usize) -> Result<Value, Value> + 'static,
    {
        let step: Step = Rc::new(move |_: Value, value: Value, index: usize| iterator(value, index));
        Self::series(event_loop, values, step, Value::Undefined)
    }

    /// Folds the values in series, starting from `initial`.
    ///
    /// # Examples
    ///
    /// ```
    /// use async_runtime::{EventLoop, Future};
    /// use core_types::Value;
    ///
    /// let el = EventLoop::new();
    /// let sum = Future::reduce(
    ///     &el,
    ///     [1, 2, 3].map(Value::Smi),
    ///     |acc, v, _| Ok(Value::Double(acc.as_number().unwrap_or(0.0) + v.as_number().unwrap_or(0.0))),
    ///     Value::Smi(0),
    /// );
    /// assert_eq!(el.block_on(&sum).unwrap(), Value::Double(6.0));
    /// ```
    pub fn reduce<I, F>(event_loop: &EventLoop, values: I, iterator: F, initial: Value) -> Future
    where
        I: IntoIterator<Item = Value>,
        F: Fn(Value, Value, usize) -> Result<Value, Value> + 'static,
    {
        let step: Step = Rc::new(iterator);
        Self::series(event_loop, values, step, initial)
    }

    fn series<I>(event_loop: &EventLoop, values: I, step: Step, initial: Value) -> Future
    where
        I: IntoIterator<Item = Value>,
    {
        let handle = event_loop.handle();
        let items: Vec<Value> = values.into_iter().collect();

        // Elements not visited yet must not be reported as unhandled
        if handle.warn_unhandled_rejection() {
            for future in items
                .iter()
                .filter_map(|value| value.as_thenable())
                .filter_map(|thenable| thenable.as_any().downcast_ref::<Future>())
            {
                future.mark_handled();
            }
        }

        let target = Future::pending(event_loop);
        let series = Rc::new(Series {
            target: target.clone(),
            handle: handle.clone(),
            items: RefCell::new(items.into_iter()),
            index: Cell::new(0),
            step,
        });
        series.wait(Future::resolved_on(&handle, initial));
        target
    }

    /// Maps every entry of an object, keeping its key.
    ///
    /// `iterator` receives each settled value with its key. Rejects with the
    /// first failure.
    pub fn map_object<I, F>(event_loop: &EventLoop, entries: I, iterator: F) -> Future
    where
        I: IntoIterator<Item = (String, Value)>,
        F: Fn(Value, &str) -> Result<Value, Value> + 'static,
    {
        let (keys, values): (Vec<String>, Vec<Value>) = entries.into_iter().unzip();
        let keys = Rc::new(keys);
        let key_of = keys.clone();
        let mapped = Self::map(event_loop, values, move |value, index| {
            iterator(value, &key_of[index])
        });

        mapped.and_then(move |values| {
            let object: BTreeMap<String, Value> = keys
                .iter()
                .cloned()
                .zip(values.as_array().unwrap_or_default().iter().cloned())
                .collect();
            Ok(Value::Object(object))
        })
    }

    /// Settles like the first element to settle, success or failure.
    ///
    /// An empty input never settles. Prefer [`any`](Future::any) when a
    /// single failure should not win.
    pub fn race<I>(event_loop: &EventLoop, values: I) -> Future
    where
        I: IntoIterator<Item = Value>,
    {
        let handle = event_loop.handle();
        let target = Future::pending(event_loop);
        for value in values {
            let winner = target.clone();
            Future::resolved_on(&handle, value).observe(move |outcome| match outcome {
                Ok(value) => winner.resolve(value),
                Err(reason) => winner.reject(reason),
            });
        }
        target
    }

    /// Settles like `future`, or rejects with a `TimeoutError` if `delay`
    /// elapses first.
    pub fn time_limit(event_loop: &EventLoop, delay: Duration, future: &Future) -> Future {
        let target = Future::pending(event_loop);
        let expired = target.clone();
        let timer = event_loop.set_timeout(delay, move || {
            expired.reject(JsError::timeout("Timeout").into());
        });

        let handle = event_loop.handle();
        let settled = target.clone();
        future.observe(move |outcome| {
            if let Some(event_loop) = handle.upgrade() {
                event_loop.clear_timeout(timer);
            }
            match outcome {
                Ok(value) => settled.resolve(value),
                Err(reason) => settled.reject(reason),
            }
        });
        target
    }
}

/// State of a serial walk for `for_each`/`reduce`.
struct Series {
    target: Future,
    handle: LoopHandle,
    items: RefCell<std::vec::IntoIter<Value>>,
    index: Cell<usize>,
    step: Step,
}

impl Series {
    fn wait(self: &Rc<Self>, last: Future) {
        let on_value = self.clone();
        let on_error = self.clone();
        last.then(
            callback(move |accumulator| on_value.advance(accumulator)),
            callback(move |reason| on_error.fail(reason)),
        );
    }

    fn advance(self: &Rc<Self>, accumulator: Value) {
        let next = self.items.borrow_mut().next();
        let Some(value) = next else {
            self.target.resolve(accumulator);
            return;
        };

        let index = self.index.get();
        self.index.set(index + 1);
        let step = self.step.clone();
        let last = Future::resolved_on(&self.handle, value)
            .and_then(move |value| step(accumulator.clone(), value, index));
        self.wait(last);
    }

    fn fail(&self, reason: Value) {
        self.target.reject(reason);

        // Drain what is left so its rejections count as observed
        let rest: Vec<Value> = self.items.borrow_mut().by_ref().collect();
        for thenable in rest.iter().filter_map(|value| value.as_thenable()) {
            let _ = thenable.subscribe(Box::new(|_| {}), Box::new(|_| {}));
        }
    }
}
