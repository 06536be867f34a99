//! Async runtime for futures.
//!
//! This crate provides:
//! - Event loop with task, microtask and timer queues
//! - A future state machine with dormant start, tap mode and
//!   unhandled-rejection tracking
//! - Combinators over collections of futures
//!
//! # Overview
//!
//! - [`EventLoop`] - Deferred-execution primitive and loop drivers
//! - [`Future`] - Single eventual outcome, chained with [`Future::then`]
//! - [`RuntimeConfig`] - Settings fixed when the loop is built
//! - [`DiagnosticSink`] - Receiver of unhandled-rejection reports
//!
//! Everything is single-threaded: futures and the loop use `Rc`, and
//! reactions attached to an already settled future always run on a later
//! microtask.
//!
//! # Examples
//!
//! ## Event Loop Usage
//!
//! ```
//! use async_runtime::{EventLoop, Task};
//!
//! let event_loop = EventLoop::new();
//! event_loop.enqueue_task(Task::new(|| Ok(())));
//! event_loop.run_until_done().unwrap();
//! ```
//!
//! ## Future Usage
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use async_runtime::{EventLoop, Future};
//! use core_types::Value;
//!
//! let event_loop = EventLoop::new();
//! let order = Rc::new(RefCell::new(Vec::new()));
//!
//! let log = order.clone();
//! Future::resolved(&event_loop, Value::Undefined).tap(move |_| {
//!     log.borrow_mut().push("then");
//!     Ok(Value::Undefined)
//! });
//! order.borrow_mut().push("sync");
//!
//! event_loop.run_until_done().unwrap();
//! assert_eq!(*order.borrow(), vec!["sync", "then"]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod combinators;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event_loop;
pub mod future;
pub mod task_queue;

// Re-export main types at crate root
pub use clock::{Clock, SystemClock, VirtualClock};
pub use config::{ClockMode, RuntimeConfig};
pub use diagnostics::{DiagnosticSink, MemorySink, TracingSink, UnhandledRejection};
pub use error::{ConfigError, RuntimeError};
pub use event_loop::{EventLoop, EventLoopBuilder};
pub use future::{Function, Future, FutureState, Resolver};
pub use task_queue::{MicroTask, MicrotaskQueue, Task, TaskQueue, TimerId, TimerQueue};
