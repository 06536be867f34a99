//! Dependency-aware job queue.
//!
//! This crate provides:
//! - [`Queue`] - Runs jobs with a concurrency cap, admitting each job once
//!   all of its dependencies are done
//! - [`Job`], [`JobId`], [`JobState`] - Job records and lifecycle
//! - [`QueueCounts`] - Serializable per-state totals
//!
//! The queue is driven by an [`async_runtime::EventLoop`]; nothing runs until
//! the loop is driven.
//!
//! # Examples
//!
//! ```
//! use async_runtime::EventLoop;
//! use core_types::Value;
//! use job_queue::{JobState, Queue};
//!
//! let el = EventLoop::new();
//! let queue = Queue::with_default_concurrency(&el, |_| Ok(Value::Undefined));
//! queue.add("build", Value::Null, None);
//! queue.add("test", Value::Null, Some(vec!["build".into()]));
//!
//! el.run_until_done().unwrap();
//! assert_eq!(queue.state_of(&"test".into()), Some(JobState::Done));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod job;
pub mod queue;

pub use job::{Job, JobId, JobState};
pub use queue::{Queue, QueueCounts, DEFAULT_CONCURRENCY};
