//! Errors surfaced by the event loop drivers.

use core_types::Value;
use thiserror::Error;

/// Errors returned by [`EventLoop`](crate::EventLoop) run methods.
///
/// Rejections normally flow through futures as values. These errors are the
/// only places where a failure leaves the future graph: terminal consumers
/// (`done`, `callback`) raising from a deferred turn, and `block_on`
/// reporting how the awaited future ended.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A terminal consumer raised a failure from a deferred turn.
    #[error("uncaught error in terminal handler: {0}")]
    Uncaught(Value),

    /// The future driven by `block_on` was rejected.
    #[error("future rejected: {0}")]
    Rejected(Value),

    /// `block_on` ran out of work before the future settled.
    #[error("event loop stalled: no task, microtask or timer can settle the future")]
    Stalled,
}

/// Errors produced while loading a [`RuntimeConfig`](crate::RuntimeConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document is not valid JSON for the expected shape.
    #[error("invalid runtime configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
