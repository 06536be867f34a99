//! Error values carried through rejection channels.
//!
//! Rejections may carry any [`Value`](crate::Value); [`JsError`] is the
//! structured error used by the runtime itself (timeouts, empty inputs,
//! chaining cycles) and by callers that want a typed reason.

use std::fmt;

use thiserror::Error;

/// The kind of error.
///
/// These correspond to JavaScript's built-in error constructors that the
/// runtime produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Plain `Error`
    Error,
    /// Type error (e.g. a future resolved with itself)
    TypeError,
    /// Value out of allowed range (e.g. `any` over an empty input)
    RangeError,
    /// A time limit elapsed before the operation settled
    TimeoutError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::TimeoutError => "TimeoutError",
        };
        f.write_str(name)
    }
}

/// An error with a kind and a human-readable message.
///
/// # Examples
///
/// ```
/// use core_types::{JsError, ErrorKind};
///
/// let error = JsError::new(ErrorKind::TypeError, "undefined is not a function");
///
/// assert_eq!(error.message, "undefined is not a function");
/// assert_eq!(error.to_string(), "TypeError: undefined is not a function");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct JsError {
    /// The type of error
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
}

impl JsError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a plain `Error`.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Error, message)
    }

    /// Creates a `TypeError`.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    /// Creates a `RangeError`.
    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RangeError, message)
    }

    /// Creates a `TimeoutError`.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TimeoutError, message)
    }
}
