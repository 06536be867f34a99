//! Core value types shared by the runtime crates.
//!
//! This crate provides the payload model for futures: a dynamically typed
//! value, a structured error, and the thenable capability used to recognise
//! anything that can be chained.
//!
//! # Overview
//!
//! - [`Value`] - Dynamic representation of settlement payloads
//! - [`JsError`] - Errors with a kind and message
//! - [`ErrorKind`] - Types of errors produced by the runtime
//! - [`Thenable`] - Capability of exposing a continuation-registration operation
//!
//! # Examples
//!
//! ```
//! use core_types::{ErrorKind, JsError, Value};
//!
//! let num = Value::Smi(42);
//! assert!(num.is_truthy());
//! assert_eq!(num.type_of(), "number");
//!
//! let reason = Value::from(JsError::new(ErrorKind::RangeError, "empty array"));
//! assert_eq!(reason.to_string(), "RangeError: empty array");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod thenable;
mod value;

pub use error::{ErrorKind, JsError};
pub use thenable::{SettleFn, Thenable};
pub use value::Value;
