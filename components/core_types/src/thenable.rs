//! The thenable capability.
//!
//! Anything that can report an eventual outcome through a pair of one-shot
//! callbacks is a thenable. Futures from the runtime implement it, and so can
//! foreign future types that need to interoperate with it.

use std::any::Any;

use crate::Value;

/// A one-shot callback receiving a settlement payload.
pub type SettleFn = Box<dyn FnOnce(Value)>;

/// A value exposing a continuation-registration operation.
///
/// Implementors must call at most one of the two callbacks, at most once.
/// Returning `Err` models a synchronous failure while attaching; the caller
/// treats the error as a rejection.
pub trait Thenable {
    /// Registers callbacks for fulfillment and rejection.
    fn subscribe(&self, on_fulfilled: SettleFn, on_rejected: SettleFn) -> Result<(), Value>;

    /// Returns `self` as [`Any`] so callers can recognise concrete types.
    fn as_any(&self) -> &dyn Any;
}
