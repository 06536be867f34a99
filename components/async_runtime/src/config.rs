//! Runtime configuration.
//!
//! A [`RuntimeConfig`] is fixed when an [`EventLoop`](crate::EventLoop) is
//! built and read by every future bound to that loop.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which clock drives the timer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    /// Wall-clock time; the loop sleeps until the next timer is due.
    #[default]
    System,
    /// Virtual time; the loop jumps straight to the next timer deadline.
    Virtual,
}

/// Settings shared by an event loop and its futures.
///
/// # Examples
///
/// ```
/// use async_runtime::{ClockMode, RuntimeConfig};
///
/// let config = RuntimeConfig::from_json(r#"{ "warn_unhandled_rejection": false }"#).unwrap();
/// assert!(!config.warn_unhandled_rejection);
/// assert_eq!(config.clock, ClockMode::System);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Report rejections nobody observed by the end of the current turn.
    pub warn_unhandled_rejection: bool,
    /// Clock used for timers.
    pub clock: ClockMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            warn_unhandled_rejection: true,
            clock: ClockMode::System,
        }
    }
}

impl RuntimeConfig {
    /// Parses a configuration document. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Returns the configuration with unhandled-rejection warnings toggled.
    pub fn with_warn_unhandled_rejection(mut self, warn: bool) -> Self {
        self.warn_unhandled_rejection = warn;
        self
    }

    /// Returns the configuration with the given clock mode.
    pub fn with_clock(mut self, clock: ClockMode) -> Self {
        self.clock = clock;
        self
    }
}
