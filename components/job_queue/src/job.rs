//! Jobs and their lifecycle.

use std::fmt;

use core_types::Value;
use serde::{Deserialize, Serialize};

/// Identifier of a job within a [`Queue`](crate::Queue).
///
/// Dependencies refer to other jobs by id, not by reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Creates an id from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Job state.
///
/// State transitions:
/// - Pending -> Running -> Done
/// - Pending -> Running -> Errored
///
/// A job never re-enters Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for its dependencies or for a free slot.
    Pending,
    /// Handed to the runner, not finished yet.
    Running,
    /// The runner succeeded.
    Done,
    /// The runner failed; see [`Job::error`].
    Errored,
}

impl JobState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Errored)
    }
}

/// One unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Unique key.
    pub id: JobId,
    /// Jobs that must be done before this one starts; `None` means none.
    pub dependencies: Option<Vec<JobId>>,
    /// Payload handed to the runner.
    pub data: Value,
    /// Failure reason, set once the runner failed.
    pub error: Option<Value>,
}

impl Job {
    pub(crate) fn new(id: JobId, data: Value, dependencies: Option<Vec<JobId>>) -> Self {
        Self {
            id,
            dependencies,
            data,
            error: None,
        }
    }

    /// Returns true when every dependency satisfies `is_done`.
    pub(crate) fn is_unblocked<F>(&self, is_done: F) -> bool
    where
        F: Fn(&JobId) -> bool,
    {
        self.dependencies
            .as_ref()
            .map_or(true, |dependencies| dependencies.iter().all(is_done))
    }
}
