use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;

use crate::utils::elapsed_ms;

/// Launch failure / guard rejection / unknown outcome.
pub const STATUS_FAILURE: i32 = -1;
/// Stopped through the toggle lifecycle.
pub const STATUS_CANCELLED: i32 = 130;

/// Outcome of one invocation. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub success: bool,
    pub status: i32,
    pub execution_time_ms: u64,
    /// Parameters captured from the response (REST only).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub captured: BTreeMap<String, String>,
}

impl CommandResult {
    pub fn new(success: bool, status: i32, execution_time_ms: u64) -> Self {
        Self {
            success,
            status,
            execution_time_ms,
            captured: BTreeMap::new(),
        }
    }

    /// Success iff `status == 0`.
    pub fn from_exit(status: i32, started: Instant) -> Self {
        Self::new(status == 0, status, elapsed_ms(started))
    }

    pub fn ok(started: Instant) -> Self {
        Self::new(true, 0, elapsed_ms(started))
    }

    pub fn failure(started: Instant) -> Self {
        Self::new(false, STATUS_FAILURE, elapsed_ms(started))
    }

    /// Immediate rejection (guard taken, nothing to stop, dispatch error).
    pub fn rejected() -> Self {
        Self::new(false, STATUS_FAILURE, 0)
    }

    pub fn cancelled(started: Instant) -> Self {
        Self::new(false, STATUS_CANCELLED, elapsed_ms(started))
    }

    pub fn with_captured(mut self, captured: BTreeMap<String, String>) -> Self {
        self.captured = captured;
        self
    }
}
