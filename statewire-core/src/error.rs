//! Core error types.

use thiserror::Error;

/// Errors from the automaton core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not configured: {reason}")]
    NotConfigured { reason: String },

    #[error("automaton not started")]
    NotStarted,

    #[error("automaton already started")]
    AlreadyStarted,

    #[error("state not found: {state}")]
    StateNotFound { state: String },

    #[error("immediate transition cycle: state '{state}' entered twice")]
    CycleDetected { state: String },

    #[error("invalid machine definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("guard '{guard}' failed: {reason}")]
    GuardFailed { guard: String, reason: String },

    #[error("action '{action}' failed: {reason}")]
    ActionFailed { action: String, reason: String },

    #[error("unknown variable: {name}")]
    UnknownVariable { name: String },

    #[error("unknown output: {name}")]
    UnknownOutput { name: String },

    #[error("invalid delay: {reason}")]
    InvalidDelay { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns a stable code used as the prefix of `ERROR` reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::NotConfigured { .. } => "NOT_CONFIGURED",
            CoreError::NotStarted => "NOT_STARTED",
            CoreError::AlreadyStarted => "ALREADY_STARTED",
            CoreError::StateNotFound { .. } => "STATE_NOT_FOUND",
            CoreError::CycleDetected { .. } => "CYCLE_DETECTED",
            CoreError::InvalidDefinition { .. } => "INVALID_DEFINITION",
            CoreError::GuardFailed { .. } => "GUARD_ERROR",
            CoreError::ActionFailed { .. } => "ACTION_ERROR",
            CoreError::UnknownVariable { .. } => "UNKNOWN_VARIABLE",
            CoreError::UnknownOutput { .. } => "UNKNOWN_OUTPUT",
            CoreError::InvalidDelay { .. } => "INVALID_DELAY",
            CoreError::Json(_) => "INVALID_DEFINITION",
        }
    }

    /// Returns whether the automaton can keep running after this error.
    ///
    /// Graph errors abort the current operation but leave the automaton in
    /// its last stable state; only configuration errors prevent it from
    /// running at all.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CoreError::NotConfigured { .. }
                | CoreError::InvalidDefinition { .. }
                | CoreError::Json(_)
        )
    }

    /// Formats the error as the text of an `ERROR` status message.
    pub fn report(&self) -> String {
        format!("{}: {}", self.error_code(), self)
    }
}
