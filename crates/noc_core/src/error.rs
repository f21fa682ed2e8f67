use serde::{Deserialize, Serialize};
use std::fmt;

/// Single structured error shape used across backend layers.
///
/// Codes are namespaced by failure class:
/// - `VALIDATION_*`: the input was rejected before any store access.
/// - `DB_*`: the store failed (unreachable, constraint violation, timeout).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    /// Store-level failure. Marked retryable; retry policy belongs to the caller.
    pub fn persistence(
        code: impl Into<String>,
        message: impl Into<String>,
        err: &rusqlite::Error,
    ) -> Self {
        Self::new(code, message)
            .with_details(err.to_string())
            .with_retryable(true)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn is_validation(&self) -> bool {
        self.code.starts_with("VALIDATION_")
    }

    pub fn is_persistence(&self) -> bool {
        self.code.starts_with("DB_")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}
