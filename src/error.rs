//! Error types for the masking orchestrator
//!
//! Provides structured error types for all components: job execution,
//! topology resolution, masking orchestration, tiering and rollback.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Remote Object Errors
    // =========================================================================
    /// Fatal form of "not found": an attach path assumed the object existed.
    /// Read-only lookups never raise this; they return an absent result.
    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    // =========================================================================
    // Job Errors
    // =========================================================================
    /// The array reported an explicit failure; code and description are
    /// surfaced verbatim.
    #[error("Job {job_id} failed: code {code} - {description}")]
    JobFailed {
        job_id: String,
        code: u32,
        description: String,
    },

    /// Polling exhausted without a terminal state. The array-side job may
    /// still be running; callers must not assume it was undone.
    #[error("Job {job_id} did not complete within {polls} polls ({elapsed:?})")]
    JobTimeout {
        job_id: String,
        polls: u32,
        elapsed: Duration,
    },

    // =========================================================================
    // Masking Errors
    // =========================================================================
    #[error("Attach of volume {volume} to host {host} failed: {reason}")]
    PartialAttach {
        volume: String,
        host: String,
        reason: String,
    },

    #[error("Detach of volume {volume} failed: {reason}")]
    DetachFailed { volume: String, reason: String },

    #[error("Device number not visible for volume {volume} after masking")]
    DeviceNumberMissing { volume: String },

    // =========================================================================
    // Tiering Errors
    // =========================================================================
    #[error("Tier bind failed for volume {volume} (class {class}): {reason}")]
    TierBindFailed {
        volume: String,
        class: String,
        reason: String,
    },

    // =========================================================================
    // Array Errors
    // =========================================================================
    #[error("Array operation failed: {operation}: {reason}")]
    ArrayOperationFailed { operation: String, reason: String },

    #[error("Invalid instance property: {property} on {kind}: {reason}")]
    InvalidProperty {
        kind: String,
        property: String,
        reason: String,
    },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Action to take on error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry with exponential backoff
    RetryWithBackoff,
    /// Retry after a specific duration
    RetryAfter(Duration),
    /// Don't retry, operator intervention required
    NoRetry,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Shared masking constructs mutate under us; a re-driven attach
            // or detach re-resolves everything and may simply succeed.
            Error::ResourceNotFound { .. }
            | Error::ResourceExists { .. }
            | Error::PartialAttach { .. }
            | Error::DetachFailed { .. } => ErrorAction::RetryWithBackoff,

            // The array-side job may still be running; give it room.
            Error::JobTimeout { .. } => ErrorAction::RetryAfter(Duration::from_secs(300)),

            // Explicit array failures need a fresh operation, not a blind retry.
            Error::JobFailed { .. }
            | Error::ArrayOperationFailed { .. }
            | Error::TierBindFailed { .. }
            | Error::DeviceNumberMissing { .. } => ErrorAction::RetryAfter(Duration::from_secs(60)),

            // Configuration/validation errors - don't retry automatically
            Error::Configuration(_) | Error::InvalidProperty { .. } | Error::JsonParse(_) => {
                ErrorAction::NoRetry
            }

            _ => ErrorAction::RetryWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRetry)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ResourceNotFound { .. }
                | Error::ResourceExists { .. }
                | Error::PartialAttach { .. }
                | Error::DetachFailed { .. }
        )
    }
}

/// Result type alias for the orchestrator
pub type Result<T> = std::result::Result<T, Error>;
