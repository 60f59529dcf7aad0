//! Error types for the trade pipeline

use thiserror::Error;

/// Pipeline-specific error types
///
/// Rejection reasons surfaced to submitters come from the `Display`
/// implementations here, so callers and audit records always agree on
/// the wording.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Structural validation rule violated
    #[error("validation failed: {reason}")]
    Validation {
        /// The rule the record violated
        reason: String,
    },

    /// Intake buffer full; the submission never entered the pipeline
    #[error("system at capacity")]
    CapacityExceeded,

    /// Circuit breaker is rejecting new work until the reset timeout elapses
    #[error("circuit breaker open")]
    AdmissionDenied,

    /// A stage transformation failed and was caught at the stage boundary
    #[error("processing fault in {stage}: {message}")]
    ProcessingFault {
        /// Stage where the fault surfaced
        stage: String,
        /// Fault description
        message: String,
    },

    /// Pipeline is no longer accepting submissions
    #[error("pipeline shut down")]
    Shutdown,
}

/// Type alias for pipeline results
pub type PipelineResult<T> = Result<T, PipelineError>;
