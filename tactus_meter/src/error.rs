// Error surface of the fitting engine.
//
// Two categories, both caller errors surfaced synchronously with the
// offending value: configuration errors (bad session parameters) and
// input errors (observed data violating the offset-counter invariant).
// StepLimitExceeded is the optional runtime budget guard. Nothing here is
// transient or retriable; the engine does no I/O.
//
// A negative-weight input error does not exist: counts are unsigned by
// construction (see tactus_duration::OffsetCounter).

use tactus_duration::Offset;
use thiserror::Error;

/// Errors raised by session construction and fitting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FitError {
    /// The candidate meter set is empty: without a kernel the selection
    /// cursor could never advance.
    #[error("no candidate meters were supplied")]
    NoCandidateMeters,

    /// `maximum_run_length` must be a positive integer when present.
    #[error("maximum run length must be a positive integer, got {0}")]
    InvalidRunLength(usize),

    /// The kernel resampling grid is zero or beyond the supported bound.
    #[error(
        "kernel denominator must be between 1 and {max}, got {found}",
        max = crate::session::MAX_KERNEL_DENOMINATOR
    )]
    InvalidKernelDenominator { found: u32 },

    /// The offset counter contains an offset before the start of the
    /// passage.
    #[error("offset counter contains negative offset {0}")]
    NegativeOffset(Offset),

    /// Fitting took more selection steps than the configured budget.
    #[error("fitting exceeded the configured step limit of {limit}")]
    StepLimitExceeded { limit: usize },
}
