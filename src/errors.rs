//! Top-level error categories.
//!
//! Detailed messages are logged with `tracing` where a failure occurs; what
//! propagates upward is the category, so `main` can map it to an exit code
//! and the operator can grep the log for the full story.

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MigrateError {
    /// Bad or conflicting configuration: unmapped authors, malformed
    /// root-path change, invalid CLI values.
    Configuration,
    /// The target directory is not in the expected pristine state.
    Precondition,
    /// An internal invariant does not hold; either the analyzer or the
    /// history data is defective. Never recovered.
    Invariant,
    /// A change combines flags the model has not been validated against.
    /// Fatal so the operator inspects instead of the tool guessing.
    PoorlyUnderstood,
    /// A construct the tool knowingly does not support yet.
    NotImplemented,
    /// I/O against the history source or the object store failed after
    /// retries were exhausted.
    Io,
    /// The run was canceled.
    Canceled,
}

impl std::fmt::Display for MigrateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => f.write_str("configuration error"),
            Self::Precondition => f.write_str("precondition failure"),
            Self::Invariant => f.write_str("invariant violation"),
            Self::PoorlyUnderstood => {
                f.write_str("poorly understood change combination")
            }
            Self::NotImplemented => f.write_str("not implemented"),
            Self::Io => f.write_str("i/o failure"),
            Self::Canceled => f.write_str("canceled"),
        }
    }
}

impl std::error::Error for MigrateError {}
