use miette::Diagnostic;
use thiserror::Error;

/// Caller-contract failures. Problems in user configuration are never
/// surfaced here; those accumulate as [`peregrine_diagnostics::Diagnostic`]
/// values so sibling entities keep decoding.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error("unsupported decode target level: {0}")]
    #[diagnostic(code(flightplan::invalid_decode_target))]
    InvalidDecodeTarget(&'static str),

    #[error("invalid scenario filter token `{token}`: {reason}")]
    #[diagnostic(code(flightplan::invalid_filter_token))]
    InvalidFilterToken { token: String, reason: String },

    #[error("io error: {0}")]
    #[diagnostic(code(flightplan::io_error))]
    Io(#[from] std::io::Error),
}
