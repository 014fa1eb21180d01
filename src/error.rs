use std::result;

use thiserror::Error;

/// A result type using this crate's [`Error`] by default.
pub type Result<T, E = Error> = result::Result<T, E>;

/// The error type used by the library.
///
/// Precondition violations on the hot data-structure path (out-of-range
/// bitmap accesses, inverted ranges, empty address sets) are treated as
/// programming errors and panic instead of surfacing here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed wire data was encountered. Input from an untrusted or
    /// buggy producer is never guessed at.
    #[error("protocol violation: {reason}")]
    ProtocolViolation {
        /// A description of what was malformed.
        reason: String,
    },
    /// No symbol source usable on the current platform was registered.
    #[error("there are no resolvers available")]
    NoResolverAvailable,
    /// A symbol source failed to produce raw facts.
    #[error("symbol source {name} failed: {reason}")]
    Source {
        /// The name of the failing source.
        name: String,
        /// The source's own description of the failure.
        reason: String,
    },
}

impl Error {
    /// Create a [`Error::ProtocolViolation`] with the given reason.
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }
}
