//! Error taxonomy for the fabrics subsystem.

use thiserror::Error;

/// The errors the fabrics core can surface across its entire contract, from
/// network-primitive setup down to the C-style boundary.
#[derive(Error, Debug)]
pub enum FabricsError {
    /// Malformed input, an unknown provider, or a null handle.
    #[error("invalid argument: {reason}")]
    InvalidArg {
        /// Human readable explanation of what was invalid.
        reason: String,
    },

    /// Operation attempted on an uninitialised or already-closed handle.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// What state the caller expected versus what it found.
        reason: String,
    },

    /// No provider satisfied the requested capabilities.
    #[error("no fabric provider available: {reason}")]
    NoFabric {
        /// Why no candidate provider matched.
        reason: String,
    },

    /// A non-blocking path found no progress to report. Not an error: a
    /// signalling value. Callers must not log this at `warn` or above.
    #[error("not ready")]
    NotReady,

    /// A blocking wait expired before any progress was made.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A peer shutdown was observed while waiting.
    #[error("interrupted by peer shutdown")]
    Interrupted,

    /// `removeTarget` (or similar) referenced an unknown target.
    #[error("not found: {reason}")]
    NotFound {
        /// What was searched for.
        reason: String,
    },

    /// The thing being created already exists.
    #[error("already exists: {reason}")]
    Exists {
        /// What already existed.
        reason: String,
    },

    /// A caller-supplied buffer was too small to hold the result.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes actually supplied.
        available: usize,
    },

    /// An invariant the implementation relies on was violated.
    #[error("internal error: {reason}")]
    Internal {
        /// Description of the violated invariant.
        reason: String,
    },

    /// Catch-all for conditions that don't map to any of the above.
    #[error("unknown error: {reason}")]
    Unknown {
        /// Description of the failure.
        reason: String,
    },

    /// I/O failure from the underlying simulated fabric transport.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FabricsError {
    /// Shorthand for [`FabricsError::InvalidArg`].
    pub fn invalid_arg(reason: impl Into<String>) -> Self {
        Self::InvalidArg { reason: reason.into() }
    }

    /// Shorthand for [`FabricsError::InvalidState`].
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState { reason: reason.into() }
    }

    /// Shorthand for [`FabricsError::NoFabric`].
    pub fn no_fabric(reason: impl Into<String>) -> Self {
        Self::NoFabric { reason: reason.into() }
    }

    /// Shorthand for [`FabricsError::NotFound`].
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound { reason: reason.into() }
    }

    /// Shorthand for [`FabricsError::Exists`].
    pub fn exists(reason: impl Into<String>) -> Self {
        Self::Exists { reason: reason.into() }
    }

    /// Shorthand for [`FabricsError::Internal`].
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal { reason: reason.into() }
    }
}

/// Result type alias used throughout the fabrics core.
pub type Result<T> = std::result::Result<T, FabricsError>;
