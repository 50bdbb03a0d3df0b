// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Uniform status values for every fallible engine operation.
//!
//! The success union is split from the error union at the type level:
//! [`Outcome::Declined`] is a *non-error* signal ("capability invoked, callee
//! chose not to act") and can never be swallowed by `?`-propagation, while
//! [`EngineError`] carries the error kinds proper.

use thiserror::Error;

/// Non-error completion signal for engine operations.
///
/// `Declined` is reserved for a single meaning per call site:
/// - from an action: "please block this transaction";
/// - from a host callback: "too late / unwilling";
/// - from a control-channel command: "do not apply".
///
/// It must never be used as a generic error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Outcome {
    /// The operation completed and acted.
    Ok,
    /// The operation completed but the callee chose not to act.
    Declined,
}

impl Outcome {
    /// Returns `true` for [`Outcome::Declined`].
    pub const fn is_declined(self) -> bool {
        matches!(self, Self::Declined)
    }
}

/// Error kinds shared by every engine subsystem.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A lookup missed.
    #[error("not found: {0}")]
    NotFound(String),
    /// A registration collided with an already-present entry.
    #[error("already exists: {0}")]
    Exists(String),
    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    /// A resource allocation failed.
    #[error("allocation failed: {0}")]
    Alloc(String),
    /// A capability was used in a context it does not support.
    #[error("incompatible: {0}")]
    Incompat(String),
    /// An output buffer was too small for the produced data.
    #[error("output truncated")]
    Truncated,
    /// An operation exceeded its deadline.
    #[error("timed out")]
    Timeout,
    /// The operation would block; retry when ready.
    #[error("try again")]
    Again,
    /// A value failed validation.
    #[error("bad value: {0}")]
    BadValue(String),
    /// Unclassified I/O or system error.
    #[error("error: {0}")]
    Other(String),
}

impl EngineError {
    /// Stable symbolic name for this error kind, used verbatim on the
    /// control-channel wire.
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "ENOENT",
            Self::Exists(_) => "EEXIST",
            Self::InvalidArg(_) => "EINVAL",
            Self::Alloc(_) => "ENOMEM",
            Self::Incompat(_) => "ENOTSUP",
            Self::Truncated => "EMSGSIZE",
            Self::Timeout => "ETIMEDOUT",
            Self::Again => "EAGAIN",
            Self::BadValue(_) => "EBADMSG",
            Self::Other(_) => "EOTHER",
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock => Self::Again,
            std::io::ErrorKind::TimedOut => Self::Timeout,
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            std::io::ErrorKind::OutOfMemory => Self::Alloc(err.to_string()),
            _ => Self::Other(err.to_string()),
        }
    }
}

/// Result alias used across the engine: a fallible operation that, on
/// success, reports whether the callee acted ([`Outcome::Ok`]) or declined.
pub type EngineResult<T = Outcome> = Result<T, EngineError>;
