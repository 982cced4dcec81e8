//! Centralized error types for the audio slice streaming core.
//!
//! Mirrors the [`ErrorKind`] taxonomy from the protocol design: a small
//! closed set of kinds, each either retried by the transport-retry wrapper
//! ([`crate::retry`]) or surfaced immediately to the caller.

use thiserror::Error;

/// Machine-readable classification of a [`CoreError`].
///
/// Only [`ErrorKind::Transport`] is retried automatically (see
/// [`crate::retry::with_retry`]). Every other kind surfaces immediately.
/// [`ErrorKind::Cancelled`] is a normal terminal state, not a failure — UIs
/// should not treat it as one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network or transport layer failure. Retried by the wrapper.
    Transport,
    /// Key exchange malformed or failed.
    Handshake,
    /// AEAD authentication failed.
    Integrity,
    /// PCM decoding or format-parser failure.
    Decode,
    /// Response missing a required field.
    Malformed,
    /// Unknown session, track, or slice id.
    NotFound,
    /// Operation invoked before its prerequisite.
    Precondition,
    /// Caller supplied an out-of-range or forbidden value.
    InvalidArgument,
    /// Caller-initiated abort. Not an error to surface as failure.
    Cancelled,
    /// A coalesced in-flight operation failed.
    Dependent,
}

impl ErrorKind {
    /// Machine-readable error code, stable across releases.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Transport => "transport_failed",
            Self::Handshake => "handshake_failed",
            Self::Integrity => "integrity_failed",
            Self::Decode => "decode_failed",
            Self::Malformed => "malformed_response",
            Self::NotFound => "not_found",
            Self::Precondition => "precondition_failed",
            Self::InvalidArgument => "invalid_argument",
            Self::Cancelled => "cancelled",
            Self::Dependent => "dependent_failed",
        }
    }

    /// Whether the retry wrapper should retry an error of this kind.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport)
    }
}

/// Crate-wide error type for core operations.
#[derive(Debug, Error)]
#[error("{kind_label}: {message}")]
pub struct CoreError {
    kind: ErrorKind,
    message: String,
    kind_label: &'static str,
}

impl CoreError {
    /// Builds a new error of the given kind with a human-readable message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            kind_label: kind.code(),
        }
    }

    /// Returns the error's [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Shorthand for constructing common variants.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Handshake, message)
    }
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Integrity, message)
    }
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, message)
    }
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed, message)
    }
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition, message)
    }
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }
    pub fn dependent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Dependent, message)
    }
}

/// Convenient Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
