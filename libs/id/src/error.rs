//! Identifier validation errors.
//!
//! Two identifier families fail in different ways. User-chosen and composed
//! IDs (`AppId`, `TaskId`) fail on their alphabet, length, or shape;
//! scheduler-minted version IDs fail on their `ver_` marker or on the ULID
//! payload behind it. Opaque cluster-manager IDs only fail when empty.

use thiserror::Error;

/// Why an identifier was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// No identifier at all.
    #[error("empty identifier")]
    Empty,

    /// A character outside the identifier's allowed alphabet.
    #[error("invalid character '{ch}' in ID '{id}'")]
    InvalidCharacter { id: String, ch: char },

    /// The identifier is longer than its family allows.
    #[error("ID '{id}' exceeds {max} characters")]
    TooLong { id: String, max: usize },

    /// The identifier does not have the structure its family requires
    /// (index/incarnation/app ordering for task IDs, dash placement for
    /// app IDs).
    #[error("invalid ID format: {message}")]
    InvalidFormat { message: String },

    /// The string is not a `{kind}` identifier at all — it lacks the
    /// family's marker.
    #[error("'{input}' is not a {kind} ID")]
    WrongKind { input: String, kind: &'static str },

    /// The payload behind a version ID's marker is not a ULID.
    #[error("version ID '{input}' has an unparsable ULID payload: {message}")]
    BadUlid { input: String, message: String },
}
