//! Error types for the archival layer.
//!
//! Decoding is strict: any malformed input is reported as a
//! [`FormatError`] and aborts the load. There is no partial-load recovery;
//! callers discard the half-built state and keep whatever they had before.

use thiserror::Error;

/// Malformed or truncated archive data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("variable-length integer exceeds 32 bits")]
    VarIntTooLong,

    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown type tag {0:#08x}")]
    UnknownTag(u32),

    #[error("unknown component tag {0:#08x}")]
    UnknownComponentTag(u32),

    #[error("type tag {found:#08x} where {expected:#08x} was declared")]
    TagMismatch { expected: u32, found: u32 },

    #[error("unknown type argument '{0}' for extended type")]
    UnknownTypeArgument(String),

    #[error("back-reference to unregistered object id {0}")]
    DanglingReference(u32),

    #[error("object id {0} registered twice")]
    DuplicateReference(u32),

    #[error("reference table desync: header declared {expected} objects, read {actual}")]
    ReferenceCountMismatch { expected: u32, actual: u32 },

    #[error("malformed {0}")]
    Malformed(&'static str),
}

/// Any failure while writing or reading an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Version outside the readable range `(0, current]` for a tag.
    #[error("version {version} is outside (0, {current}] for tag {tag:#08x}")]
    Version { tag: u32, version: u16, current: u16 },

    /// The archival protocol was misused by the host (unregistered type,
    /// re-entrant world load, unfinished session, ...).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A callback target or method outside the allow list.
    #[error("security rejection: {0}")]
    Security(String),

    /// A null object where the context requires a value.
    #[error("unexpected null {0}")]
    NullValue(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
