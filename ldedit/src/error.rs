use std::io;

/// Reasons the core rejects an input stream or aborts a comparison.
///
/// Variants produced while reading a stream carry the absolute byte
/// position of the offending construct, so a caller can point an editor
/// at the bad line.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Structural violation: missing DN, malformed folding, NUL byte in an
    /// attribute name, a body where none is allowed.
    #[error("syntax error at byte {pos}: {msg}")]
    Syntax { pos: u64, msg: String },

    /// A value failed to decode: invalid base64, unknown encoding token,
    /// unknown URL scheme, unreadable file URL.
    #[error("bad value encoding at byte {pos}: {msg}")]
    Encoding { pos: u64, msg: String },

    /// A `version` header naming a file format we do not read.
    #[error("unsupported file version `{found}`")]
    Version { pos: u64, found: String },

    /// Syntactically well-formed construct the core declines to process.
    #[error("{msg} (at byte {pos})")]
    NotSupported { pos: u64, msg: String },

    /// A record keyword where another kind was expected, or a duplicate or
    /// out-of-range numeric key.
    #[error("bad record key at byte {pos}: {msg}")]
    Key { pos: u64, msg: String },

    /// Rename validation failed.
    #[error("invalid rename at byte {pos}: {msg}")]
    Rename { pos: u64, msg: String },

    /// A change handler refused an operation. Unlike the stream errors
    /// above, this carries no position.
    #[error("aborted by change handler")]
    HandlerAborted(#[source] HandlerError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Byte position of the offending input, for errors that have one.
    pub fn position(&self) -> Option<u64> {
        match self {
            Error::Syntax { pos, .. }
            | Error::Encoding { pos, .. }
            | Error::Version { pos, .. }
            | Error::NotSupported { pos, .. }
            | Error::Key { pos, .. }
            | Error::Rename { pos, .. } => Some(*pos),
            Error::HandlerAborted(_) | Error::Io(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Returned by a `ChangeHandler` method to abort the comparison.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> HandlerError {
        HandlerError(reason.into())
    }
}
