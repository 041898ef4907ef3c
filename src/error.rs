//! Library-wide error taxonomy.
use bson::ValidityFlags;

use std::{error, fmt, io, result};

/// The default result type for this crate.
pub type Result<T> = result::Result<T, Error>;

/// All errors surfaced by the codec and the wire client.
#[derive(Debug)]
pub enum Error {
    /// A malformed argument was supplied by the caller.
    ArgumentError(String),
    /// An operation was attempted in an invalid state.
    OperationError(String),
    /// The server sent a response the client could not interpret.
    ResponseError(String),
    /// The underlying transport failed; timeouts and peer closes both land
    /// here, distinguished by the `io::ErrorKind`.
    IoError(io::Error),
    /// A reply header declared a length outside the accepted bounds.
    ReadSizeError(i32),
    /// The server reported a command failure.
    CommandFailed { code: i32, message: String },
    /// A document carried validity flags that forbid the attempted write.
    InvalidDocument(ValidityFlags),
    /// An append was attempted on a finalized document builder.
    ObjectFinished,
    /// A document grew past the 2^31 - 1 byte ceiling.
    SizeOverflow,
    /// An encoded document violated the format (unknown tag, truncation).
    MalformedDocument(String),
    /// A replica-set member reported a set name other than the configured one.
    BadSetName(String),
    /// Replica-set discovery walked every known host without finding a primary.
    CannotFindPrimary,
    /// The cursor holds no reply to iterate.
    CursorInvalid,
    /// The server-side cursor has no more results.
    CursorExhausted,
    /// A tailable cursor has a live server id but no data yet.
    CursorPending,
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::ArgumentError(ref s) => write!(fmt, "Invalid argument: {}", s),
            Error::OperationError(ref s) => write!(fmt, "Invalid operation: {}", s),
            Error::ResponseError(ref s) => write!(fmt, "Invalid server response: {}", s),
            Error::IoError(ref err) => err.fmt(fmt),
            Error::ReadSizeError(len) => {
                write!(fmt, "Reply declared an out-of-bounds length of {} bytes", len)
            }
            Error::CommandFailed { code, ref message } => {
                write!(fmt, "Command failed with code {}: {}", code, message)
            }
            Error::InvalidDocument(flags) => {
                write!(fmt, "Document failed validity checks: {:?}", flags)
            }
            Error::ObjectFinished => write!(fmt, "Document builder has already been finalized"),
            Error::SizeOverflow => write!(fmt, "Document exceeds the maximum encodable size"),
            Error::MalformedDocument(ref s) => write!(fmt, "Malformed document: {}", s),
            Error::BadSetName(ref s) => {
                write!(fmt, "Host belongs to replica set '{}', not the configured one", s)
            }
            Error::CannotFindPrimary => write!(fmt, "Unable to find a replica set primary"),
            Error::CursorInvalid => write!(fmt, "Cursor holds no reply"),
            Error::CursorExhausted => write!(fmt, "Cursor is exhausted"),
            Error::CursorPending => write!(fmt, "Cursor has no data yet; retry later"),
        }
    }
}

impl error::Error for Error {
    fn cause(&self) -> Option<&error::Error> {
        match *self {
            Error::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}
