//! The crate-wide error type and the failure classification the
//! downloader's retry loop acts on.

use std::fmt;
use std::io;

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the transfer core.
#[derive(Debug)]
pub enum Error {
    /// The peer closed the connection before the expected number of bytes
    /// arrived.
    Closed,
    /// A `readExact` call observed EOF partway through the expected
    /// payload.
    Truncated,
    /// An underlying OS I/O error (connect, read, write, seek, rename, ...).
    Io(io::Error),
    /// A response didn't parse as any known line of the wire grammar.
    Protocol(String),
    /// Connect/read/write failure, timeout, or unparsable response: retry on
    /// another seeder, or wait and retry if every seeder says this.
    TempFail(String),
    /// The peer answered `<FILE_NOT_FOUND>`.
    NotFound,
    /// The peer answered `<RANGE_ERROR>` or `<BAD_REQUEST>`.
    RangeOrBad,
    /// Destination file create/seek/write/rename failed.
    LocalIo(io::Error),
    /// No seeder answered `META` with a usable size.
    MetaFail,
    /// `download` was called with an empty seeder list.
    NoSeeders,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "connection closed by peer"),
            Self::Truncated => write!(f, "short read: peer closed mid-message"),
            Self::Io(e) => write!(f, "io error: {}", e),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::TempFail(msg) => write!(f, "temporary failure: {}", msg),
            Self::NotFound => write!(f, "file not found"),
            Self::RangeOrBad => write!(f, "range error or bad request"),
            Self::LocalIo(e) => write!(f, "local io error: {}", e),
            Self::MetaFail => write!(f, "no seeder answered META"),
            Self::NoSeeders => write!(f, "no seeders given"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) | Self::LocalIo(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// The retry-relevant classification of a failed chunk fetch, used by the
/// downloader's seeder loop: `Temp` failures are retried on the next
/// seeder (and, if every seeder in a round is `Temp`, the whole round is
/// retried after a backoff); `Permanent` failures are never retried at
/// that seeder but don't by themselves fail the download unless no
/// seeder was `Temp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailKind {
    Temp,
    Permanent,
}

impl Error {
    /// Classifies an error from a single `GET` attempt against one seeder.
    pub(crate) fn fail_kind(&self) -> FailKind {
        match self {
            Self::NotFound | Self::RangeOrBad => FailKind::Permanent,
            _ => FailKind::Temp,
        }
    }
}
