use std::path::PathBuf;
use thiserror::Error;

use crate::metadata::MetadataError;
use crate::psrfits::FitsError;
use crate::sigproc::ParseError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure the library reports. All of them are terminal for the file being processed.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}: not a SIGPROC, PRESTO or PSRFITS file")]
    UnknownFormat(PathBuf),
    #[error("{path}: corrupt header: {reason}")]
    CorruptHeader { path: PathBuf, reason: String },
    #[error("Read failed")]
    Read(#[source] std::io::Error),
    #[error("Write failed")]
    Write(#[source] std::io::Error),
    #[error("Could not allocate a {0} byte buffer")]
    AllocationFailure(usize),
    #[error("Incomplete copy: {copied} of {expected} payload bytes transferred")]
    IncompleteCopy { copied: u64, expected: u64 },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Interrupted")]
    Interrupted,
}

impl Error {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::CorruptHeader {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Attaches a path to a SIGPROC keyword parse failure.
    pub(crate) fn from_sigproc(path: impl Into<PathBuf>, err: ParseError) -> Self {
        match err {
            // A failing reader is an I/O problem, not a malformed header
            ParseError::IoError(e) if e.kind() != std::io::ErrorKind::UnexpectedEof => {
                Error::Read(e)
            }
            other => Error::corrupt(path, other),
        }
    }

    pub(crate) fn from_fits(path: impl Into<PathBuf>, err: FitsError) -> Self {
        match err {
            FitsError::IoError(e) if e.kind() != std::io::ErrorKind::UnexpectedEof => {
                Error::Read(e)
            }
            other => Error::corrupt(path, other),
        }
    }

    pub(crate) fn from_metadata(path: impl Into<PathBuf>, err: MetadataError) -> Self {
        Error::corrupt(path, err)
    }
}
