//! Error type shared by the merge, split and inspection pipelines.
//!
//! Per-document problems (undecodable content, missing entries listed in a
//! manifest) are not errors: they are reported as warnings on the
//! [`LogSink`](crate::sink::LogSink) and the document is passed through.

use crate::archive::ArchiveError;
use crate::doc::DocError;
use crate::xmlutils::XMLError;

/// Type alias for results of the crate operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad input from the caller: too few inputs, split index out of range,
    /// missing file, not a zip archive.
    #[error("Validation Error: {0}")]
    Validation(String),
    /// The package can't be understood: no container, no OPF, malformed
    /// OPF, NCX or nav.
    #[error("Format Error: {0}")]
    Format(#[from] DocError),
    /// A generated document failed its namespace or well-formedness checks.
    #[error("XML Error: {0}")]
    Xml(#[from] XMLError),
    #[error("Archive Error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("I/O Error: {0}")]
    IO(#[from] std::io::Error),
}
