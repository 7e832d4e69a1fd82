use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by a [`DataSource`](crate::source::DataSource).
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source answered with a nonzero result code.
    #[error("data source returned code {code}: {message}")]
    Status { code: i32, message: String },
    #[error("data source io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed data source content: {0}")]
    Malformed(String),
}

impl SourceError {
    pub fn status(code: i32, message: impl Into<String>) -> Self {
        SourceError::Status {
            code,
            message: message.into(),
        }
    }
}

/// Run-level configuration problems. Fatal before any unit runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("service name is empty")]
    EmptyService,
    #[error("invalid date {value:?}: {reason}")]
    InvalidDate { value: String, reason: String },
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("worker count must be at least one")]
    InvalidWorkers,
    #[error("compression level {0} is outside 0..=9")]
    InvalidCompressionLevel(u32),
    #[error("output directory {path} is unusable: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("data source session setup failed: {0}")]
    Session(#[source] SourceError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("start {start} is not before end {end}")]
    InvalidRange { start: String, end: String },
    #[error("batch width must be at least one month")]
    InvalidBatchWidth,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("listing points for service {service:?} failed: {source}")]
    ListFailed {
        service: String,
        #[source]
        source: SourceError,
    },
}

/// Failure of a single extraction unit. Never aborts sibling units.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("opening history for {tag:?} failed after {attempts} attempt(s): {source}")]
    OpenFailed {
        tag: String,
        attempts: u32,
        #[source]
        source: SourceError,
    },
    #[error("writing {path} failed: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("extraction cancelled")]
    Cancelled,
}

/// Failure while compressing a finished output file. The original file
/// survives every variant except `RemoveFailed`, where both copies exist.
#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("reading {path} failed: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("writing {path} failed: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("verification of {path} failed: expected {expected} bytes, decoded {actual}")]
    VerifyFailed {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
    #[error("removing original {path} failed: {source}")]
    RemoveFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Why a single unit did not produce its artifact.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Compaction(#[from] CompactionError),
    #[error("unit panicked: {0}")]
    Panicked(String),
}

/// Errors that terminate a whole export before any unit is dispatched.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

pub type Result<T> = std::result::Result<T, ExportError>;
