//! Upstream historian access.
//!
//! The historian is reached through the [`DataSource`] trait. A history
//! stream is a server-side cursor: it is opened for one tag and window,
//! drained with [`DataSource::fetch_next`], and must be released with
//! [`DataSource::cancel`] exactly once no matter how draining ended.

mod directory;
mod memory;
mod streams;

use std::collections::HashSet;

use log::info;
use time::OffsetDateTime;

use crate::config::SessionSettings;
use crate::error::{DiscoveryError, SourceError};

pub use directory::DirectorySource;
pub use memory::MemorySource;

/// Result code a source reports once a stream has no more samples.
pub const END_OF_HISTORY: i32 = 1;
/// Result code for a fetch against a stream the source does not know.
pub const UNKNOWN_STREAM: i32 = -1;
/// Result code for opening history on a point the source does not know.
pub const NO_SUCH_POINT: i32 = -2;
/// Result code for listing points of a service the source does not know.
pub const NO_SUCH_SERVICE: i32 = -3;

/// One historian observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// UTC seconds since the Unix epoch, as reported by the source.
    pub timestamp: i64,
    pub value: f64,
    pub status: String,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64, status: impl Into<String>) -> Self {
        Self {
            timestamp,
            value,
            status: status.into(),
        }
    }
}

/// Opaque handle for an open history stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HistoryKey(pub u32);

/// Outcome of a single fetch on a history stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetch {
    Sample(Sample),
    /// Nonzero result code. Every nonzero code ends the stream.
    Exhausted(i32),
}

pub trait DataSource: Send + Sync {
    /// One-time session setup, called before any history stream is opened.
    fn configure(&self, _settings: &SessionSettings) -> Result<(), SourceError> {
        Ok(())
    }

    fn list_points(&self, service: &str) -> Result<Vec<String>, SourceError>;

    fn open_history(
        &self,
        tag: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<HistoryKey, SourceError>;

    fn fetch_next(&self, key: HistoryKey) -> Fetch;

    /// Release the server-side cursor behind `key`.
    fn cancel(&self, key: HistoryKey);
}

/// List every point of `service`, dropping blank ids and duplicates while
/// keeping the order the source reported.
pub fn discover_tags<S: DataSource + ?Sized>(
    source: &S,
    service: &str,
) -> Result<Vec<String>, DiscoveryError> {
    let points = source
        .list_points(service)
        .map_err(|source| DiscoveryError::ListFailed {
            service: service.to_string(),
            source,
        })?;
    let reported = points.len();

    let mut seen = HashSet::new();
    let tags: Vec<String> = points
        .into_iter()
        .filter(|point| !point.trim().is_empty())
        .filter(|point| seen.insert(point.clone()))
        .collect();

    info!(
        "retrieved {} points from service {service} ({} reported)",
        tags.len(),
        reported
    );
    Ok(tags)
}
