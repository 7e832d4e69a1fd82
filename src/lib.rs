//! Batch exporter for historian time series.
//!
//! A run lists every point of a service, splits the requested range into
//! month windows, streams each point/window pair to its own CSV file on a
//! pool of workers, and gzips the finished files.

pub mod calendar;
pub mod compact;
pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod plan;
pub mod schedule;
pub mod source;

pub use config::RunConfig;
pub use error::{ExportError, Result};
pub use export::run_export;
pub use plan::{plan, WorkUnit};
pub use schedule::{CancelToken, RunReport, Scheduler, UnitOutcome, UnitStatus};
pub use source::{DataSource, DirectorySource, MemorySource, Sample};
