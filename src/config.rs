use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use time::OffsetDateTime;

use crate::error::{ConfigError, PlanError};
use crate::extract::RetryPolicy;

pub const DEFAULT_BATCH_MONTHS: u32 = 3;
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
pub const DEFAULT_HISTORY_TIMEOUT: Duration = Duration::from_secs(2400);

/// Settings applied once to the data source session before any unit runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Server-side timeout for a single history request.
    pub history_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            history_timeout: DEFAULT_HISTORY_TIMEOUT,
        }
    }
}

/// Everything one export run needs. Read-only once validated.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub service: String,
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
    pub batch_months: u32,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub compress: bool,
    /// Keep the `.csv` next to its `.csv.gz` instead of removing it.
    pub keep_uncompressed: bool,
    /// Gzip level, 0 (store) to 9 (best).
    pub compression_level: u32,
    pub history_timeout: Duration,
    pub retry: RetryPolicy,
}

impl RunConfig {
    pub fn new(
        service: impl Into<String>,
        start: OffsetDateTime,
        end: OffsetDateTime,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            service: service.into(),
            start,
            end,
            batch_months: DEFAULT_BATCH_MONTHS,
            output_dir: output_dir.into(),
            workers: default_workers(),
            compress: true,
            keep_uncompressed: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            history_timeout: DEFAULT_HISTORY_TIMEOUT,
            retry: RetryPolicy::none(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.trim().is_empty() {
            return Err(ConfigError::EmptyService);
        }
        if self.start >= self.end {
            return Err(PlanError::InvalidRange {
                start: crate::calendar::display(self.start),
                end: crate::calendar::display(self.end),
            }
            .into());
        }
        if self.batch_months == 0 {
            return Err(PlanError::InvalidBatchWidth.into());
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidWorkers);
        }
        if self.compression_level > 9 {
            return Err(ConfigError::InvalidCompressionLevel(self.compression_level));
        }
        Ok(())
    }

    /// Create the output directory if needed.
    pub fn prepare_output_dir(&self) -> Result<(), ConfigError> {
        let fail = |source| ConfigError::OutputDir {
            path: self.output_dir.clone(),
            source,
        };
        std::fs::create_dir_all(&self.output_dir).map_err(fail)?;
        let meta = std::fs::metadata(&self.output_dir).map_err(fail)?;
        if !meta.is_dir() {
            return Err(fail(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "path exists and is not a directory",
            )));
        }
        Ok(())
    }

    pub fn session(&self) -> SessionSettings {
        SessionSettings {
            history_timeout: self.history_timeout,
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::parse_utc;
    use tempfile::tempdir;

    fn config() -> RunConfig {
        RunConfig::new(
            "svc",
            parse_utc("2020-01-01").unwrap(),
            parse_utc("2021-01-01").unwrap(),
            "out",
        )
    }

    #[test]
    fn defaults_validate() {
        let config = config();
        assert_eq!(config.batch_months, 3);
        assert!(config.workers >= 1);
        assert!(config.compress);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_each_bad_field() {
        let mut c = config();
        c.service = "  ".into();
        assert!(matches!(c.validate(), Err(ConfigError::EmptyService)));

        let mut c = config();
        c.end = c.start;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::Plan(PlanError::InvalidRange { .. }))
        ));

        let mut c = config();
        c.batch_months = 0;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::Plan(PlanError::InvalidBatchWidth))
        ));

        let mut c = config();
        c.workers = 0;
        assert!(matches!(c.validate(), Err(ConfigError::InvalidWorkers)));

        let mut c = config();
        c.compression_level = 10;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::InvalidCompressionLevel(10))
        ));
    }

    #[test]
    fn output_dir_is_created() {
        let temp = tempdir().unwrap();
        let mut c = config();
        c.output_dir = temp.path().join("nested").join("Data");
        c.prepare_output_dir().unwrap();
        assert!(c.output_dir.is_dir());
    }

    #[test]
    fn output_dir_over_a_file_is_rejected() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("taken");
        std::fs::write(&file, b"x").unwrap();
        let mut c = config();
        c.output_dir = file;
        assert!(matches!(
            c.prepare_output_dir(),
            Err(ConfigError::OutputDir { .. })
        ));
    }
}
