//! Streaming one work unit from the data source into its output file.

mod sink;
mod stream;

use std::time::Duration;

use log::{debug, warn};

use crate::error::ExtractionError;
use crate::plan::WorkUnit;
use crate::schedule::CancelToken;
use crate::source::DataSource;

pub use sink::RecordSink;
pub use stream::HistoryStream;

/// Bounded retry around opening a history stream.
///
/// Only open failures are retried. Each attempt recreates the output file,
/// so a retried unit produces the same bytes as an unretried one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// `max_attempts` is clamped to at least one. Attempt n waits
    /// `n * backoff` before the next try.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractStats {
    pub records: u64,
    /// Nonzero code that ended the stream.
    pub exhausted_code: i32,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Extractor {
    retry: RetryPolicy,
}

impl Extractor {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    pub fn run<S: DataSource + ?Sized>(
        &self,
        unit: &WorkUnit,
        source: &S,
    ) -> Result<ExtractStats, ExtractionError> {
        self.run_until_cancelled(unit, source, &CancelToken::new())
    }

    /// Export `unit`, stopping between samples once `cancel` trips.
    ///
    /// On success the output file holds every sample in stream order. On
    /// any error the output file is removed. The history stream is
    /// cancelled on every path.
    pub fn run_until_cancelled<S: DataSource + ?Sized>(
        &self,
        unit: &WorkUnit,
        source: &S,
        cancel: &CancelToken,
    ) -> Result<ExtractStats, ExtractionError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(ExtractionError::Cancelled);
            }

            let sink = RecordSink::create(unit.output_path()).map_err(|source| {
                ExtractionError::WriteFailed {
                    path: unit.output_path().to_path_buf(),
                    source,
                }
            })?;

            let stream = match HistoryStream::open(
                source,
                unit.tag(),
                unit.window_start(),
                unit.window_end(),
            ) {
                Ok(stream) => stream,
                Err(err) => {
                    sink.abandon();
                    if attempt >= self.retry.max_attempts() {
                        return Err(ExtractionError::OpenFailed {
                            tag: unit.tag().to_string(),
                            attempts: attempt,
                            source: err,
                        });
                    }
                    let wait = self.retry.backoff() * attempt;
                    warn!("{unit}: open attempt {attempt} failed ({err}), retrying in {wait:?}");
                    cancel.sleep(wait);
                    continue;
                }
            };

            return drain(unit, stream, sink, cancel).map(|(records, exhausted_code)| {
                ExtractStats {
                    records,
                    exhausted_code,
                    attempts: attempt,
                }
            });
        }
    }
}

fn drain<S: DataSource + ?Sized>(
    unit: &WorkUnit,
    mut stream: HistoryStream<'_, S>,
    mut sink: RecordSink,
    cancel: &CancelToken,
) -> Result<(u64, i32), ExtractionError> {
    let write_failed = |source| ExtractionError::WriteFailed {
        path: unit.output_path().to_path_buf(),
        source,
    };

    while let Some(sample) = stream.next() {
        if cancel.is_cancelled() {
            stream.close();
            sink.abandon();
            return Err(ExtractionError::Cancelled);
        }
        if let Err(err) = sink.write(&sample) {
            stream.close();
            sink.abandon();
            return Err(write_failed(err));
        }
    }

    let exhausted_code = stream.exhausted_code().unwrap_or_default();
    debug!("{unit}: stream ended with code {exhausted_code}");
    stream.close();

    let records = sink.finish().map_err(write_failed)?;
    Ok((records, exhausted_code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::parse_utc;
    use crate::plan::plan;
    use crate::source::{MemorySource, Sample, END_OF_HISTORY};
    use std::path::Path;
    use tempfile::tempdir;

    fn unit_in(dir: &Path, tag: &str) -> WorkUnit {
        plan(
            [tag],
            parse_utc("1970-01-01").unwrap(),
            parse_utc("1970-02-01").unwrap(),
            1,
            dir,
        )
        .unwrap()
        .remove(0)
    }

    #[test]
    fn writes_samples_in_stream_order() {
        let temp = tempdir().unwrap();
        let source = MemorySource::new().with_series(
            "T",
            [Sample::new(100, 1.5, "Good"), Sample::new(200, 2.5, "Good")],
        );
        let unit = unit_in(temp.path(), "T");

        let stats = Extractor::default().run(&unit, &source).unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.exhausted_code, END_OF_HISTORY);
        assert_eq!(stats.attempts, 1);

        let text = std::fs::read_to_string(unit.output_path()).unwrap();
        assert_eq!(text, "100,1.5,Good\n200,2.5,Good\n");
        assert_eq!(source.cancel_counts().len(), 1);
        assert_eq!(source.cancel_counts()[0].1, 1);
        assert_eq!(source.open_streams(), 0);
    }

    #[test]
    fn empty_window_is_success() {
        let temp = tempdir().unwrap();
        let source = MemorySource::new().with_series("T", [Sample::new(1 << 40, 1.0, "Good")]);
        let unit = unit_in(temp.path(), "T");

        let stats = Extractor::default().run(&unit, &source).unwrap();
        assert_eq!(stats.records, 0);
        assert_eq!(std::fs::read(unit.output_path()).unwrap(), b"");
        assert_eq!(source.open_streams(), 0);
    }

    #[test]
    fn open_failure_leaves_no_file() {
        let temp = tempdir().unwrap();
        let source = MemorySource::new().with_series("T", Vec::new()).fail_open("T");
        let unit = unit_in(temp.path(), "T");

        let err = Extractor::default().run(&unit, &source).unwrap_err();
        assert!(matches!(err, ExtractionError::OpenFailed { attempts: 1, .. }));
        assert!(!unit.output_path().exists());
        assert_eq!(source.opened_streams(), 0);
    }

    #[test]
    fn transient_open_failure_is_retried() {
        let temp = tempdir().unwrap();
        let source = MemorySource::new()
            .with_series("T", [Sample::new(5, 0.5, "Good")])
            .fail_open_times("T", 2);
        let unit = unit_in(temp.path(), "T");

        let extractor = Extractor::new(RetryPolicy::new(3, Duration::from_millis(1)));
        let stats = extractor.run(&unit, &source).unwrap();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.records, 1);
        assert_eq!(source.open_attempts("T"), 3);
    }

    #[test]
    fn retries_are_bounded() {
        let temp = tempdir().unwrap();
        let source = MemorySource::new().with_series("T", Vec::new()).fail_open("T");
        let unit = unit_in(temp.path(), "T");

        let extractor = Extractor::new(RetryPolicy::new(2, Duration::ZERO));
        let err = extractor.run(&unit, &source).unwrap_err();
        assert!(matches!(err, ExtractionError::OpenFailed { attempts: 2, .. }));
        assert_eq!(source.open_attempts("T"), 2);
    }

    #[test]
    fn unwritable_output_is_write_failure() {
        let temp = tempdir().unwrap();
        let source = MemorySource::new().with_series("T", Vec::new());
        let unit = unit_in(&temp.path().join("missing"), "T");

        let err = Extractor::default().run(&unit, &source).unwrap_err();
        assert!(matches!(err, ExtractionError::WriteFailed { .. }));
        assert_eq!(source.opened_streams(), 0);
    }

    /// Unit whose output path is a symlink to `/dev/full`, so every write
    /// that reaches the device fails with ENOSPC.
    #[cfg(target_os = "linux")]
    fn unit_on_full_device(dir: &Path, tag: &str) -> Option<WorkUnit> {
        if !Path::new("/dev/full").exists() {
            return None;
        }
        let unit = unit_in(dir, tag);
        std::os::unix::fs::symlink("/dev/full", unit.output_path()).unwrap();
        Some(unit)
    }

    #[cfg(target_os = "linux")]
    fn assert_write_failure_cleaned_up(unit: &WorkUnit, source: &MemorySource) {
        let err = Extractor::default().run(unit, source).unwrap_err();
        assert!(matches!(err, ExtractionError::WriteFailed { .. }), "{err}");
        assert_eq!(source.opened_streams(), 1);
        assert_eq!(source.open_streams(), 0);
        let counts = source.cancel_counts();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].1, 1);
        assert!(std::fs::symlink_metadata(unit.output_path()).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn write_failure_mid_stream_cancels_once_and_removes_file() {
        let temp = tempdir().unwrap();
        let source = MemorySource::new().with_series(
            "T",
            (0..5_000).map(|i| Sample::new(i, i as f64, "Good")),
        );
        let Some(unit) = unit_on_full_device(temp.path(), "T") else {
            return;
        };
        assert_write_failure_cleaned_up(&unit, &source);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn flush_failure_on_finish_cancels_once_and_removes_file() {
        let temp = tempdir().unwrap();
        let source = MemorySource::new().with_series(
            "T",
            (0..3).map(|i| Sample::new(i, i as f64, "Good")),
        );
        let Some(unit) = unit_on_full_device(temp.path(), "T") else {
            return;
        };
        assert_write_failure_cleaned_up(&unit, &source);
    }

    #[test]
    fn cancelled_run_releases_stream_and_file() {
        let temp = tempdir().unwrap();
        let source = MemorySource::new().with_series(
            "T",
            (0..10).map(|i| Sample::new(i, i as f64, "Good")),
        );
        let unit = unit_in(temp.path(), "T");
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = Extractor::default()
            .run_until_cancelled(&unit, &source, &cancel)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Cancelled));
        assert!(!unit.output_path().exists());
        assert_eq!(source.open_streams(), 0);
    }
}
