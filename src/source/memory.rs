use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;

use super::streams::StreamTable;
use super::{DataSource, Fetch, HistoryKey, Sample, NO_SUCH_POINT, NO_SUCH_SERVICE};
use crate::config::SessionSettings;
use crate::error::SourceError;

/// Code returned by opens that were configured to fail.
const INJECTED_OPEN_FAILURE: i32 = 99;

/// In-process historian.
///
/// Holds point lists and histories in memory and keeps count of every
/// stream opened and cancelled, so callers can check that no history
/// cursor is leaked. Failures can be injected per tag.
#[derive(Debug, Default)]
pub struct MemorySource {
    services: HashMap<String, Vec<String>>,
    series: HashMap<String, Vec<Sample>>,
    open_failures: Mutex<HashMap<String, u32>>,
    open_attempts: Mutex<HashMap<String, u32>>,
    list_failure: Option<i32>,
    fetch_delay: Option<Duration>,
    session: Mutex<Option<SessionSettings>>,
    streams: StreamTable,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service<I, T>(mut self, service: impl Into<String>, points: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.services
            .insert(service.into(), points.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_series(
        mut self,
        tag: impl Into<String>,
        samples: impl IntoIterator<Item = Sample>,
    ) -> Self {
        self.series
            .entry(tag.into())
            .or_default()
            .extend(samples);
        self
    }

    /// Every open of `tag` fails.
    pub fn fail_open(self, tag: impl Into<String>) -> Self {
        self.fail_open_times(tag, u32::MAX)
    }

    /// The next `times` opens of `tag` fail, later ones succeed.
    pub fn fail_open_times(self, tag: impl Into<String>, times: u32) -> Self {
        self.open_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag.into(), times);
        self
    }

    pub fn fail_listing(mut self, code: i32) -> Self {
        self.list_failure = Some(code);
        self
    }

    /// Sleep before answering each fetch, to mimic network round trips.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Streams opened over the lifetime of the source.
    pub fn opened_streams(&self) -> u64 {
        self.streams.opened_total()
    }

    /// Streams opened and not yet cancelled.
    pub fn open_streams(&self) -> usize {
        self.streams.open_count()
    }

    /// How many times each key was cancelled, sorted by key.
    pub fn cancel_counts(&self) -> Vec<(HistoryKey, u32)> {
        self.streams.cancel_counts()
    }

    pub fn open_attempts(&self, tag: &str) -> u32 {
        self.open_attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tag)
            .copied()
            .unwrap_or(0)
    }

    pub fn session(&self) -> Option<SessionSettings> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DataSource for MemorySource {
    fn configure(&self, settings: &SessionSettings) -> Result<(), SourceError> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(settings.clone());
        Ok(())
    }

    fn list_points(&self, service: &str) -> Result<Vec<String>, SourceError> {
        if let Some(code) = self.list_failure {
            return Err(SourceError::status(code, "point listing rejected"));
        }
        self.services
            .get(service)
            .cloned()
            .ok_or_else(|| SourceError::status(NO_SUCH_SERVICE, format!("unknown service {service}")))
    }

    fn open_history(
        &self,
        tag: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<HistoryKey, SourceError> {
        *self
            .open_attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tag.to_string())
            .or_insert(0) += 1;

        {
            let mut failures = self
                .open_failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(remaining) = failures.get_mut(tag) {
                if *remaining > 0 {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    return Err(SourceError::status(
                        INJECTED_OPEN_FAILURE,
                        format!("history request for {tag} rejected"),
                    ));
                }
            }
        }

        let Some(series) = self.series.get(tag) else {
            return Err(SourceError::status(NO_SUCH_POINT, format!("unknown point {tag}")));
        };
        let (from, to) = (start.unix_timestamp(), end.unix_timestamp());
        let window = series
            .iter()
            .filter(|sample| sample.timestamp >= from && sample.timestamp < to)
            .cloned()
            .collect();
        Ok(self.streams.open(window))
    }

    fn fetch_next(&self, key: HistoryKey) -> Fetch {
        if let Some(delay) = self.fetch_delay {
            std::thread::sleep(delay);
        }
        self.streams.next(key)
    }

    fn cancel(&self, key: HistoryKey) {
        self.streams.cancel(key);
    }
}
