use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use csv::{ReaderBuilder, StringRecord, Trim};
use log::debug;
use time::OffsetDateTime;

use super::streams::StreamTable;
use super::{DataSource, Fetch, HistoryKey, Sample, NO_SUCH_POINT, NO_SUCH_SERVICE};
use crate::config::SessionSettings;
use crate::error::SourceError;
use crate::plan::escape_component;

const SERVICES_DIR: &str = "services";
const HISTORY_DIR: &str = "history";

/// Historian backed by a directory tree.
///
/// ```text
/// <root>/services/<service>.txt   one point id per line
/// <root>/history/<point>.csv      timestamp,value[,status] rows, no header
/// ```
///
/// Point ids are mapped onto history file names with the same escaping the
/// planner uses for output files.
#[derive(Debug)]
pub struct DirectorySource {
    root: PathBuf,
    session: Mutex<Option<SessionSettings>>,
    streams: StreamTable,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            session: Mutex::new(None),
            streams: StreamTable::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session(&self) -> Option<SessionSettings> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn service_path(&self, service: &str) -> PathBuf {
        self.root.join(SERVICES_DIR).join(format!("{service}.txt"))
    }

    pub fn history_path(&self, tag: &str) -> PathBuf {
        self.root
            .join(HISTORY_DIR)
            .join(format!("{}.csv", escape_component(tag)))
    }

    fn read_history(
        &self,
        tag: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<Sample>, SourceError> {
        let path = self.history_path(tag);
        let mut reader = match ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_path(&path)
        {
            Ok(reader) => reader,
            Err(err) => {
                if let csv::ErrorKind::Io(io_err) = err.kind() {
                    if io_err.kind() == io::ErrorKind::NotFound {
                        return Err(SourceError::status(
                            NO_SUCH_POINT,
                            format!("unknown point {tag}"),
                        ));
                    }
                }
                return Err(malformed(&path, err));
            }
        };

        let mut samples = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| malformed(&path, err))?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            let sample = parse_record(&record).map_err(|reason| {
                SourceError::Malformed(format!("{}: {reason}", path.display()))
            })?;
            if sample.timestamp >= from && sample.timestamp < to {
                samples.push(sample);
            }
        }
        Ok(samples)
    }
}

impl DataSource for DirectorySource {
    fn configure(&self, settings: &SessionSettings) -> Result<(), SourceError> {
        debug!(
            "history timeout set to {}s for {}",
            settings.history_timeout.as_secs(),
            self.root.display()
        );
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(settings.clone());
        Ok(())
    }

    fn list_points(&self, service: &str) -> Result<Vec<String>, SourceError> {
        if !is_valid_service(service) {
            return Err(SourceError::status(
                NO_SUCH_SERVICE,
                format!("invalid service name {service:?}"),
            ));
        }
        let path = self.service_path(service);
        let body = match fs::read_to_string(&path) {
            Ok(body) => body,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(SourceError::status(
                    NO_SUCH_SERVICE,
                    format!("unknown service {service}"),
                ));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(body
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect())
    }

    fn open_history(
        &self,
        tag: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<HistoryKey, SourceError> {
        let samples = self.read_history(tag, start.unix_timestamp(), end.unix_timestamp())?;
        Ok(self.streams.open(samples))
    }

    fn fetch_next(&self, key: HistoryKey) -> Fetch {
        self.streams.next(key)
    }

    fn cancel(&self, key: HistoryKey) {
        self.streams.cancel(key);
    }
}

fn is_valid_service(service: &str) -> bool {
    !(service.is_empty()
        || service == "."
        || service == ".."
        || service.contains('/')
        || service.contains('\\')
        || service.contains('\0'))
}

fn parse_record(record: &StringRecord) -> Result<Sample, String> {
    let field = |idx: usize, name: &str| {
        record
            .get(idx)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| format!("missing {name} in {record:?}"))
    };
    let timestamp = field(0, "timestamp")?
        .parse::<i64>()
        .map_err(|err| format!("bad timestamp in {record:?}: {err}"))?;
    let value = field(1, "value")?
        .parse::<f64>()
        .map_err(|err| format!("bad value in {record:?}: {err}"))?;
    let status = record.get(2).unwrap_or_default();
    Ok(Sample::new(timestamp, value, status))
}

fn malformed(path: &Path, err: csv::Error) -> SourceError {
    SourceError::Malformed(format!("{}: {err}", path.display()))
}
