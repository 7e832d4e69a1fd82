//! Concurrent execution of work units.
//!
//! Units are fed through a bounded queue to a fixed pool of worker
//! threads. Each worker runs extraction and then compaction for one unit
//! at a time and turns whatever happens into a [`UnitOutcome`]; a failing
//! or panicking unit never stops its siblings.

mod cancel;
mod report;

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use log::{error, info, warn};

use crate::compact::{CompactOutcome, Compactor};
use crate::config::RunConfig;
use crate::error::{ExtractionError, UnitError};
use crate::extract::Extractor;
use crate::plan::WorkUnit;
use crate::source::DataSource;

pub use cancel::CancelToken;
pub use report::{ReportSummary, RunReport, UnitOutcome, UnitRecord, UnitStatus, UnitSuccess};

const QUEUE_PER_WORKER: usize = 2;

pub struct Scheduler {
    workers: usize,
    queue_capacity: usize,
    extractor: Extractor,
    compactor: Option<Compactor>,
    cancel: CancelToken,
}

impl Scheduler {
    /// Pool of `workers` threads with default extraction and compaction.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            queue_capacity: workers * QUEUE_PER_WORKER,
            extractor: Extractor::default(),
            compactor: Some(Compactor::default()),
            cancel: CancelToken::new(),
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        let compactor = config.compress.then(|| {
            Compactor::new(config.compression_level).keep_original(config.keep_uncompressed)
        });
        Self::new(config.workers)
            .extractor(Extractor::new(config.retry))
            .compactor(compactor)
    }

    pub fn extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// `None` leaves the `.csv` files uncompressed.
    pub fn compactor(mut self, compactor: Option<Compactor>) -> Self {
        self.compactor = compactor;
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Set the dispatch queue capacity (default: two units per worker).
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Run every unit and wait for all of them.
    ///
    /// Dispatch blocks while the queue is full, so only the queue and the
    /// units in flight are held in memory beyond the outcomes.
    pub fn execute<I, S>(&self, units: I, source: &S) -> RunReport
    where
        I: IntoIterator<Item = WorkUnit>,
        S: DataSource + ?Sized,
    {
        let start = Instant::now();
        let mut outcomes = Vec::new();

        let (unit_tx, unit_rx) = mpsc::sync_channel::<WorkUnit>(self.queue_capacity);
        let unit_rx = Mutex::new(unit_rx);
        let (outcome_tx, outcome_rx) = mpsc::channel::<UnitOutcome>();

        thread::scope(|scope| {
            let mut spawned = 0;
            for worker_id in 0..self.workers {
                let unit_rx = &unit_rx;
                let outcome_tx = outcome_tx.clone();
                let handle = thread::Builder::new()
                    .name(format!("histpull-worker-{worker_id}"))
                    .spawn_scoped(scope, move || loop {
                        let next = unit_rx
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .recv();
                        let Ok(unit) = next else {
                            break;
                        };
                        if outcome_tx.send(self.run_unit(unit, source)).is_err() {
                            break;
                        }
                    });
                match handle {
                    Ok(_) => spawned += 1,
                    Err(err) => error!("failed to spawn worker {worker_id}: {err}"),
                }
            }
            drop(outcome_tx);

            if spawned == 0 {
                warn!("no worker threads available, running units inline");
                drop(unit_tx);
                outcomes.extend(units.into_iter().map(|unit| self.run_unit(unit, source)));
                return;
            }

            for unit in units {
                if self.cancel.is_cancelled() {
                    outcomes.push(UnitOutcome::cancelled(unit));
                    continue;
                }
                if let Err(mpsc::SendError(unit)) = unit_tx.send(unit) {
                    outcomes.push(UnitOutcome::cancelled(unit));
                }
            }
            drop(unit_tx);

            outcomes.extend(outcome_rx.iter());
        });

        RunReport::new(outcomes, start.elapsed())
    }

    fn run_unit<S: DataSource + ?Sized>(&self, unit: WorkUnit, source: &S) -> UnitOutcome {
        if self.cancel.is_cancelled() {
            return UnitOutcome::cancelled(unit);
        }

        info!("starting data pull for {unit}");
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.process(&unit, source)));
        let elapsed = started.elapsed();

        let status = match result {
            Ok(Ok(done)) => {
                info!(
                    "finished data pull for {unit}: {} records in {:.3}s",
                    done.records,
                    elapsed.as_secs_f64()
                );
                UnitStatus::Succeeded(done)
            }
            Ok(Err(UnitError::Extraction(ExtractionError::Cancelled))) => {
                warn!("data pull for {unit} cancelled");
                UnitStatus::Cancelled
            }
            Ok(Err(err)) => {
                error!("data pull for {unit} failed after {:.3}s: {err}", elapsed.as_secs_f64());
                UnitStatus::Failed(err)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("data pull for {unit} panicked: {message}");
                UnitStatus::Failed(UnitError::Panicked(message))
            }
        };

        UnitOutcome {
            unit,
            status,
            elapsed,
        }
    }

    fn process<S: DataSource + ?Sized>(
        &self,
        unit: &WorkUnit,
        source: &S,
    ) -> Result<UnitSuccess, UnitError> {
        let stats = self
            .extractor
            .run_until_cancelled(unit, source, &self.cancel)?;

        let artifact = match &self.compactor {
            Some(compactor) => match compactor.compact(unit.output_path())? {
                CompactOutcome::Compressed { artifact, .. } => artifact,
                CompactOutcome::Skipped(_) => unit.output_path().to_path_buf(),
            },
            None => unit.output_path().to_path_buf(),
        };

        Ok(UnitSuccess {
            records: stats.records,
            attempts: stats.attempts,
            exhausted_code: stats.exhausted_code,
            artifact,
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
