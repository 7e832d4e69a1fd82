//! One complete export run: discover, plan, execute.

use log::{info, warn};

use crate::config::RunConfig;
use crate::error::{ConfigError, Result};
use crate::plan::plan;
use crate::schedule::{CancelToken, RunReport, Scheduler};
use crate::source::{discover_tags, DataSource};

/// Export every point of `config.service` between `config.start` and
/// `config.end`.
///
/// Configuration and discovery problems abort the run before any unit
/// starts. Past that point failures are per unit and land in the report.
///
/// # Errors
///
/// Returns [`crate::ExportError::Config`] for an invalid configuration, an
/// unusable output directory or a rejected session setup, and
/// [`crate::ExportError::Discovery`] when the point list cannot be read.
pub fn run_export<S: DataSource + ?Sized>(
    config: &RunConfig,
    source: &S,
    cancel: &CancelToken,
) -> Result<RunReport> {
    config.validate()?;
    config.prepare_output_dir()?;
    source
        .configure(&config.session())
        .map_err(ConfigError::Session)?;

    let tags = discover_tags(source, &config.service)?;
    if tags.is_empty() {
        warn!("service {} has no points to export", config.service);
    }

    let units = plan(
        &tags,
        config.start,
        config.end,
        config.batch_months,
        &config.output_dir,
    )
    .map_err(ConfigError::from)?;
    info!(
        "planned {} units for {} points into {} using {} workers",
        units.len(),
        tags.len(),
        config.output_dir.display(),
        config.workers
    );

    let report = Scheduler::from_config(config)
        .cancel_token(cancel.clone())
        .execute(units, source);
    info!("{}", report.summary());
    Ok(report)
}
