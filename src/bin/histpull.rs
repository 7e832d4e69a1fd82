use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::signal;

use histpull::calendar::parse_utc;
use histpull::config::DEFAULT_COMPRESSION_LEVEL;
use histpull::extract::RetryPolicy;
use histpull::{run_export, CancelToken, DirectorySource, RunConfig, UnitStatus};

/// Conventional status for a process stopped by SIGINT.
const INTERRUPT_EXIT_CODE: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "histpull")]
#[command(about = "Export raw historian tag history into gzip-compressed CSV windows")]
struct Cli {
    /// Service whose points are exported (prompted for if omitted)
    service: Option<String>,

    /// Start of the range, UTC (YYYY-MM-DD[ HH:MM[:SS]])
    start: Option<String>,

    /// End of the range, exclusive, UTC
    end: Option<String>,

    /// Months per output file
    batch_months: Option<u32>,

    /// Output directory (default: Data next to the executable)
    output_dir: Option<PathBuf>,

    /// Root of the historian directory (services/ and history/)
    #[arg(long)]
    source_dir: PathBuf,

    /// Worker threads (default: available parallelism)
    #[arg(long)]
    workers: Option<usize>,

    /// Leave the CSV files uncompressed
    #[arg(long)]
    no_compress: bool,

    /// Keep each CSV next to its .csv.gz
    #[arg(long)]
    keep_csv: bool,

    /// Gzip level 0-9
    #[arg(long, default_value_t = DEFAULT_COMPRESSION_LEVEL)]
    compression_level: u32,

    /// Server-side timeout for one history request, in seconds
    #[arg(long, default_value_t = 2400)]
    history_timeout_secs: u64,

    /// Attempts at opening each history stream
    #[arg(long, default_value_t = 1)]
    open_attempts: u32,

    /// Backoff between open attempts, multiplied by the attempt number
    #[arg(long, default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Write a JSON run report to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let service = match cli.service {
        Some(service) => service,
        None => prompt("Service name")?,
    };
    let start = match cli.start {
        Some(start) => start,
        None => prompt("Start date (YYYY-MM-DD)")?,
    };
    let end = match cli.end {
        Some(end) => end,
        None => prompt("End date (YYYY-MM-DD)")?,
    };
    let batch_months = match cli.batch_months {
        Some(months) => months,
        None => prompt("Months per batch")?
            .parse()
            .context("batch months must be a whole number")?,
    };
    let output_dir = match cli.output_dir {
        Some(dir) => dir,
        None => default_output_dir()?,
    };

    let start = parse_utc(&start).context("invalid start date")?;
    let end = parse_utc(&end).context("invalid end date")?;

    let mut config = RunConfig::new(service, start, end, output_dir);
    config.batch_months = batch_months;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.compress = !cli.no_compress;
    config.keep_uncompressed = cli.keep_csv;
    config.compression_level = cli.compression_level;
    config.history_timeout = Duration::from_secs(cli.history_timeout_secs);
    config.retry = RetryPolicy::new(
        cli.open_attempts,
        Duration::from_millis(cli.retry_backoff_ms),
    );

    info!("Source: {}", cli.source_dir.display());
    info!("Output: {}", config.output_dir.display());
    let source = DirectorySource::new(cli.source_dir);

    let cancel = CancelToken::new();
    watch_interrupt(cancel.clone())?;

    let report = run_export(&config, &source, &cancel)
        .with_context(|| format!("export of service {} failed", config.service))?;

    for outcome in report.outcomes() {
        if let UnitStatus::Failed(err) = &outcome.status {
            println!("FAILED {}: {err}", outcome.unit);
        }
    }
    println!("{}", report.summary());

    if let Some(path) = cli.report {
        report
            .write_json(&path)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        info!("Report written to {}", path.display());
    }
    if report.cancelled() > 0 {
        warn!("run interrupted, {} units not exported", report.cancelled());
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read answer")?;
    let answer = line.trim();
    if answer.is_empty() {
        bail!("no value given for {label}");
    }
    Ok(answer.to_string())
}

fn default_output_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot locate executable")?;
    let dir = exe
        .parent()
        .context("executable has no parent directory")?;
    Ok(dir.join("Data"))
}

/// Forward Ctrl-C to `cancel`. Units in flight stop between samples; a
/// second Ctrl-C exits immediately.
fn watch_interrupt(cancel: CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    thread::Builder::new()
        .name("histpull-interrupt".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if let Err(err) = signal::ctrl_c().await {
                    warn!("interrupt handling unavailable: {err}");
                    return;
                }
                warn!("interrupt received, cancelling remaining units (Ctrl-C again to abort)");
                cancel.cancel();
                if signal::ctrl_c().await.is_ok() {
                    warn!("second interrupt received, aborting");
                    std::process::exit(INTERRUPT_EXIT_CODE);
                }
            });
        })
        .context("failed to spawn interrupt watcher")?;
    Ok(())
}
