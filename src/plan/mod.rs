//! Expansion of a tag list and a date range into independent work units.

mod naming;

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::calendar::{add_months, display};
use crate::error::PlanError;

pub use naming::{escape_component, unit_file_name, OUTPUT_EXTENSION};

/// One tag over one window, bound to the file it is exported into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    tag: String,
    window_start: OffsetDateTime,
    window_end: OffsetDateTime,
    output_path: PathBuf,
}

impl WorkUnit {
    fn new(tag: &str, window: Window, out_dir: &Path) -> Self {
        Self {
            tag: tag.to_string(),
            window_start: window.start,
            window_end: window.end,
            output_path: out_dir.join(unit_file_name(tag, window.start, window.end)),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn window_start(&self) -> OffsetDateTime {
        self.window_start
    }

    pub fn window_end(&self) -> OffsetDateTime {
        self.window_end
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}, {})",
            self.tag,
            display(self.window_start),
            display(self.window_end)
        )
    }
}

/// Half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

/// Split `[start, end)` into consecutive windows of `batch_months` months.
///
/// Boundary k is `start + k * batch_months`, so clamped month ends do not
/// drift across windows. The last window is clipped to `end`.
pub fn windows(
    start: OffsetDateTime,
    end: OffsetDateTime,
    batch_months: u32,
) -> Result<Vec<Window>, PlanError> {
    if batch_months == 0 {
        return Err(PlanError::InvalidBatchWidth);
    }
    if start >= end {
        return Err(PlanError::InvalidRange {
            start: display(start),
            end: display(end),
        });
    }

    let mut out = Vec::new();
    let mut cur = start;
    let mut step: u32 = 1;
    while cur < end {
        // Past the representable calendar means past `end`.
        let next = step
            .checked_mul(batch_months)
            .and_then(|months| add_months(start, months))
            .map_or(end, |next| next.min(end));
        out.push(Window { start: cur, end: next });
        cur = next;
        step = step.saturating_add(1);
    }
    Ok(out)
}

/// Build every work unit for `tags` x windows of `[start, end)`.
///
/// Units are ordered by tag (first occurrence) and then by window start.
/// Blank and repeated tags are ignored. Touches neither the filesystem nor
/// the data source.
pub fn plan<I, T>(
    tags: I,
    start: OffsetDateTime,
    end: OffsetDateTime,
    batch_months: u32,
    out_dir: &Path,
) -> Result<Vec<WorkUnit>, PlanError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let windows = windows(start, end, batch_months)?;
    let mut seen = HashSet::new();
    let mut units = Vec::new();
    for tag in tags {
        let tag = tag.as_ref();
        if tag.trim().is_empty() || !seen.insert(tag.to_string()) {
            continue;
        }
        units.extend(windows.iter().map(|window| WorkUnit::new(tag, *window, out_dir)));
    }
    Ok(units)
}
