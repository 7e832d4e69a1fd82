//! UTC calendar helpers: month arithmetic, input parsing and file stamps.

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::error::ConfigError;

/// Add whole calendar months, clamping the day to the end of the target month.
///
/// Returns `None` when the result leaves the representable calendar.
pub fn add_months(at: OffsetDateTime, months: u32) -> Option<OffsetDateTime> {
    let at = at.to_offset(UtcOffset::UTC);
    let index = i64::from(at.year()) * 12 + i64::from(u8::from(at.month()) - 1) + i64::from(months);
    let year = i32::try_from(index.div_euclid(12)).ok()?;
    let month = Month::try_from(index.rem_euclid(12) as u8 + 1).ok()?;
    let day = at.day().min(month.length(year));
    let date = Date::from_calendar_date(year, month, day).ok()?;
    Some(PrimitiveDateTime::new(date, at.time()).assume_utc())
}

/// Sortable, filesystem-legal stamp: `YYYYMMDDTHHMMSSZ`.
pub fn file_stamp(at: OffsetDateTime) -> String {
    let at = at.to_offset(UtcOffset::UTC);
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

/// Human-readable UTC rendering used in log lines.
pub fn display(at: OffsetDateTime) -> String {
    let at = at.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

/// Parse `YYYY-MM-DD`, optionally followed by `HH:MM[:SS]` separated by a
/// space or `T`, with an optional trailing `Z`. Input is taken as UTC.
pub fn parse_utc(input: &str) -> Result<OffsetDateTime, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidDate {
        value: input.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = input.trim();
    let trimmed = trimmed.strip_suffix('Z').unwrap_or(trimmed);
    let (date_part, time_part) = match trimmed.find(|c: char| c == 'T' || c == ' ') {
        Some(idx) => (&trimmed[..idx], Some(trimmed[idx + 1..].trim())),
        None => (trimmed, None),
    };

    let date_fields: Vec<&str> = date_part.split('-').collect();
    if date_fields.len() != 3
        || date_fields[0].len() != 4
        || date_fields[1].len() != 2
        || date_fields[2].len() != 2
    {
        return Err(invalid("expected YYYY-MM-DD"));
    }
    let year = parse_digits(date_fields[0]).ok_or_else(|| invalid("year is not numeric"))?;
    let month = parse_digits(date_fields[1]).ok_or_else(|| invalid("month is not numeric"))?;
    let day = parse_digits(date_fields[2]).ok_or_else(|| invalid("day is not numeric"))?;

    let month = Month::try_from(month as u8).map_err(|_| invalid("month out of range"))?;
    let date = Date::from_calendar_date(year as i32, month, day as u8)
        .map_err(|_| invalid("day out of range"))?;

    let time = match time_part {
        None | Some("") => Time::MIDNIGHT,
        Some(value) => {
            let fields: Vec<&str> = value.split(':').collect();
            if !(2..=3).contains(&fields.len()) || fields.iter().any(|f| f.len() != 2) {
                return Err(invalid("expected HH:MM or HH:MM:SS"));
            }
            let mut parts = [0u32; 3];
            for (slot, field) in parts.iter_mut().zip(&fields) {
                *slot = parse_digits(field).ok_or_else(|| invalid("time is not numeric"))?;
            }
            Time::from_hms(parts[0] as u8, parts[1] as u8, parts[2] as u8)
                .map_err(|_| invalid("time out of range"))?
        }
    };

    Ok(PrimitiveDateTime::new(date, time).assume_utc())
}

fn parse_digits(value: &str) -> Option<u32> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}
