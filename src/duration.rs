//! Conversion between a wall-clock duration in whole seconds and Slurm's
//! `[D-]HH:MM:SS` time-limit notation.
use regex::Regex;

use crate::error::FormatError;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Render `seconds` as `D-HH:MM:SS`.  The day component is always present.
pub fn format_duration(seconds: u64) -> String {
    let days = seconds / DAY;
    let hours = (seconds % DAY) / HOUR;
    let mins = (seconds % HOUR) / MINUTE;
    let secs = seconds % MINUTE;
    format!("{}-{:02}:{:02}:{:02}", days, hours, mins, secs)
}

/// Parse a time limit in `[D-]HH:MM:SS` form into seconds.
///
/// Hours, minutes and seconds must be exactly two digits each; the day
/// component is optional and defaults to zero.
pub fn parse_duration(s: &str) -> Result<u64, FormatError> {
    lazy_static::lazy_static! {
        static ref FORMAT: Regex =
            Regex::new(r"^(?:(?P<days>\d+)-)?(?P<hours>\d{2}):(?P<mins>\d{2}):(?P<secs>\d{2})$")
                .unwrap();
    }
    let make_error = || FormatError::Duration(s.to_string());

    let captures = FORMAT.captures(s).ok_or_else(make_error)?;

    let parse_optional_field = |n| -> Result<u64, FormatError> {
        match captures.name(n) {
            Some(m) => m.as_str().parse().map_err(|_| make_error()),
            None => Ok(0),
        }
    };

    let days = parse_optional_field("days")?;
    let hrs = parse_optional_field("hours")?;
    let min = parse_optional_field("mins")?;
    let secs = parse_optional_field("secs")?;

    days.checked_mul(DAY)
        .and_then(|d| d.checked_add(hrs * HOUR + min * MINUTE + secs))
        .ok_or_else(make_error)
}
