//! Compact job-array index syntax: `1,4,10-20:2`.
use std::collections::BTreeSet;
use std::fmt::{self, Display};
use std::str::FromStr;

use regex::Regex;

use crate::error::FormatError;

/// A sorted, deduplicated set of job array indices.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ArrayRange(Vec<usize>);

impl ArrayRange {
    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

impl IntoIterator for ArrayRange {
    type Item = usize;
    type IntoIter = std::vec::IntoIter<usize>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromStr for ArrayRange {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_array_range(s).map(ArrayRange)
    }
}

impl Display for ArrayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_array_indices(self.iter()))
    }
}

/// Largest array Slurm can be configured to accept (`MaxArraySize`).
pub const MAX_ARRAY_INDICES: usize = 4_000_001;

/// Expand a comma-separated list of indices and `start-stop[:step]` ranges.
///
/// Ranges include `stop`.  Empty tokens are skipped, so `1,,2,` is accepted.
/// A range whose start exceeds its stop expands to nothing.  More than
/// [`MAX_ARRAY_INDICES`] distinct indices is a [`FormatError::TooManyIndices`].
pub fn parse_array_range(spec: &str) -> Result<Vec<usize>, FormatError> {
    lazy_static::lazy_static! {
        static ref RANGE: Regex =
            Regex::new(r"^(?P<start>\d+)-(?P<stop>\d+)(?::(?P<step>\d+))?$").unwrap();
    }

    let mut indices = BTreeSet::new();

    for token in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let make_error = || FormatError::ArrayToken(token.to_string());
        let parse_int = |s: &str| s.parse::<usize>().map_err(|_| make_error());

        match RANGE.captures(token) {
            Some(c) => {
                let start = parse_int(&c["start"])?;
                let stop = parse_int(&c["stop"])?;
                let step = match c.name("step") {
                    Some(m) => parse_int(m.as_str())?,
                    None => 1,
                };
                if step == 0 {
                    return Err(FormatError::ZeroStep(token.to_string()));
                }
                if start <= stop && (stop - start) / step >= MAX_ARRAY_INDICES {
                    return Err(FormatError::TooManyIndices(token.to_string()));
                }
                indices.extend((start..=stop).step_by(step));
            }
            None => {
                if !token.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(make_error());
                }
                indices.insert(parse_int(token)?);
            }
        }
        if indices.len() > MAX_ARRAY_INDICES {
            return Err(FormatError::TooManyIndices(spec.to_string()));
        }
    }

    Ok(indices.into_iter().collect())
}

/// Inverse of [`parse_array_range`]: collapse ascending indices into runs.
///
/// Runs of two are written as a pair (`0,1`), longer runs as `start-stop`.
pub fn format_array_indices(vals: impl IntoIterator<Item = usize>) -> String {
    use std::fmt::Write;

    fn fmt_group(s: &mut String, start: usize, end: usize) {
        let _ = match end - start {
            0 => write!(s, "{}", start),
            1 => write!(s, "{},{}", start, end),
            _ => write!(s, "{}-{}", start, end),
        };
    }

    let mut iter = vals.into_iter();
    let mut s = String::new();
    let mut prev = match iter.next() {
        Some(i) => i,
        None => return s,
    };
    let mut group_start = prev;

    for n in iter {
        debug_assert!(prev < n);
        if prev + 1 < n {
            fmt_group(&mut s, group_start, prev);
            s.push(',');
            group_start = n;
        }
        prev = n;
    }
    fmt_group(&mut s, group_start, prev);
    s
}
