//! Exchange marker parsing.
//!
//! Generated dialogue numbers each doctor/patient pair with a line such as
//! `#3`. The model's output is free-form, so markers are best-effort: lines
//! that look like markers but do not hold a number are noise, not errors.

/// Character that opens an exchange marker line
pub const EXCHANGE_MARKER: char = '#';

/// Return the highest exchange number marked in `text`, or 0 if none.
///
/// Only lines that start with [`EXCHANGE_MARKER`] are considered. Duplicate
/// and out-of-order markers are fine since only the maximum is reported.
pub fn last_exchange_number(text: &str) -> u32 {
    text.trim()
        .lines()
        .filter(|line| line.starts_with(EXCHANGE_MARKER))
        .filter_map(parse_marker)
        .max()
        .unwrap_or(0)
}

fn parse_marker(line: &str) -> Option<u32> {
    line.replace(EXCHANGE_MARKER, "").trim().parse().ok()
}
