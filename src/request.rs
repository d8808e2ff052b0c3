//! Input line validation
//!
//! Each input line has the shape `days|location`, for example `3|10001`.

use std::fmt;

use tracing::warn;

use crate::{MAX_FORECAST_DAYS, RawRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Line did not split into exactly two fields
    FieldCount { line: usize, found: usize },

    /// Day count was not a positive integer
    InvalidDays { line: usize, value: String },

    /// Location field was blank
    EmptyLocation { line: usize },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::FieldCount { line, found } => write!(
                f,
                "line {line}: expected two fields (days and ZIP code, separated by '|'), found {found}"
            ),
            ParseError::InvalidDays { line, value } => write!(
                f,
                "line {line}: the number of days must be a positive number, got '{value}'"
            ),
            ParseError::EmptyLocation { line } => write!(f, "line {line}: ZIP code is empty"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse one input line into a [`RawRequest`].
///
/// Day counts above [`MAX_FORECAST_DAYS`] are clamped with a warning.
pub fn parse_line(text: &str, line: usize) -> Result<RawRequest, ParseError> {
    let fields: Vec<&str> = text.split('|').collect();
    if fields.len() != 2 {
        return Err(ParseError::FieldCount {
            line,
            found: fields.len(),
        });
    }

    let days_field = fields[0].trim();
    let location_code = fields[1].trim();

    let day_count = match days_field.parse::<i64>() {
        Ok(days) if days > 0 => days,
        _ => {
            return Err(ParseError::InvalidDays {
                line,
                value: days_field.to_string(),
            });
        }
    };

    if location_code.is_empty() {
        return Err(ParseError::EmptyLocation { line });
    }

    let day_count = if day_count > MAX_FORECAST_DAYS as i64 {
        warn!("line {line}: {day_count} days requested, clamping to {MAX_FORECAST_DAYS}");
        MAX_FORECAST_DAYS
    } else {
        day_count as u32
    };

    Ok(RawRequest {
        day_count,
        location_code: location_code.to_string(),
        source_line: line,
    })
}
