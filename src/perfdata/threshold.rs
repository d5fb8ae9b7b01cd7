//! Numeric normalisation and warn/crit threshold classification

use std::collections::HashMap;

use super::ParseError;

/// Marker for an unbounded side of a range
const INFINITY: &str = "~";

/// Prefix that inverts a range to alert inside of it
const INSIDE_MARKER: char = '@';

/// Normalise a numeric string.
///
/// A comma decimal separator becomes a dot, integral values get `.0`
/// appended. Everything else passes through untouched.
pub fn normalize_number(input: &str) -> Result<String, ParseError> {
    let normalized = input.trim().replace(',', ".");
    let numeric_chars = normalized
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+'));
    if !numeric_chars || normalized.parse::<f64>().is_err() {
        return Err(ParseError::InvalidNumber(input.to_string()));
    }

    if normalized.contains('.') {
        Ok(normalized)
    } else {
        Ok(format!("{normalized}.0"))
    }
}

/// Parsed form of a warn or crit segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThresholdSpec {
    Absent,
    Plain(String),
    OuterRange { min: String, max: String },
    InnerRange { min: String, max: String },
}

fn is_finite_bound(bound: &str) -> bool {
    !bound.is_empty() && bound != INFINITY
}

impl ThresholdSpec {
    /// Classify one threshold segment.
    ///
    /// A range with one open or infinite side collapses to a plain
    /// threshold on its finite side.
    pub fn classify(segment: &str) -> Result<Self, ParseError> {
        let segment = segment.trim();
        if segment.is_empty() {
            return Ok(Self::Absent);
        }

        let (inside, body) = match segment.strip_prefix(INSIDE_MARKER) {
            Some(body) => (true, body),
            None => (false, segment),
        };

        let Some((low, high)) = body.split_once(':') else {
            return Ok(Self::Plain(normalize_number(body)?));
        };

        match (is_finite_bound(low), is_finite_bound(high)) {
            (true, true) => {
                let min = normalize_number(low)?;
                let max = normalize_number(high)?;
                if inside {
                    Ok(Self::InnerRange { min, max })
                } else {
                    Ok(Self::OuterRange { min, max })
                }
            }
            (true, false) => Ok(Self::Plain(normalize_number(low)?)),
            (false, true) => Ok(Self::Plain(normalize_number(high)?)),
            (false, false) => Ok(Self::Absent),
        }
    }

    /// Write the fields and fill tag for this threshold under `kind`
    /// (`warn` or `crit`).
    pub fn apply(
        self,
        kind: &str,
        fields: &mut HashMap<String, String>,
        tags: &mut HashMap<String, String>,
    ) {
        let fill_key = format!("{kind}-fill");
        match self {
            Self::Absent => {}
            Self::Plain(value) => {
                fields.insert(kind.to_string(), value);
                tags.insert(fill_key, "none".to_string());
            }
            Self::OuterRange { min, max } => {
                fields.insert(format!("{kind}-min"), min);
                fields.insert(format!("{kind}-max"), max);
                tags.insert(fill_key, "outer".to_string());
            }
            Self::InnerRange { min, max } => {
                fields.insert(format!("{kind}-min"), min);
                fields.insert(format!("{kind}-max"), max);
                tags.insert(fill_key, "inner".to_string());
            }
        }
    }
}
