//! Small per-dataset helpers used when preparing rows for the store:
//! id assignment, elevation ranges, JSON side columns, and deduplication
//! against rows that are already stored.

use std::{collections::HashSet, sync::OnceLock};

use regex::Regex;
use serde_json::{Map, Value as JsonValue};

/// Consecutive ids starting at `start`, typically [`crate::store::Store::next_id`].
pub fn assign_ids(start: i64, count: usize) -> Vec<i64> {
    (start..).take(count).collect()
}

/// Id column naming convention of the sightings schema: `taxa` keys on
/// `taxon_id`, every other plural table on `<singular>_id`.
pub fn default_id_column(table: &str) -> String {
    if table == "taxa" {
        return "taxon_id".to_string();
    }
    let singular = table.strip_suffix('s').unwrap_or(table);
    format!("{singular}_id")
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElevationRange {
    pub low: f64,
    pub high: f64,
}

impl ElevationRange {
    pub fn midpoint(&self) -> f64 {
        (self.low + self.high) / 2.0
    }

    /// Half the span, so `midpoint ± radius` covers the range.
    pub fn radius(&self) -> f64 {
        (self.high - self.low) / 2.0
    }
}

fn elevation_regex() -> &'static Regex {
    static ELEVATION: OnceLock<Regex> = OnceLock::new();
    ELEVATION.get_or_init(|| {
        Regex::new(
            r"(?ix)^\s*
              (?P<low>\d[\d.,]*)
              (?:\s*(?:-|–|—|to|a)\s*(?P<high>\d[\d.,]*))?
              \s*(?:m|msnm|masl|meters|metres|metros)?\.?\s*$",
        )
        .expect("elevation pattern is valid")
    })
}

fn thousands_regex() -> &'static Regex {
    static THOUSANDS: OnceLock<Regex> = OnceLock::new();
    THOUSANDS.get_or_init(|| {
        Regex::new(r"^\d{1,3}(?:[.,]\d{3})+$").expect("thousands pattern is valid")
    })
}

fn parse_elevation_number(text: &str) -> Option<f64> {
    let cleaned = if thousands_regex().is_match(text) {
        text.replace(['.', ','], "")
    } else {
        text.replace(',', ".")
    };
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses field notations such as `1200`, `1200-1500 m` or `1.200–1.500 msnm`.
/// Reversed bounds are swapped; anything unrecognised is `None`.
pub fn parse_elevation_range(text: &str) -> Option<ElevationRange> {
    let captures = elevation_regex().captures(text)?;
    let low = parse_elevation_number(captures.name("low")?.as_str())?;
    let high = match captures.name("high") {
        Some(high) => parse_elevation_number(high.as_str())?,
        None => low,
    };
    Some(ElevationRange {
        low: low.min(high),
        high: low.max(high),
    })
}

/// Packs side columns into one JSON object, leaving out missing and empty
/// values.
pub fn json_object<'a>(fields: impl IntoIterator<Item = (&'a str, Option<&'a str>)>) -> JsonValue {
    let mut object = Map::new();
    for (field, value) in fields {
        match value {
            Some(value) if !value.is_empty() => {
                object.insert(field.to_string(), JsonValue::String(value.to_string()));
            }
            _ => {}
        }
    }
    JsonValue::Object(object)
}

/// Indices of rows whose key is neither stored already nor repeated earlier
/// in the batch.
pub fn drop_existing<'a>(
    keys: impl IntoIterator<Item = &'a str>,
    existing: &HashSet<String>,
) -> Vec<usize> {
    let mut seen = HashSet::new();
    keys.into_iter()
        .enumerate()
        .filter(|(_, key)| !existing.contains(*key) && seen.insert(*key))
        .map(|(idx, _)| idx)
        .collect()
}

/// Collapses whitespace runs in a species string.
pub fn scientific_name(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn genus(text: &str) -> Option<&str> {
    text.split_whitespace().next()
}
