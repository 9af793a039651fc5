//! Typed cell values and best-effort coercion.
//!
//! Source spreadsheets carry raw text. Each matched column is coerced to the
//! [`Value`] its [`SemanticType`] calls for; a cell that cannot be converted
//! keeps its original text as [`Cell::Uncoerced`] instead of failing the
//! extraction, so callers can see exactly which cells did not convert.

use std::{
    fmt,
    hash::{Hash, Hasher},
};

use anyhow::{Context, Result, anyhow, bail, ensure};

use crate::registry::SemanticType;

/// Tokens spreadsheets use for "no value". Matched exactly, like the usual
/// dataframe readers do.
const MISSING_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Text(String),
    Int(i32),
    Float(f32),
    Bool(bool),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // Bitwise so that rows holding floats stay usable as set keys.
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Text(s) => s.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
        }
    }
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Text(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// Outcome of coercing one source cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Cell {
    Typed(Value),
    /// Coercion failed; the original text is kept as-is.
    Uncoerced(String),
}

impl Cell {
    pub fn null() -> Self {
        Cell::Typed(Value::Null)
    }

    pub fn is_uncoerced(&self) -> bool {
        matches!(self, Cell::Uncoerced(_))
    }

    pub fn as_display(&self) -> String {
        match self {
            Cell::Typed(value) => value.as_display(),
            Cell::Uncoerced(raw) => raw.clone(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn is_missing_token(value: &str) -> bool {
    MISSING_TOKENS.contains(&value)
}

/// Maps a raw spreadsheet cell to `None` when it holds a missing-value token.
pub fn normalize_raw(value: String) -> Option<String> {
    if is_missing_token(&value) {
        None
    } else {
        Some(value)
    }
}

/// Coerces a raw cell, never failing: missing cells become `Null` and
/// unconvertible cells keep their text.
pub fn coerce(raw: Option<&str>, ty: SemanticType) -> Cell {
    let Some(raw) = raw else {
        return Cell::null();
    };
    match parse_typed_value(raw, ty) {
        Ok(value) => Cell::Typed(value),
        Err(_) => Cell::Uncoerced(raw.to_string()),
    }
}

pub fn parse_typed_value(value: &str, ty: SemanticType) -> Result<Value> {
    let parsed = match ty {
        SemanticType::Categorical
        | SemanticType::Text
        | SemanticType::Date
        | SemanticType::Time => Value::Text(value.to_string()),
        SemanticType::Int => Value::Int(parse_int(value)?),
        SemanticType::Numeric => {
            let parsed: f32 = value
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as numeric"))?;
            ensure!(parsed.is_finite(), "Failed to parse '{value}' as numeric");
            Value::Float(parsed)
        }
        SemanticType::YesNo => {
            let lowered = value.trim().to_lowercase();
            let parsed = match lowered.as_str() {
                "true" | "t" | "yes" | "y" | "si" | "sí" | "1" => true,
                "false" | "f" | "no" | "n" | "0" => false,
                _ => bail!("Failed to parse '{value}' as y/n"),
            };
            Value::Bool(parsed)
        }
    };
    Ok(parsed)
}

fn parse_int(value: &str) -> Result<i32> {
    let trimmed = value.trim();
    if let Ok(parsed) = trimmed.parse::<i32>() {
        return Ok(parsed);
    }
    // Spreadsheets often store whole numbers as "12.0".
    let float: f64 = trimmed
        .parse()
        .map_err(|_| anyhow!("Failed to parse '{value}' as integer"))?;
    ensure!(
        float.is_finite()
            && float.fract() == 0.0
            && float >= f64::from(i32::MIN)
            && float <= f64::from(i32::MAX),
        "Failed to parse '{value}' as integer"
    );
    Ok(float as i32)
}
