//! Row anonymization applied to query results before they reach the caller.
//!
//! A field spec names a strategy, optionally with options:
//!
//! ```json
//! { "email": "email", "phone": { "strategy": "mask", "options": { "visible": 2 } } }
//! ```
//!
//! Stored data is never touched; only the returned rows are transformed.

use crate::error::{DbError, DbResult};
use crate::models::Row;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const DEFAULT_MASK_CHAR: char = '*';
const DEFAULT_VISIBLE: usize = 4;
const REDACTED: &str = "[REDACTED]";

/// How one field is anonymized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldSpec {
    Strategy(String),
    Configured {
        strategy: String,
        #[serde(default)]
        options: Map<String, JsonValue>,
    },
}

impl FieldSpec {
    pub fn strategy(&self) -> &str {
        match self {
            Self::Strategy(name) => name,
            Self::Configured { strategy, .. } => strategy,
        }
    }

    pub fn options(&self) -> Option<&Map<String, JsonValue>> {
        match self {
            Self::Strategy(_) => None,
            Self::Configured { options, .. } => Some(options),
        }
    }

    fn option_str(&self, key: &str) -> Option<&str> {
        self.options()?.get(key)?.as_str()
    }

    fn option_usize(&self, key: &str) -> Option<usize> {
        self.options()?
            .get(key)?
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
    }
}

impl From<&str> for FieldSpec {
    fn from(name: &str) -> Self {
        Self::Strategy(name.to_string())
    }
}

/// Field name to spec. Ordered so logs and cache keys are stable.
pub type FieldSpecs = BTreeMap<String, FieldSpec>;

/// Transforms sensitive values in a row. Must not have side effects.
pub trait Anonymizer: Send + Sync {
    /// Return `row` with the same keys and the fields named in `specs` transformed.
    /// Fields absent from the row are skipped.
    fn anonymize(&self, row: Row, specs: &FieldSpecs) -> DbResult<Row>;
}

/// Built-in strategies: `redact`, `null`, `mask`, `email` and `hash`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskingAnonymizer;

impl MaskingAnonymizer {
    pub fn new() -> Self {
        Self
    }

    fn apply(&self, field: &str, value: &JsonValue, spec: &FieldSpec) -> DbResult<JsonValue> {
        if value.is_null() {
            return Ok(JsonValue::Null);
        }
        let text = value_text(value);
        let out = match spec.strategy() {
            "redact" => JsonValue::String(
                spec.option_str("replacement").unwrap_or(REDACTED).to_string(),
            ),
            "null" => JsonValue::Null,
            "mask" => {
                let visible = spec.option_usize("visible").unwrap_or(DEFAULT_VISIBLE);
                JsonValue::String(mask(&text, visible, mask_char(spec)?))
            }
            "email" => JsonValue::String(mask_email(&text, mask_char(spec)?)),
            "hash" => {
                let salt = spec.option_str("salt").unwrap_or_default();
                let mut hasher = Sha256::new();
                hasher.update(salt.as_bytes());
                hasher.update(text.as_bytes());
                JsonValue::String(hex::encode(hasher.finalize()))
            }
            other => {
                return Err(DbError::anonymization(format!(
                    "Unknown anonymization strategy '{other}' for field '{field}'"
                )));
            }
        };
        Ok(out)
    }
}

impl Anonymizer for MaskingAnonymizer {
    fn anonymize(&self, mut row: Row, specs: &FieldSpecs) -> DbResult<Row> {
        for (field, spec) in specs {
            if let Some(value) = row.get_mut(field) {
                *value = self.apply(field, value, spec)?;
            }
        }
        Ok(row)
    }
}

fn value_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn mask_char(spec: &FieldSpec) -> DbResult<char> {
    match spec.option_str("char") {
        None => Ok(DEFAULT_MASK_CHAR),
        Some(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(DbError::anonymization(format!(
                    "Mask 'char' must be a single character, got {s:?}"
                ))),
            }
        }
    }
}

/// Replace all but the last `visible` characters.
fn mask(text: &str, visible: usize, with: char) -> String {
    let len = text.chars().count();
    let keep = visible.min(len);
    text.chars()
        .enumerate()
        .map(|(i, c)| if i < len - keep { with } else { c })
        .collect()
}

/// `john.doe@example.com` becomes `j*******@example.com`.
fn mask_email(text: &str, with: char) -> String {
    match text.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let mut chars = local.chars();
            let first = chars.next().map(String::from).unwrap_or_default();
            let hidden: String = chars.map(|_| with).collect();
            format!("{first}{hidden}@{domain}")
        }
        _ => mask(text, 0, with),
    }
}
