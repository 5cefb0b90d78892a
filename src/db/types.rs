//! Decoding of driver rows into JSON rows.
//!
//! Columns are first classified by their reported type name, then each backend
//! probes the matching Rust types in order. A probe that the driver rejects as
//! incompatible falls through to the next candidate, so an unusual column still
//! ends up as text or base64 rather than an error.

use crate::models::{DatabaseType, Row};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value as JsonValue;
use sqlx::error::BoxDynError;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row as _, Type, TypeInfo};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Temporal,
    Text,
    Binary,
    Json,
    Uuid,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Checked first: "numeric" would otherwise be taken for a float below.
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC affinity stores plain integers or reals
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }
    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }
    if lower == "uuid" {
        return TypeCategory::Uuid;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }
    if lower.contains("date") || lower.contains("time") {
        return TypeCategory::Temporal;
    }
    if lower.contains("char") || lower.contains("text") || lower == "enum" || lower == "set" {
        return TypeCategory::Text;
    }
    TypeCategory::Unknown
}

/// Conversion from a driver row into a [`Row`].
pub trait RowToJson {
    fn to_row(&self) -> Row;
}

impl RowToJson for MySqlRow {
    fn to_row(&self) -> Row {
        self.columns()
            .iter()
            .map(|col| {
                let category = categorize_type(col.type_info().name(), DatabaseType::MySQL);
                (col.name().to_string(), mysql::decode_column(self, col.ordinal(), category))
            })
            .collect()
    }
}

impl RowToJson for PgRow {
    fn to_row(&self) -> Row {
        self.columns()
            .iter()
            .map(|col| {
                let category = categorize_type(col.type_info().name(), DatabaseType::PostgreSQL);
                (col.name().to_string(), postgres::decode_column(self, col.ordinal(), category))
            })
            .collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_row(&self) -> Row {
        self.columns()
            .iter()
            .map(|col| {
                let category = categorize_type(col.type_info().name(), DatabaseType::SQLite);
                (col.name().to_string(), sqlite::decode_column(self, col.ordinal(), category))
            })
            .collect()
    }
}

/// Try to read column `idx` as `T`.
///
/// `None` means the driver rejected the type; `Some(None)` is a SQL NULL.
fn probe<'r, R, T>(row: &'r R, idx: usize) -> Option<Option<T>>
where
    R: sqlx::Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, usize>(idx).ok()
}

fn probe_json<'r, R, T>(row: &'r R, idx: usize) -> Option<Option<JsonValue>>
where
    R: sqlx::Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database> + Into<JsonValue>,
{
    probe::<R, T>(row, idx).map(|v| v.map(Into::into))
}

fn binary_value(bytes: Vec<u8>) -> JsonValue {
    JsonValue::String(STANDARD.encode(bytes))
}

fn finish(decoded: Option<Option<JsonValue>>) -> JsonValue {
    decoded.flatten().unwrap_or(JsonValue::Null)
}

/// Exact DECIMAL/NUMERIC text, without going through a float.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl From<RawDecimal> for JsonValue {
    fn from(value: RawDecimal) -> Self {
        JsonValue::String(value.0)
    }
}

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("NUMERIC")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        ty.name().eq_ignore_ascii_case("numeric")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => pg_numeric_text(value.as_bytes()?).map(RawDecimal),
        }
    }
}

/// Render PostgreSQL's binary NUMERIC (base-10000 digits) as decimal text.
fn pg_numeric_text(buf: &[u8]) -> Result<String, BoxDynError> {
    use std::fmt::Write as _;

    if buf.len() < 8 {
        return Err("numeric value too short".into());
    }
    let read_u16 = |at: usize| u16::from_be_bytes([buf[at], buf[at + 1]]);
    let ndigits = usize::from(read_u16(0));
    let weight = i32::from(read_u16(2) as i16);
    let sign = read_u16(4);
    let dscale = usize::from(read_u16(6));
    if buf.len() < 8 + ndigits * 2 {
        return Err("numeric value truncated".into());
    }
    if sign == 0xC000 {
        return Ok("NaN".to_string());
    }

    let digit_at = |pos: i32| -> u16 {
        usize::try_from(pos)
            .ok()
            .filter(|p| *p < ndigits)
            .map(|p| read_u16(8 + p * 2))
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for pos in 0..=weight {
            if pos == 0 {
                write!(out, "{}", digit_at(pos))?;
            } else {
                write!(out, "{:04}", digit_at(pos))?;
            }
        }
    }
    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut pos = weight + 1;
        while frac.len() < dscale {
            write!(frac, "{:04}", digit_at(pos))?;
            pos += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}

/// PostgreSQL UUID rendered in its canonical hyphenated form.
#[derive(Debug)]
pub struct RawUuid(pub String);

impl From<RawUuid> for JsonValue {
    fn from(value: RawUuid) -> Self {
        JsonValue::String(value.0)
    }
}

impl Type<sqlx::Postgres> for RawUuid {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("UUID")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        ty.name().eq_ignore_ascii_case("uuid")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawUuid {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawUuid(value.as_str()?.to_string())),
            PgValueFormat::Binary => {
                let bytes = value.as_bytes()?;
                if bytes.len() != 16 {
                    return Err(format!("uuid has {} bytes", bytes.len()).into());
                }
                let hex = hex::encode(bytes);
                Ok(RawUuid(format!(
                    "{}-{}-{}-{}-{}",
                    &hex[0..8],
                    &hex[8..12],
                    &hex[12..16],
                    &hex[16..20],
                    &hex[20..32]
                )))
            }
        }
    }
}

mod mysql {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub(super) fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        let decoded = match category {
            TypeCategory::Integer => probe_json::<_, i64>(row, idx)
                .or_else(|| probe_json::<_, u64>(row, idx)),
            TypeCategory::Float => probe_json::<_, f64>(row, idx)
                .or_else(|| probe::<_, f32>(row, idx).map(|v| v.map(|f| f64::from(f).into()))),
            TypeCategory::Decimal => probe_json::<_, RawDecimal>(row, idx),
            TypeCategory::Boolean => probe_json::<_, bool>(row, idx),
            TypeCategory::Json => probe::<_, JsonValue>(row, idx),
            TypeCategory::Binary => probe::<_, Vec<u8>>(row, idx).map(|v| v.map(binary_value)),
            TypeCategory::Temporal => temporal(row, idx),
            TypeCategory::Text | TypeCategory::Uuid | TypeCategory::Unknown => None,
        };
        finish(decoded.or_else(|| fallback(row, idx)))
    }

    fn temporal(row: &MySqlRow, idx: usize) -> Option<Option<JsonValue>> {
        probe::<_, DateTime<Utc>>(row, idx)
            .map(|v| v.map(|t| JsonValue::String(t.to_rfc3339())))
            .or_else(|| {
                probe::<_, NaiveDateTime>(row, idx).map(|v| v.map(|t| t.to_string().into()))
            })
            .or_else(|| probe::<_, NaiveDate>(row, idx).map(|v| v.map(|t| t.to_string().into())))
            .or_else(|| probe::<_, NaiveTime>(row, idx).map(|v| v.map(|t| t.to_string().into())))
    }

    fn fallback(row: &MySqlRow, idx: usize) -> Option<Option<JsonValue>> {
        probe_json::<_, String>(row, idx)
            .or_else(|| probe::<_, Vec<u8>>(row, idx).map(|v| v.map(binary_value)))
    }
}

mod postgres {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub(super) fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        let decoded = match category {
            TypeCategory::Integer => probe_json::<_, i64>(row, idx)
                .or_else(|| probe_json::<_, i32>(row, idx))
                .or_else(|| probe_json::<_, i16>(row, idx)),
            TypeCategory::Float => probe_json::<_, f64>(row, idx)
                .or_else(|| probe::<_, f32>(row, idx).map(|v| v.map(|f| f64::from(f).into()))),
            TypeCategory::Decimal => probe_json::<_, RawDecimal>(row, idx),
            TypeCategory::Boolean => probe_json::<_, bool>(row, idx),
            TypeCategory::Json => probe::<_, JsonValue>(row, idx),
            TypeCategory::Uuid => probe_json::<_, RawUuid>(row, idx),
            TypeCategory::Binary => probe::<_, Vec<u8>>(row, idx).map(|v| v.map(binary_value)),
            TypeCategory::Temporal => temporal(row, idx),
            TypeCategory::Text | TypeCategory::Unknown => None,
        };
        finish(decoded.or_else(|| probe_json::<_, String>(row, idx)))
    }

    fn temporal(row: &PgRow, idx: usize) -> Option<Option<JsonValue>> {
        probe::<_, DateTime<Utc>>(row, idx)
            .map(|v| v.map(|t| JsonValue::String(t.to_rfc3339())))
            .or_else(|| {
                probe::<_, NaiveDateTime>(row, idx).map(|v| v.map(|t| t.to_string().into()))
            })
            .or_else(|| probe::<_, NaiveDate>(row, idx).map(|v| v.map(|t| t.to_string().into())))
            .or_else(|| probe::<_, NaiveTime>(row, idx).map(|v| v.map(|t| t.to_string().into())))
    }
}

mod sqlite {
    use super::*;

    /// SQLite is dynamically typed, so only booleans use the declared type.
    pub(super) fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
        let declared = match category {
            TypeCategory::Boolean => probe_json::<_, bool>(row, idx),
            _ => None,
        };
        finish(
            declared
                .or_else(|| probe_json::<_, i64>(row, idx))
                .or_else(|| probe_json::<_, f64>(row, idx))
                .or_else(|| probe_json::<_, String>(row, idx))
                .or_else(|| probe::<_, Vec<u8>>(row, idx).map(|v| v.map(binary_value))),
        )
    }
}
