//! Row canonicalization
//!
//! Converts typed column values into the JSON form written to storage and
//! back. Timestamps become RFC 3339 text, dates ISO text, booleans JSON
//! booleans, JSON columns stay nested, NULL becomes `null`.
//!
//! Timestamps nested in JSON columns (such as the aggregated `files` array,
//! where the server renders them as `+00:00` text) are rewritten to the same
//! UTC form as top-level ones.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ExportError, Result};
use crate::query::catalog;

const LOCAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Value types the streamer knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    Numeric,
    Text,
    Timestamp,
    LocalTimestamp,
    Date,
    Uuid,
    Json,
    TextArray,
}

impl ColumnType {
    /// Map a PostgreSQL type name to a column type.
    ///
    /// # Returns
    /// * `Option<ColumnType>` - None for types rows cannot be exported with
    pub fn from_pg_name(name: &str) -> Option<Self> {
        let ty = match name.to_ascii_uppercase().as_str() {
            "BOOL" => ColumnType::Bool,
            "INT2" | "INT4" | "INT8" | "OID" => ColumnType::Int,
            "FLOAT4" | "FLOAT8" => ColumnType::Float,
            "NUMERIC" => ColumnType::Numeric,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" | "CITEXT" => ColumnType::Text,
            "TIMESTAMPTZ" => ColumnType::Timestamp,
            "TIMESTAMP" => ColumnType::LocalTimestamp,
            "DATE" => ColumnType::Date,
            "UUID" => ColumnType::Uuid,
            "JSON" | "JSONB" => ColumnType::Json,
            "TEXT[]" | "VARCHAR[]" | "_TEXT" | "_VARCHAR" => ColumnType::TextArray,
            _ => return None,
        };
        Some(ty)
    }
}

/// Result column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Numeric(Decimal),
    Text(String),
    Timestamp(DateTime<Utc>),
    LocalTimestamp(NaiveDateTime),
    Date(NaiveDate),
    Uuid(Uuid),
    Json(Value),
    TextArray(Vec<String>),
}

/// Object keys used for serialized rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyNaming {
    /// Storage column names as returned by the database
    #[default]
    Storage,
    /// External field names where the column translates, storage names otherwise
    External,
}

impl KeyNaming {
    pub fn from_flag(external: bool) -> Self {
        if external {
            KeyNaming::External
        } else {
            KeyNaming::Storage
        }
    }

    fn key_for(self, column: &str) -> String {
        match self {
            KeyNaming::Storage => column.to_string(),
            KeyNaming::External => {
                let field = catalog::to_external_field(column);
                if field.is_empty() {
                    column.to_string()
                } else {
                    field
                }
            }
        }
    }
}

/// Convert a value to its JSON form.
pub fn to_json(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(b) => Value::Bool(*b),
        SqlValue::Int(i) => Value::from(*i),
        SqlValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        SqlValue::Numeric(d) => d
            .normalize()
            .to_string()
            .parse::<serde_json::Number>()
            .map(Value::Number)
            .unwrap_or_else(|_| Value::String(d.to_string())),
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Timestamp(ts) => Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        SqlValue::LocalTimestamp(ts) => {
            Value::String(ts.format(LOCAL_TIMESTAMP_FORMAT).to_string())
        }
        SqlValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        SqlValue::Uuid(u) => Value::String(u.to_string()),
        SqlValue::Json(v) => normalize_nested_timestamps(v),
        SqlValue::TextArray(items) => {
            Value::Array(items.iter().cloned().map(Value::String).collect())
        }
    }
}

fn normalize_nested_timestamps(value: &Value) -> Value {
    match value {
        Value::String(s) => match DateTime::parse_from_rfc3339(s) {
            Ok(ts) => Value::String(
                ts.with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ),
            Err(_) => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(normalize_nested_timestamps).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize_nested_timestamps(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Recover a typed value from its JSON form.
///
/// # Arguments
/// * `value` - JSON produced by [`to_json`]
/// * `ty` - Declared type of the column
///
/// # Returns
/// * `Result<SqlValue>` - Typed value, or `Unexpected` when the JSON does not fit the type
pub fn from_json(value: &Value, ty: ColumnType) -> Result<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    let mismatch = || ExportError::Unexpected {
        message: format!("cannot decode {value} as {ty:?}"),
        context: None,
    };

    let decoded = match ty {
        ColumnType::Bool => SqlValue::Bool(value.as_bool().ok_or_else(mismatch)?),
        ColumnType::Int => SqlValue::Int(value.as_i64().ok_or_else(mismatch)?),
        ColumnType::Float => SqlValue::Float(value.as_f64().ok_or_else(mismatch)?),
        ColumnType::Numeric => {
            let text = match value {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.clone(),
                _ => return Err(mismatch()),
            };
            SqlValue::Numeric(
                Decimal::from_str(&text)
                    .or_else(|_| Decimal::from_scientific(&text))
                    .map_err(|_| mismatch())?,
            )
        }
        ColumnType::Text => SqlValue::Text(value.as_str().ok_or_else(mismatch)?.to_string()),
        ColumnType::Timestamp => {
            let text = value.as_str().ok_or_else(mismatch)?;
            SqlValue::Timestamp(
                DateTime::parse_from_rfc3339(text)
                    .map_err(|_| mismatch())?
                    .with_timezone(&Utc),
            )
        }
        ColumnType::LocalTimestamp => {
            let text = value.as_str().ok_or_else(mismatch)?;
            SqlValue::LocalTimestamp(
                NaiveDateTime::parse_from_str(text, LOCAL_TIMESTAMP_FORMAT)
                    .map_err(|_| mismatch())?,
            )
        }
        ColumnType::Date => {
            let text = value.as_str().ok_or_else(mismatch)?;
            SqlValue::Date(NaiveDate::from_str(text).map_err(|_| mismatch())?)
        }
        ColumnType::Uuid => {
            let text = value.as_str().ok_or_else(mismatch)?;
            SqlValue::Uuid(Uuid::parse_str(text).map_err(|_| mismatch())?)
        }
        ColumnType::Json => SqlValue::Json(value.clone()),
        ColumnType::TextArray => {
            let items = value.as_array().ok_or_else(mismatch)?;
            let strings = items
                .iter()
                .map(|item| item.as_str().map(String::from).ok_or_else(mismatch))
                .collect::<Result<Vec<_>>>()?;
            SqlValue::TextArray(strings)
        }
    };
    Ok(decoded)
}

/// Serialize one row as a compact JSON object, keys in column order.
pub fn encode_row(columns: &[Column], values: &[SqlValue], naming: KeyNaming) -> Result<String> {
    if columns.len() != values.len() {
        return Err(ExportError::Unexpected {
            message: format!(
                "row has {} values for {} columns",
                values.len(),
                columns.len()
            ),
            context: None,
        });
    }

    let mut object = Map::with_capacity(columns.len());
    for (column, value) in columns.iter().zip(values) {
        object.insert(naming.key_for(&column.name), to_json(value));
    }
    Ok(serde_json::to_string(&Value::Object(object))?)
}

/// Parse a serialized row back into typed values, in column order.
pub fn decode_row(columns: &[Column], text: &str, naming: KeyNaming) -> Result<Vec<SqlValue>> {
    let value: Value = serde_json::from_str(text)?;
    let object = value.as_object().ok_or_else(|| ExportError::Unexpected {
        message: "serialized row is not a JSON object".to_string(),
        context: None,
    })?;

    columns
        .iter()
        .map(|column| {
            let field = object
                .get(&naming.key_for(&column.name))
                .unwrap_or(&Value::Null);
            from_json(field, column.ty)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn granule_columns() -> Vec<Column> {
        vec![
            Column::new("granule_id", ColumnType::Text),
            Column::new("published", ColumnType::Bool),
            Column::new("created_at", ColumnType::Timestamp),
            Column::new("error", ColumnType::Json),
            Column::new("cmr_link", ColumnType::Text),
            Column::new("product_volume", ColumnType::Int),
        ]
    }

    fn granule_values() -> Vec<SqlValue> {
        vec![
            SqlValue::Text("MOD09GQ.A0501579".into()),
            SqlValue::Bool(false),
            SqlValue::Timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap()),
            SqlValue::Json(json!({"Error": "Timeout", "Cause": {"attempts": [1, 2]}})),
            SqlValue::Null,
            SqlValue::Int(1_048_576),
        ]
    }

    #[test]
    fn test_nested_timestamps_match_top_level_form() {
        let columns = vec![
            Column::new("created_at", ColumnType::Timestamp),
            Column::new("files", ColumnType::Json),
        ];
        let row = vec![
            SqlValue::Timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap()),
            SqlValue::Json(json!([
                {"key": "a.hdf", "created_at": "2024-03-01T12:30:05+00:00", "size": 10},
                {"key": "b.xml", "created_at": "2024-03-01T14:30:05.25+02:00", "type": null}
            ])),
        ];
        let text = encode_row(&columns, &row, KeyNaming::Storage).unwrap();
        assert_eq!(
            text,
            r#"{"created_at":"2024-03-01T12:30:05Z","files":[{"key":"a.hdf","created_at":"2024-03-01T12:30:05Z","size":10},{"key":"b.xml","created_at":"2024-03-01T12:30:05.250Z","type":null}]}"#
        );
    }

    #[test]
    fn test_encode_row_canonical_forms() {
        let text = encode_row(&granule_columns(), &granule_values(), KeyNaming::Storage).unwrap();
        assert_eq!(
            text,
            r#"{"granule_id":"MOD09GQ.A0501579","published":false,"created_at":"2024-03-01T12:30:05Z","error":{"Error":"Timeout","Cause":{"attempts":[1,2]}},"cmr_link":null,"product_volume":1048576}"#
        );
    }

    #[test]
    fn test_row_round_trip() {
        let columns = granule_columns();
        let values = granule_values();
        let text = encode_row(&columns, &values, KeyNaming::Storage).unwrap();
        assert_eq!(decode_row(&columns, &text, KeyNaming::Storage).unwrap(), values);
    }

    #[test]
    fn test_external_key_naming() {
        let text = encode_row(&granule_columns(), &granule_values(), KeyNaming::External).unwrap();
        let object: Value = serde_json::from_str(&text).unwrap();
        assert!(object.get("granuleId").is_some());
        assert!(object.get("cmrLink").is_some());
        assert!(object.get("productVolume").is_some());
        assert_eq!(
            decode_row(&granule_columns(), &text, KeyNaming::External).unwrap(),
            granule_values()
        );
    }

    #[test]
    fn test_other_types_round_trip() {
        let cases = vec![
            (
                ColumnType::LocalTimestamp,
                SqlValue::LocalTimestamp(
                    NaiveDate::from_ymd_opt(2023, 12, 31)
                        .unwrap()
                        .and_hms_micro_opt(23, 59, 59, 250_000)
                        .unwrap(),
                ),
            ),
            (
                ColumnType::Date,
                SqlValue::Date(NaiveDate::from_ymd_opt(2020, 2, 29).unwrap()),
            ),
            (ColumnType::Float, SqlValue::Float(0.25)),
            (ColumnType::Numeric, SqlValue::Numeric(Decimal::new(1250, 2))),
            (
                ColumnType::TextArray,
                SqlValue::TextArray(vec!["a".into(), "b".into()]),
            ),
            (ColumnType::Uuid, SqlValue::Uuid(Uuid::nil())),
            (ColumnType::Bool, SqlValue::Bool(true)),
        ];
        for (ty, value) in cases {
            let json = to_json(&value);
            assert_eq!(from_json(&json, ty).unwrap(), value, "{ty:?}");
        }
    }

    #[test]
    fn test_booleans_are_json_booleans() {
        assert_eq!(to_json(&SqlValue::Bool(true)), json!(true));
        assert_eq!(to_json(&SqlValue::Bool(false)), json!(false));
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        assert!(from_json(&json!("yes"), ColumnType::Bool).is_err());
        assert!(from_json(&json!("2024-13-01"), ColumnType::Date).is_err());
    }

    #[test]
    fn test_from_pg_name() {
        assert_eq!(ColumnType::from_pg_name("TIMESTAMPTZ"), Some(ColumnType::Timestamp));
        assert_eq!(ColumnType::from_pg_name("jsonb"), Some(ColumnType::Json));
        assert_eq!(ColumnType::from_pg_name("TEXT[]"), Some(ColumnType::TextArray));
        assert_eq!(ColumnType::from_pg_name("INTERVAL"), None);
    }

    #[test]
    fn test_column_count_mismatch() {
        let err = encode_row(&granule_columns(), &[SqlValue::Null], KeyNaming::Storage);
        assert!(err.is_err());
    }
}
