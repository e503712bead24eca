//! PostgreSQL row source
//!
//! Runs a composed statement through a server-side cursor inside a read-only
//! transaction, so memory use is bounded by the batch size rather than the
//! result size. The transaction is rolled back if the source is dropped
//! without being closed.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::{Arguments, Column as _, Either, Executor, Postgres, Row, Statement, Transaction, TypeInfo};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ExportError, Result};
use crate::query::{ComposedQuery, Entity, QueryArg};

use super::convert::{Column, ColumnType, SqlValue};
use super::streaming::{RowSource, RowSourceFactory};

const CURSOR_NAME: &str = "export_cursor";

/// How the row count used for sink selection is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowCountMode {
    /// Scroll the cursor to its end and back
    #[default]
    Exact,
    /// Use the request limit; falls back to exact when unlimited
    Limit,
}

impl FromStr for RowCountMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exact" => Ok(RowCountMode::Exact),
            "limit" => Ok(RowCountMode::Limit),
            other => Err(format!("unknown row count mode '{other}'")),
        }
    }
}

/// A literal converted to the parameter type the server inferred.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Numeric(Decimal),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    LocalTimestamp(NaiveDateTime),
    Date(NaiveDate),
    Uuid(Uuid),
    Json(serde_json::Value),
    Text(String),
}

impl BindValue {
    /// Convert a literal for a parameter of PostgreSQL type `pg_type`.
    ///
    /// # Arguments
    /// * `pg_type` - Type name reported by the server, e.g. `INT4`
    /// * `text` - Literal as written in the filter
    ///
    /// # Returns
    /// * `Option<BindValue>` - None when the literal does not parse as that type
    pub fn parse(pg_type: &str, text: &str) -> Option<Self> {
        let text = text.trim();
        let value = match pg_type {
            "INT2" => BindValue::SmallInt(text.parse().ok()?),
            "INT4" => BindValue::Int(text.parse().ok()?),
            "INT8" => BindValue::BigInt(text.parse().ok()?),
            "FLOAT4" => BindValue::Real(text.parse().ok()?),
            "FLOAT8" => BindValue::Double(text.parse().ok()?),
            "NUMERIC" => BindValue::Numeric(
                Decimal::from_str(text)
                    .or_else(|_| Decimal::from_scientific(text))
                    .ok()?,
            ),
            "BOOL" => BindValue::Bool(match text.to_ascii_lowercase().as_str() {
                "true" | "t" => true,
                "false" | "f" => false,
                _ => return None,
            }),
            "TIMESTAMPTZ" => BindValue::Timestamp(parse_timestamp(text)?),
            "TIMESTAMP" => BindValue::LocalTimestamp(parse_local_timestamp(text)?),
            "DATE" => BindValue::Date(NaiveDate::from_str(text).ok()?),
            "UUID" => BindValue::Uuid(Uuid::parse_str(text).ok()?),
            "JSON" | "JSONB" => BindValue::Json(serde_json::from_str(text).ok()?),
            _ => BindValue::Text(text.to_string()),
        };
        Some(value)
    }

    fn add_to(self, args: &mut PgArguments) -> std::result::Result<(), sqlx::error::BoxDynError> {
        match self {
            BindValue::SmallInt(v) => args.add(v),
            BindValue::Int(v) => args.add(v),
            BindValue::BigInt(v) => args.add(v),
            BindValue::Real(v) => args.add(v),
            BindValue::Double(v) => args.add(v),
            BindValue::Numeric(v) => args.add(v),
            BindValue::Bool(v) => args.add(v),
            BindValue::Timestamp(v) => args.add(v),
            BindValue::LocalTimestamp(v) => args.add(v),
            BindValue::Date(v) => args.add(v),
            BindValue::Uuid(v) => args.add(v),
            BindValue::Json(v) => args.add(v),
            BindValue::Text(v) => args.add(v),
        }
    }
}

fn parse_local_timestamp(text: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::from_str(text)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// RFC 3339, or a zone-less timestamp or date read as UTC.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_local_timestamp(text).map(|ts| ts.and_utc()))
}

/// Convert every argument to the type of its placeholder.
pub fn bind_arguments(entity: Entity, types: &[String], args: &[QueryArg]) -> Result<PgArguments> {
    if types.len() != args.len() {
        return Err(ExportError::database(
            entity.name(),
            format!(
                "statement expects {} parameter(s) but {} were supplied",
                types.len(),
                args.len()
            ),
        ));
    }

    let mut arguments = PgArguments::default();
    for (index, (pg_type, arg)) in types.iter().zip(args).enumerate() {
        let value = BindValue::parse(pg_type, arg.as_str()).ok_or_else(|| {
            ExportError::database(
                entity.name(),
                format!(
                    "invalid input for parameter ${} of type {}: '{}'",
                    index + 1,
                    pg_type,
                    arg.as_str()
                ),
            )
        })?;
        value
            .add_to(&mut arguments)
            .map_err(|e| ExportError::database(entity.name(), e))?;
    }
    Ok(arguments)
}

/// Cursor-backed row source over one read-only transaction.
pub struct PostgresCursor {
    entity: Entity,
    tx: Option<Transaction<'static, Postgres>>,
    columns: Vec<Column>,
    /// Server type name per column, for decoding
    pg_types: Vec<String>,
    projected: u64,
    batch_size: usize,
    exhausted: bool,
}

impl PostgresCursor {
    /// Open a cursor for `query`.
    ///
    /// Validates the statement, declares the cursor with the bound arguments
    /// and measures the result according to `row_count`.
    pub async fn open(pool: &PgPool, query: &ComposedQuery, row_count: RowCountMode) -> Result<Self> {
        let entity = query.entity;
        let db_err = |e: sqlx::Error| ExportError::database(entity.name(), e);

        let mut tx = pool.begin().await.map_err(db_err)?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let statement = (&mut *tx).prepare(&query.sql).await.map_err(db_err)?;
        let param_types: Vec<String> = match statement.parameters() {
            Some(Either::Left(types)) => types.iter().map(|t| t.name().to_string()).collect(),
            _ => Vec::new(),
        };

        let mut columns = Vec::with_capacity(statement.columns().len());
        let mut pg_types = Vec::with_capacity(statement.columns().len());
        for column in statement.columns() {
            let type_name = column.type_info().name().to_string();
            let ty = ColumnType::from_pg_name(&type_name).ok_or_else(|| {
                ExportError::database(
                    entity.name(),
                    format!(
                        "column '{}' has unsupported type {}",
                        column.name(),
                        type_name
                    ),
                )
            })?;
            columns.push(Column::new(column.name(), ty));
            pg_types.push(type_name);
        }
        drop(statement);

        let arguments = bind_arguments(entity, &param_types, &query.args)?;
        let declare = format!("DECLARE {CURSOR_NAME} SCROLL CURSOR FOR {}", query.sql);
        sqlx::query_with(&declare, arguments)
            .persistent(false)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        debug!("Declared cursor for {} with {} column(s)", entity, columns.len());

        let projected = match (row_count, query.limit) {
            (RowCountMode::Limit, Some(limit)) => limit,
            _ => {
                let moved = sqlx::query(&format!("MOVE FORWARD ALL IN {CURSOR_NAME}"))
                    .persistent(false)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?
                    .rows_affected();
                sqlx::query(&format!("MOVE ABSOLUTE 0 IN {CURSOR_NAME}"))
                    .persistent(false)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                moved
            }
        };
        info!("Cursor for {} projects {} row(s)", entity, projected);

        Ok(Self {
            entity,
            tx: Some(tx),
            columns,
            pg_types,
            projected,
            batch_size: query.batch_size.max(1),
            exhausted: false,
        })
    }
}

fn decode_row(entity: Entity, pg_types: &[String], row: &PgRow) -> Result<Vec<SqlValue>> {
    pg_types
        .iter()
        .enumerate()
        .map(|(index, pg_type)| {
            decode_value(row, index, pg_type).map_err(|e| ExportError::database(entity.name(), e))
        })
        .collect()
}

fn decode_value(row: &PgRow, index: usize, pg_type: &str) -> std::result::Result<SqlValue, sqlx::Error> {
    fn get<'r, T>(row: &'r PgRow, index: usize, wrap: impl FnOnce(T) -> SqlValue) -> std::result::Result<SqlValue, sqlx::Error>
    where
        T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
    {
        Ok(row
            .try_get::<Option<T>, usize>(index)?
            .map(wrap)
            .unwrap_or(SqlValue::Null))
    }

    match pg_type {
        "BOOL" => get(row, index, SqlValue::Bool),
        "INT2" => get(row, index, |v: i16| SqlValue::Int(v.into())),
        "INT4" => get(row, index, |v: i32| SqlValue::Int(v.into())),
        "INT8" => get(row, index, SqlValue::Int),
        "OID" => get(row, index, |v: sqlx::postgres::types::Oid| SqlValue::Int(v.0.into())),
        "FLOAT4" => get(row, index, |v: f32| SqlValue::Float(v.into())),
        "FLOAT8" => get(row, index, SqlValue::Float),
        "NUMERIC" => get(row, index, SqlValue::Numeric),
        "TIMESTAMPTZ" => get(row, index, SqlValue::Timestamp),
        "TIMESTAMP" => get(row, index, SqlValue::LocalTimestamp),
        "DATE" => get(row, index, SqlValue::Date),
        "UUID" => get(row, index, SqlValue::Uuid),
        "JSON" | "JSONB" => get(row, index, SqlValue::Json),
        "TEXT[]" | "VARCHAR[]" | "_TEXT" | "_VARCHAR" => get(row, index, SqlValue::TextArray),
        _ => get(row, index, SqlValue::Text),
    }
}

#[async_trait]
impl RowSource for PostgresCursor {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn projected_rows(&self) -> u64 {
        self.projected
    }

    async fn next_batch(&mut self) -> Result<Option<Vec<Vec<SqlValue>>>> {
        if self.exhausted {
            return Ok(None);
        }
        let Self {
            entity,
            tx,
            pg_types,
            batch_size,
            ..
        } = self;
        let Some(tx) = tx.as_mut() else {
            return Err(ExportError::database(entity.name(), "cursor already closed"));
        };

        // Rows are decoded as they arrive; only the typed batch is held.
        let fetch = format!("FETCH FORWARD {batch_size} FROM {CURSOR_NAME}");
        let mut rows = sqlx::query(&fetch).persistent(false).fetch(&mut **tx);
        let mut batch = Vec::with_capacity(*batch_size);
        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| ExportError::database(entity.name(), e))?
        {
            batch.push(decode_row(*entity, pg_types, &row)?);
        }
        drop(rows);

        if batch.len() < self.batch_size {
            self.exhausted = true;
        }
        if batch.is_empty() {
            return Ok(None);
        }
        Ok(Some(batch))
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut tx) = self.tx.take() else {
            return Ok(());
        };
        let db_err = |e: sqlx::Error| ExportError::database(self.entity.name(), e);

        sqlx::query(&format!("CLOSE {CURSOR_NAME}"))
            .persistent(false)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        debug!("Closed cursor for {}", self.entity);
        Ok(())
    }
}

/// Opens [`PostgresCursor`]s on a shared pool.
pub struct PgCursorFactory {
    pool: PgPool,
    row_count: RowCountMode,
}

impl PgCursorFactory {
    pub fn new(pool: PgPool, row_count: RowCountMode) -> Self {
        Self { pool, row_count }
    }
}

#[async_trait]
impl RowSourceFactory for PgCursorFactory {
    async fn open(&self, query: &ComposedQuery) -> Result<Box<dyn RowSource>> {
        let cursor = PostgresCursor::open(&self.pool, query, self.row_count).await?;
        Ok(Box::new(cursor))
    }
}
