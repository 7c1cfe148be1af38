//! Translation between core [`Value`]s and `PostgreSQL` wire types.
//!
//! Parameters are bound positionally (`$1`, `$2`, ...). Result columns are
//! decoded by their server type name; types without a native mapping are
//! rejected, so cast them in SQL (for example `created::text`).

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Column as _, Postgres, Row as _, TypeInfo as _, ValueRef as _};
use uuid::Uuid;
use wirescope::{Row, Value};

/// Bind every parameter to `query`, in order.
///
/// `NULL` is sent as a text-typed parameter; compare or insert it into a
/// non-text column with an explicit cast such as `$1::int8`.
pub fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: Vec<Value>,
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(v),
            Value::Int(v) => query.bind(v),
            Value::Float(v) => query.bind(v),
            Value::Text(v) => query.bind(v),
            Value::Bytes(v) => query.bind(v),
            Value::Uuid(v) => query.bind(v),
            Value::Decimal(v) => query.bind(v),
            Value::Timestamp(v) => query.bind(v),
            Value::Json(v) => query.bind(Json(v)),
        };
    }
    query
}

/// Decode one `sqlx` row into a core [`Row`].
///
/// # Errors
///
/// Returns the `sqlx` decode error for a column whose type has no mapping.
pub fn decode_row(row: &PgRow) -> Result<Row, sqlx::Error> {
    let columns: Arc<[String]> = row
        .columns()
        .iter()
        .map(|column| column.name().to_owned())
        .collect();
    let values = (0..row.len())
        .map(|index| decode_value(row, index))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Row::new(columns, values))
}

fn decode_value(row: &PgRow, index: usize) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_owned();

    let value = match type_name.as_str() {
        "BOOL" => Value::Bool(row.try_get(index)?),
        "INT2" => Value::Int(i64::from(row.try_get::<i16, _>(index)?)),
        "INT4" => Value::Int(i64::from(row.try_get::<i32, _>(index)?)),
        "INT8" => Value::Int(row.try_get(index)?),
        "FLOAT4" => Value::Float(f64::from(row.try_get::<f32, _>(index)?)),
        "FLOAT8" => Value::Float(row.try_get(index)?),
        "NUMERIC" => Value::Decimal(row.try_get::<Decimal, _>(index)?),
        "UUID" => Value::Uuid(row.try_get::<Uuid, _>(index)?),
        "TIMESTAMPTZ" => Value::Timestamp(row.try_get::<DateTime<Utc>, _>(index)?),
        "TIMESTAMP" => Value::Timestamp(row.try_get::<NaiveDateTime, _>(index)?.and_utc()),
        "DATE" => Value::Text(row.try_get::<NaiveDate, _>(index)?.to_string()),
        "TIME" => Value::Text(row.try_get::<NaiveTime, _>(index)?.to_string()),
        "BYTEA" => Value::Bytes(row.try_get(index)?),
        "JSON" | "JSONB" => Value::Json(row.try_get::<serde_json::Value, _>(index)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Value::Text(row.try_get(index)?),
        other => {
            return Err(sqlx::Error::ColumnDecode {
                index: index.to_string(),
                source: format!("no mapping for column type {other}").into(),
            });
        }
    };
    Ok(value)
}
