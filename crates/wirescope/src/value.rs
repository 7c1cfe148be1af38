//! Column values exchanged with the driver.
//!
//! [`Value`] is the driver-neutral representation of one bound parameter or
//! one column of a result row. [`FromValue`] coerces a value into a Rust type
//! and fails with [`Error::Conversion`] when the shapes do not match.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive as _;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Error;

/// One parameter or column value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// Boolean.
    Bool(bool),
    /// Any integer column, widened to 64 bits.
    Int(i64),
    /// Any floating point column, widened to 64 bits.
    Float(f64),
    /// Character data.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// UUID.
    Uuid(Uuid),
    /// Exact numeric.
    Decimal(Decimal),
    /// Timestamp normalized to UTC.
    Timestamp(DateTime<Utc>),
    /// JSON document.
    Json(serde_json::Value),
}

impl Value {
    /// Whether this is SQL `NULL`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the variant, used in conversion errors.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Uuid(_) => "uuid",
            Self::Decimal(_) => "decimal",
            Self::Timestamp(_) => "timestamp",
            Self::Json(_) => "json",
        }
    }

    /// Project the value into JSON.
    ///
    /// Decimals and UUIDs become strings, timestamps become RFC 3339 strings,
    /// non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(v) => serde_json::Value::Bool(*v),
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(v) => serde_json::Value::String(v.clone()),
            Self::Bytes(v) => serde_json::Value::from(v.clone()),
            Self::Uuid(v) => serde_json::Value::String(v.to_string()),
            Self::Decimal(v) => serde_json::Value::String(v.to_string()),
            Self::Timestamp(v) => serde_json::Value::String(v.to_rfc3339()),
            Self::Json(v) => v.clone(),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    f32 => Float,
    f64 => Float,
    String => Text,
    &str => Text,
    Vec<u8> => Bytes,
    Uuid => Uuid,
    Decimal => Decimal,
    DateTime<Utc> => Timestamp,
    serde_json::Value => Json,
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Coerce a [`Value`] into a Rust type.
pub trait FromValue: Sized {
    /// Convert `value`, failing with [`Error::Conversion`] on a shape mismatch.
    fn from_value(value: Value) -> Result<Self, Error>;
}

fn mismatch<T>(value: &Value) -> Error {
    Error::conversion::<T>(format!("found {}", value.kind()))
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, Error> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Bool(v) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Int(v) => Ok(v),
            Value::Decimal(v) if v.fract().is_zero() => i64::try_from(v)
                .map_err(|e| Error::conversion::<Self>(e.to_string())),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

macro_rules! narrow_int {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, Error> {
                    let wide = i64::from_value(value)?;
                    <$ty>::try_from(wide).map_err(|e| Error::conversion::<Self>(e.to_string()))
                }
            }
        )*
    };
}

narrow_int!(i16, i32, u32, u64, usize);

/// Largest integer magnitude an `f64` represents exactly (2^53).
const F64_EXACT_INT: u64 = 1 << 53;

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Float(v) => Ok(v),
            Value::Int(v) if v.unsigned_abs() <= F64_EXACT_INT => v
                .to_f64()
                .ok_or_else(|| Error::conversion::<Self>(format!("{v} is not representable"))),
            Value::Int(v) => Err(Error::conversion::<Self>(format!(
                "{v} exceeds the exactly representable range"
            ))),
            Value::Decimal(v) => v
                .to_f64()
                .ok_or_else(|| Error::conversion::<Self>(format!("{v} is not representable"))),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Text(v) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Bytes(v) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Uuid(v) => Ok(v),
            Value::Text(v) => Self::parse_str(&v).map_err(|e| Error::conversion::<Self>(e.to_string())),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromValue for Decimal {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Decimal(v) => Ok(v),
            Value::Int(v) => Ok(Self::from(v)),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Timestamp(v) => Ok(v),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: Value) -> Result<Self, Error> {
        Ok(match value {
            Value::Json(v) => v,
            other => other.to_json(),
        })
    }
}
