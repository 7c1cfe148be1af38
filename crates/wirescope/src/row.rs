//! Result rows and typed materialization.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::value::{FromValue, Value};

/// One row of a result set: ordered column names and their values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row. Column names are shared between rows of one result set.
    pub const fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column names, in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Column values, in order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value at `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of the first column named `name`.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|column| column == name)
            .and_then(|index| self.values.get(index))
    }

    /// Coerce the value at `index` into `T`.
    pub fn try_get<T: FromValue>(&self, index: usize) -> Result<T, Error> {
        let value = self
            .get(index)
            .ok_or_else(|| Error::conversion::<T>(format!("no column at index {index}")))?;
        T::from_value(value.clone())
    }

    /// Consume the row, returning its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Project the row into a JSON object keyed by column name.
    pub fn to_json(&self) -> serde_json::Value {
        let object = self
            .columns
            .iter()
            .zip(&self.values)
            .map(|(column, value)| (column.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(object)
    }
}

/// Materialize a typed record from a [`Row`].
///
/// Scalars read the first column, tuples read columns positionally, and
/// [`Record`] maps columns onto a `serde` type by name.
pub trait FromRow: Sized {
    /// Convert `row`, failing with [`Error::Conversion`] on a shape mismatch.
    fn from_row(row: Row) -> Result<Self, Error>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> Result<Self, Error> {
        Ok(row)
    }
}

macro_rules! scalar_rows {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromRow for $ty {
                fn from_row(row: Row) -> Result<Self, Error> {
                    let value = row
                        .into_values()
                        .into_iter()
                        .next()
                        .ok_or_else(|| Error::conversion::<Self>("row has no columns"))?;
                    <$ty>::from_value(value)
                }
            }

            impl FromRow for Option<$ty> {
                fn from_row(row: Row) -> Result<Self, Error> {
                    let value = row.into_values().into_iter().next().unwrap_or(Value::Null);
                    Self::from_value(value)
                }
            }
        )*
    };
}

scalar_rows!(
    Value,
    bool,
    i16,
    i32,
    i64,
    u32,
    u64,
    usize,
    f64,
    String,
    Vec<u8>,
    uuid::Uuid,
    rust_decimal::Decimal,
    chrono::DateTime<chrono::Utc>,
    serde_json::Value,
);

macro_rules! tuple_rows {
    ($($name:ident),+) => {
        impl<$($name: FromValue),+> FromRow for ($($name,)+) {
            fn from_row(row: Row) -> Result<Self, Error> {
                let mut values = row.into_values().into_iter();
                Ok(($(
                    $name::from_value(values.next().ok_or_else(|| {
                        Error::conversion::<Self>("row has too few columns")
                    })?)?,
                )+))
            }
        }
    };
}

tuple_rows!(A, B);
tuple_rows!(A, B, C);
tuple_rows!(A, B, C, D);

/// A row deserialized into `T` by matching column names to fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<T>(pub T);

impl<T> Record<T> {
    /// Unwrap the deserialized value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: DeserializeOwned> FromRow for Record<T> {
    fn from_row(row: Row) -> Result<Self, Error> {
        serde_json::from_value(row.to_json())
            .map(Record)
            .map_err(|e| Error::conversion::<T>(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde::Deserialize;

    use super::*;

    fn order_row() -> Row {
        let columns: Arc<[String]> = vec!["id".to_owned(), "name".to_owned()].into();
        Row::new(columns, vec![Value::Int(7), Value::Text("widget".to_owned())])
    }

    #[test]
    fn scalars_read_the_first_column() {
        assert_eq!(i64::from_row(order_row()).unwrap(), 7);
    }

    #[test]
    fn tuples_read_positionally() {
        let (id, name) = <(i32, String)>::from_row(order_row()).unwrap();
        assert_eq!(id, 7);
        assert_eq!(name, "widget");
        assert!(<(i32, String, bool)>::from_row(order_row()).is_err());
    }

    #[test]
    fn records_map_by_column_name() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Order {
            name: String,
            id: i64,
        }
        let Record(order) = Record::<Order>::from_row(order_row()).unwrap();
        assert_eq!(
            order,
            Order {
                name: "widget".to_owned(),
                id: 7
            }
        );
    }

    #[test]
    fn lookup_by_name() {
        let row = order_row();
        assert_eq!(row.get_by_name("name"), Some(&Value::Text("widget".to_owned())));
        assert_eq!(row.get_by_name("missing"), None);
        assert!(row.try_get::<i64>(5).is_err());
    }
}
