//! Sequential consumption of the result sets produced by one statement batch.
//!
//! Each `read*` call advances to the next pending result set and
//! materializes it. Nothing advances on its own: the caller paces the
//! results. When the last result set has been consumed the cursor is
//! released, and any further read fails with [`Error::Disposed`]. A batch
//! that yields no result set at all fails its first read with
//! [`Error::NoResultSet`].

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt as _;
use futures::stream::{BoxStream, Peekable};
use tracing::debug;

use crate::driver::Fetched;
use crate::error::{DriverError, Error};
use crate::options::DatabaseOptions;
use crate::row::{FromRow, Row};

const COMPONENT: &str = "GridReader";

type Cursor<'s> = Peekable<BoxStream<'s, Result<Fetched, DriverError>>>;

/// A reader over the pending result sets of one statement batch.
pub struct GridReader<'s> {
    cursor: Option<Cursor<'s>>,
    options: Arc<DatabaseOptions>,
    result_sets: usize,
}

impl<'s> GridReader<'s> {
    pub(crate) fn new(
        cursor: BoxStream<'s, Result<Fetched, DriverError>>,
        options: Arc<DatabaseOptions>,
    ) -> Self {
        Self {
            cursor: Some(cursor.peekable()),
            options,
            result_sets: 0,
        }
    }

    /// Whether the cursor has been released (explicitly or by exhaustion).
    pub const fn is_closed(&self) -> bool {
        self.cursor.is_none()
    }

    /// Number of result sets consumed so far.
    pub const fn result_sets_read(&self) -> usize {
        self.result_sets
    }

    /// Read the next result set as a sequence of `T`.
    pub async fn read<T: FromRow>(&mut self) -> Result<Vec<T>, Error> {
        self.next_result_set()
            .await?
            .into_iter()
            .map(T::from_row)
            .collect()
    }

    /// Read the first row of the next result set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cardinality`] if the result set is empty.
    pub async fn read_first<T: FromRow>(&mut self) -> Result<T, Error> {
        let rows = self.next_result_set().await?;
        let row = rows.into_iter().next().ok_or(Error::Cardinality {
            expected: "at least one row",
            found: 0,
        })?;
        T::from_row(row)
    }

    /// Read the first row of the next result set, or `None` if it is empty.
    pub async fn read_first_optional<T: FromRow>(&mut self) -> Result<Option<T>, Error> {
        let rows = self.next_result_set().await?;
        rows.into_iter().next().map(T::from_row).transpose()
    }

    /// Read the only row of the next result set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cardinality`] unless the result set has exactly one row.
    pub async fn read_single<T: FromRow>(&mut self) -> Result<T, Error> {
        let rows = self.next_result_set().await?;
        let row = single(rows)?.ok_or(Error::Cardinality {
            expected: "exactly one row",
            found: 0,
        })?;
        T::from_row(row)
    }

    /// Read the only row of the next result set, or `None` if it is empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cardinality`] if the result set has more than one row.
    pub async fn read_single_optional<T: FromRow>(&mut self) -> Result<Option<T>, Error> {
        let rows = self.next_result_set().await?;
        single(rows)?.map(T::from_row).transpose()
    }

    /// Release the cursor. Calling this again is a no-op.
    pub fn close(&mut self) {
        if self.cursor.take().is_some() {
            debug!(
                component = COMPONENT,
                database = %self.options.name,
                result_sets = self.result_sets,
                "Grid reader closed."
            );
        }
    }

    async fn next_result_set(&mut self) -> Result<Vec<Row>, Error> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Err(Error::disposed(COMPONENT));
        };

        let mut rows = Vec::new();
        let mut started = false;
        loop {
            let item = cursor.next().await;
            match item {
                Some(Ok(Fetched::Row(row))) => {
                    started = true;
                    rows.push(row);
                }
                Some(Ok(Fetched::Done { .. })) => break,
                Some(Err(error)) => {
                    self.close();
                    return Err(Error::Driver(error));
                }
                None => {
                    self.close();
                    if started {
                        self.result_sets = self.result_sets.saturating_add(1);
                        return Ok(rows);
                    }
                    return Err(Error::NoResultSet);
                }
            }
        }

        self.result_sets = self.result_sets.saturating_add(1);
        let exhausted = Pin::new(cursor).peek().await.is_none();
        if exhausted {
            self.close();
        }
        Ok(rows)
    }
}

/// Enforce "at most one row", returning it if present.
fn single(rows: Vec<Row>) -> Result<Option<Row>, Error> {
    let found = rows.len();
    if found > 1 {
        return Err(Error::Cardinality {
            expected: "exactly one row",
            found,
        });
    }
    Ok(rows.into_iter().next())
}

impl fmt::Debug for GridReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridReader")
            .field("closed", &self.is_closed())
            .field("result_sets", &self.result_sets)
            .finish_non_exhaustive()
    }
}
