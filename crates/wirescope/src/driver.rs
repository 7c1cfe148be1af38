//! Capability contract toward the underlying connection/driver library.
//!
//! The core never talks to a database directly. A [`ConnectionFactory`]
//! produces unopened [`Connection`] handles; the connection opens and closes
//! the physical link, runs statements, and manages transactions. Streams
//! returned by [`Connection::fetch`] and [`Connection::fetch_multiple`]
//! borrow the connection, so a cursor can never outlive its connection.

use std::fmt;
use std::future::Future;

use futures::stream::BoxStream;

use crate::command::Command;
use crate::error::DriverError;
use crate::row::Row;

/// Produces one new, unopened connection handle per call.
///
/// Any `Fn() -> C` closure is a factory.
pub trait ConnectionFactory: Send + Sync {
    /// The connection type produced.
    type Connection: Connection;

    /// Create a connection that has not been opened yet.
    fn create(&self) -> Self::Connection;
}

impl<F, C> ConnectionFactory for F
where
    F: Fn() -> C + Send + Sync,
    C: Connection,
{
    type Connection = C;

    fn create(&self) -> C {
        self()
    }
}

/// One item of a multi-result-set cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// A row of the current result set.
    Row(Row),
    /// The current result set is complete.
    Done {
        /// Rows affected by the statement that produced this result set.
        rows_affected: u64,
    },
}

/// Transaction isolation level requested at `BEGIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// `READ UNCOMMITTED`.
    ReadUncommitted,
    /// `READ COMMITTED`.
    ReadCommitted,
    /// `REPEATABLE READ`.
    RepeatableRead,
    /// `SERIALIZABLE`.
    Serializable,
}

impl IsolationLevel {
    /// The SQL spelling of the level.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A raw connection handle owned by exactly one session.
///
/// Dropping the handle must release any native resources it holds, even if
/// [`close`](Self::close) was never called.
pub trait Connection: Send {
    /// Whether dropping an in-flight [`execute`](Self::execute) or
    /// [`fetch`](Self::fetch) future also stops the statement on the server.
    ///
    /// When `false`, sessions never abandon a started statement on
    /// cancellation or timeout; they wait for the server to finish it, and
    /// the driver is expected to enforce the command timeout server-side.
    fn supports_cancellation(&self) -> bool {
        false
    }

    /// Open the physical connection.
    fn open(&mut self) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Close the physical connection. Closing an unopened handle is a no-op.
    fn close(&mut self) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Run a non-query statement and return the number of rows affected.
    fn execute(
        &mut self,
        command: Command<'_>,
    ) -> impl Future<Output = Result<u64, DriverError>> + Send;

    /// Stream the rows of a single result set.
    fn fetch<'c>(&'c mut self, command: Command<'c>) -> BoxStream<'c, Result<Row, DriverError>>;

    /// Stream every result set produced by a statement batch.
    ///
    /// Each result set ends with [`Fetched::Done`].
    fn fetch_multiple<'c>(
        &'c mut self,
        command: Command<'c>,
    ) -> BoxStream<'c, Result<Fetched, DriverError>>;

    /// Start a transaction on this connection.
    fn begin(
        &mut self,
        isolation: Option<IsolationLevel>,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Commit the open transaction.
    fn commit(&mut self) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Roll back the open transaction.
    fn rollback(&mut self) -> impl Future<Output = Result<(), DriverError>> + Send;
}
