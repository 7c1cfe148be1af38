//! Sessions: the sole owner of one open connection handle.
//!
//! A [`Session`] executes statements against its connection and hands out
//! child scopes ([`Transaction`], [`RowReader`], [`GridReader`]). Every child
//! scope borrows the session mutably, so the session cannot be used directly
//! (or dropped) while a child is outstanding. Opening a second transaction
//! through an open one fails with [`Error::ScopeActive`].
//!
//! Usage contract: one logical caller per session. The connection handle is
//! not reentrant; share a session across tasks only behind external
//! serialization.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt as _;
use futures::stream::BoxStream;
use tracing::{debug, info};

use crate::cancel::{CancellationToken, guarded};
use crate::command::Command;
use crate::driver::{Connection, IsolationLevel};
use crate::error::{DriverError, Error};
use crate::grid_reader::GridReader;
use crate::options::DatabaseOptions;
use crate::row::{FromRow, Row};
use crate::transaction::Transaction;
use crate::value::{FromValue, Value};

const COMPONENT: &str = "Session";
const READER: &str = "RowReader";

/// One open connection plus the bookkeeping for its child scopes.
pub struct Session<C: Connection> {
    connection: Option<C>,
    options: Arc<DatabaseOptions>,
    transaction_open: bool,
    rollback_owed: bool,
}

impl<C: Connection> Session<C> {
    pub(crate) const fn new(connection: C, options: Arc<DatabaseOptions>) -> Self {
        Self {
            connection: Some(connection),
            options,
            transaction_open: false,
            rollback_owed: false,
        }
    }

    /// Open the physical connection.
    pub(crate) async fn open(&mut self, cancel: &CancellationToken) -> Result<(), Error> {
        let connection = self.connection()?;
        guarded(cancel, None, true, connection.open()).await
    }

    /// Release the handle after a failed open, without lifecycle events.
    pub(crate) async fn discard(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            // The open failure is what the caller sees; a close failure on a
            // half-open handle adds nothing.
            let _ = connection.close().await;
        }
    }

    /// Options of the database that produced this session.
    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// Whether the connection handle has been released.
    pub const fn is_closed(&self) -> bool {
        self.connection.is_none()
    }

    /// Whether a transaction scope is currently open.
    pub const fn in_transaction(&self) -> bool {
        self.transaction_open
    }

    pub(crate) fn connection(&mut self) -> Result<&mut C, Error> {
        self.connection
            .as_mut()
            .ok_or_else(|| Error::disposed(COMPONENT))
    }

    pub(crate) const fn end_transaction(&mut self) {
        self.transaction_open = false;
    }

    /// Record that a transaction was abandoned and must be rolled back
    /// before the connection is used again.
    pub(crate) const fn owe_rollback(&mut self) {
        if self.connection.is_some() {
            self.rollback_owed = true;
        }
    }

    /// Issue the rollback owed by an abandoned transaction, if any.
    ///
    /// The debt is cleared only once the rollback has succeeded; until then
    /// every operation retries it first and fails if it fails again.
    async fn settle(&mut self) -> Result<(), Error> {
        if !self.rollback_owed {
            return Ok(());
        }
        debug!(
            component = COMPONENT,
            database = %self.options.name,
            "Rolling back abandoned transaction..."
        );
        self.connection()?.rollback().await?;
        self.rollback_owed = false;
        info!(
            component = COMPONENT,
            database = %self.options.name,
            "Abandoned transaction rolled back."
        );
        Ok(())
    }

    /// Run a non-query statement and return the number of rows affected.
    pub async fn execute<'q>(
        &mut self,
        command: impl Into<Command<'q>>,
        cancel: &CancellationToken,
    ) -> Result<u64, Error> {
        cancel.check()?;
        self.settle().await?;
        let command = command.into();
        debug!(
            component = COMPONENT,
            database = %self.options.name,
            sql = command.sql(),
            "Executing statement..."
        );
        let timeout = self.options.command_timeout;
        let connection = self.connection()?;
        let abortable = connection.supports_cancellation();
        let affected = guarded(cancel, timeout, abortable, connection.execute(command)).await?;
        info!(
            component = COMPONENT,
            database = %self.options.name,
            rows_affected = affected,
            "Statement executed successfully."
        );
        Ok(affected)
    }

    /// Run a statement and convert the first column of its first row.
    ///
    /// An empty result converts as SQL `NULL`, so it only succeeds for
    /// `Option<T>` targets.
    pub async fn execute_scalar<'q, T: FromValue>(
        &mut self,
        command: impl Into<Command<'q>>,
        cancel: &CancellationToken,
    ) -> Result<T, Error> {
        cancel.check()?;
        self.settle().await?;
        let command = command.into();
        debug!(
            component = COMPONENT,
            database = %self.options.name,
            sql = command.sql(),
            "Executing scalar statement..."
        );
        let timeout = self.options.command_timeout;
        let connection = self.connection()?;
        let abortable = connection.supports_cancellation();
        let first = guarded(cancel, timeout, abortable, async move {
            let mut rows = connection.fetch(command);
            rows.next().await.transpose()
        })
        .await?;
        let value = first
            .and_then(|row| row.into_values().into_iter().next())
            .unwrap_or(Value::Null);
        let scalar = T::from_value(value)?;
        info!(
            component = COMPONENT,
            database = %self.options.name,
            "Scalar statement executed successfully."
        );
        Ok(scalar)
    }

    /// Run a query and return a forward-only reader over its rows.
    pub async fn execute_reader<'s>(
        &'s mut self,
        command: impl Into<Command<'s>>,
        cancel: &CancellationToken,
    ) -> Result<RowReader<'s>, Error> {
        cancel.check()?;
        self.settle().await?;
        let command = command.into();
        let options = Arc::clone(&self.options);
        debug!(
            component = COMPONENT,
            database = %options.name,
            sql = command.sql(),
            "Opening row reader..."
        );
        let rows = self.connection()?.fetch(command);
        info!(
            component = COMPONENT,
            database = %options.name,
            "Row reader opened successfully."
        );
        Ok(RowReader::new(rows, options))
    }

    /// Run a statement batch and return a reader over its result sets.
    pub async fn execute_grid_reader<'s>(
        &'s mut self,
        command: impl Into<Command<'s>>,
        cancel: &CancellationToken,
    ) -> Result<GridReader<'s>, Error> {
        cancel.check()?;
        self.settle().await?;
        let command = command.into();
        let options = Arc::clone(&self.options);
        debug!(
            component = COMPONENT,
            database = %options.name,
            sql = command.sql(),
            "Opening grid reader..."
        );
        let cursor = self.connection()?.fetch_multiple(command);
        info!(
            component = COMPONENT,
            database = %options.name,
            "Grid reader opened successfully."
        );
        Ok(GridReader::new(cursor, options))
    }

    /// Begin a transaction at the configured default isolation level.
    pub async fn begin_transaction(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Transaction<'_, C>, Error> {
        let isolation = self.options.isolation_level;
        self.begin(isolation, cancel).await
    }

    /// Begin a transaction at an explicit isolation level.
    pub async fn begin_transaction_with(
        &mut self,
        isolation: IsolationLevel,
        cancel: &CancellationToken,
    ) -> Result<Transaction<'_, C>, Error> {
        self.begin(Some(isolation), cancel).await
    }

    async fn begin(
        &mut self,
        isolation: Option<IsolationLevel>,
        cancel: &CancellationToken,
    ) -> Result<Transaction<'_, C>, Error> {
        cancel.check()?;
        if self.transaction_open {
            return Err(Error::ScopeActive {
                scope: "Transaction",
            });
        }
        self.settle().await?;
        debug!(
            component = COMPONENT,
            database = %self.options.name,
            isolation = ?isolation,
            "Beginning a database transaction..."
        );
        // Not raced against the token: an aborted BEGIN leaves the server
        // state unknown.
        self.connection()?.begin(isolation).await?;
        self.transaction_open = true;
        info!(
            component = COMPONENT,
            database = %self.options.name,
            "Database transaction started successfully."
        );
        Ok(Transaction::new(self))
    }

    /// Release the connection handle. Calling this again is a no-op.
    ///
    /// The handle is released even when the driver reports a close failure;
    /// any transaction still open on the server is discarded with it.
    pub async fn close(&mut self) -> Result<(), Error> {
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };
        self.transaction_open = false;
        self.rollback_owed = false;
        debug!(
            component = COMPONENT,
            database = %self.options.name,
            "Closing the database session..."
        );
        connection.close().await?;
        info!(
            component = COMPONENT,
            database = %self.options.name,
            "Database session closed successfully."
        );
        Ok(())
    }
}

impl<C: Connection> Drop for Session<C> {
    fn drop(&mut self) {
        if self.connection.is_some() {
            debug!(
                component = COMPONENT,
                database = %self.options.name,
                "Session dropped without close; releasing connection handle."
            );
        }
    }
}

impl<C: Connection> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.options.name)
            .field("closed", &self.is_closed())
            .field("transaction_open", &self.transaction_open)
            .finish_non_exhaustive()
    }
}

enum ReaderState<'s> {
    Open(BoxStream<'s, Result<Row, DriverError>>),
    Exhausted,
    Closed,
}

/// A lazy, forward-only cursor over the rows of one result set.
///
/// Once exhausted, [`read`](Self::read) keeps returning `None`; the reader
/// cannot be restarted. After [`close`](Self::close) every read fails with
/// [`Error::Disposed`].
pub struct RowReader<'s> {
    state: ReaderState<'s>,
    options: Arc<DatabaseOptions>,
    rows_read: u64,
}

impl<'s> RowReader<'s> {
    pub(crate) const fn new(
        rows: BoxStream<'s, Result<Row, DriverError>>,
        options: Arc<DatabaseOptions>,
    ) -> Self {
        Self {
            state: ReaderState::Open(rows),
            options,
            rows_read: 0,
        }
    }

    /// Advance to the next row.
    ///
    /// A driver failure releases the cursor before it is returned.
    pub async fn read(&mut self) -> Result<Option<Row>, Error> {
        let rows = match &mut self.state {
            ReaderState::Open(rows) => rows,
            ReaderState::Exhausted => return Ok(None),
            ReaderState::Closed => return Err(Error::disposed(READER)),
        };
        let item = rows.next().await;
        match item {
            Some(Ok(row)) => {
                self.rows_read = self.rows_read.saturating_add(1);
                Ok(Some(row))
            }
            Some(Err(error)) => {
                self.state = ReaderState::Closed;
                Err(Error::Driver(error))
            }
            None => {
                self.state = ReaderState::Exhausted;
                debug!(
                    component = READER,
                    database = %self.options.name,
                    rows = self.rows_read,
                    "Row reader exhausted."
                );
                Ok(None)
            }
        }
    }

    /// Advance to the next row and materialize it as `T`.
    pub async fn read_as<T: FromRow>(&mut self) -> Result<Option<T>, Error> {
        self.read().await?.map(T::from_row).transpose()
    }

    /// Materialize every remaining row as `T`.
    pub async fn read_all<T: FromRow>(&mut self) -> Result<Vec<T>, Error> {
        let mut records = Vec::new();
        while let Some(record) = self.read_as::<T>().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Number of rows yielded so far.
    pub const fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Whether the reader has been closed.
    pub const fn is_closed(&self) -> bool {
        matches!(self.state, ReaderState::Closed)
    }

    /// Release the cursor. Calling this again is a no-op.
    pub fn close(&mut self) {
        if !self.is_closed() {
            self.state = ReaderState::Closed;
            debug!(
                component = READER,
                database = %self.options.name,
                rows = self.rows_read,
                "Row reader closed."
            );
        }
    }
}

impl fmt::Debug for RowReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            ReaderState::Open(_) => "open",
            ReaderState::Exhausted => "exhausted",
            ReaderState::Closed => "closed",
        };
        f.debug_struct("RowReader")
            .field("state", &state)
            .field("rows_read", &self.rows_read)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::time::Duration;

    use tracing::Level;

    use super::*;
    use crate::database::Database;
    use crate::testing::{Capture, FakeConnection, FakeServer};

    async fn connect(server: &FakeServer, options: DatabaseOptions) -> Session<FakeConnection> {
        let database = Database::new(options, server.factory()).unwrap();
        database.connect(&CancellationToken::new()).await.unwrap()
    }

    #[tokio::test]
    async fn insert_with_one_bound_row_affects_one_row() {
        let server = FakeServer::new();
        let mut session = connect(&server, DatabaseOptions::new("test")).await;
        let cancel = CancellationToken::new();

        let affected = session
            .execute(Command::new("insert into items values ($1)").bind(42), &cancel)
            .await
            .unwrap();

        assert_eq!(affected, 1);
        assert_eq!(server.rows(), vec![42]);
    }

    #[tokio::test]
    async fn every_operation_fails_after_close() {
        let server = FakeServer::new();
        let mut session = connect(&server, DatabaseOptions::new("test")).await;
        let cancel = CancellationToken::new();
        session.close().await.unwrap();

        assert!(session.is_closed());
        assert!(session.execute("insert", &cancel).await.unwrap_err().is_disposed());
        assert!(
            session
                .execute_scalar::<i64>("count", &cancel)
                .await
                .unwrap_err()
                .is_disposed()
        );
        assert!(session.execute_reader("select", &cancel).await.unwrap_err().is_disposed());
        assert!(
            session
                .execute_grid_reader("select", &cancel)
                .await
                .unwrap_err()
                .is_disposed()
        );
        assert!(session.begin_transaction(&cancel).await.unwrap_err().is_disposed());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_releases_once() {
        let server = FakeServer::new();
        let mut session = connect(&server, DatabaseOptions::new("test")).await;
        session.close().await.unwrap();
        session.close().await.unwrap();
        drop(session);

        let counters = server.counters();
        assert_eq!(counters.closes, 1);
        assert_eq!(counters.released, 1);
        assert_eq!(counters.live_handles(), 0);
    }

    #[tokio::test]
    async fn dropping_an_open_session_releases_the_handle() {
        let server = FakeServer::new();
        let session = connect(&server, DatabaseOptions::new("test")).await;
        assert_eq!(server.counters().live_handles(), 1);
        drop(session);
        assert_eq!(server.counters().live_handles(), 0);
    }

    #[tokio::test]
    async fn scalar_converts_the_first_column() {
        let server = FakeServer::new();
        let mut session = connect(&server, DatabaseOptions::new("test")).await;
        let cancel = CancellationToken::new();
        session
            .execute(Command::new("insert").bind(1).bind(2).bind(3), &cancel)
            .await
            .unwrap();

        let count: i32 = session.execute_scalar("count", &cancel).await.unwrap();
        assert_eq!(count, 3);

        let missing: Option<i64> = session.execute_scalar("null", &cancel).await.unwrap();
        assert_eq!(missing, None);

        let none: Option<i64> = session.execute_scalar("empty", &cancel).await.unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn scalar_reports_conversion_failures() {
        let server = FakeServer::new();
        let mut session = connect(&server, DatabaseOptions::new("test")).await;
        let error = session
            .execute_scalar::<i64>("text", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Conversion { expected: "i64", .. }));
    }

    #[tokio::test]
    async fn reader_is_ordered_and_forward_only() {
        let server = FakeServer::new();
        let mut session = connect(&server, DatabaseOptions::new("test")).await;
        let cancel = CancellationToken::new();
        session
            .execute(Command::new("insert").bind(1).bind(2).bind(3).bind(4), &cancel)
            .await
            .unwrap();

        let mut reader = session.execute_reader("select", &cancel).await.unwrap();
        let first_pass: Vec<i64> = reader.read_all().await.unwrap();
        assert_eq!(first_pass, vec![1, 2, 3, 4]);
        assert_eq!(reader.rows_read(), 4);

        let second_pass: Vec<i64> = reader.read_all().await.unwrap();
        assert!(second_pass.is_empty());

        reader.close();
        reader.close();
        assert!(reader.read().await.unwrap_err().is_disposed());
    }

    #[tokio::test]
    async fn reader_releases_cursor_on_driver_failure() {
        let server = FakeServer::new();
        let mut session = connect(&server, DatabaseOptions::new("test")).await;
        let mut reader = session
            .execute_reader("fail", &CancellationToken::new())
            .await
            .unwrap();

        let error = reader.read().await.unwrap_err();
        assert!(error.as_driver().is_some());
        assert!(reader.is_closed());
    }

    #[tokio::test]
    async fn driver_errors_propagate_unchanged() {
        let server = FakeServer::new();
        let mut session = connect(&server, DatabaseOptions::new("test")).await;
        let error = session
            .execute("fail", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            error.as_driver().map(ToString::to_string).as_deref(),
            Some("syntax error at or near \"fail\"")
        );
    }

    #[tokio::test]
    async fn pre_cancelled_token_runs_nothing() {
        let server = FakeServer::new();
        let mut session = connect(&server, DatabaseOptions::new("test")).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = session
            .execute(Command::new("insert").bind(9), &cancel)
            .await
            .unwrap_err();

        assert!(error.is_cancelled());
        assert!(server.rows().is_empty());
    }

    #[tokio::test]
    async fn cancellation_aborts_a_running_statement() {
        let server = FakeServer::new();
        let mut session = connect(&server, DatabaseOptions::new("test")).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let error = session.execute("sleep", &cancel).await.unwrap_err();
        assert!(error.is_cancelled());

        let count: i64 = session
            .execute_scalar("count", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn command_timeout_bounds_execution() {
        let server = FakeServer::new();
        let options = DatabaseOptions::new("test").with_command_timeout(Duration::from_secs(5));
        let mut session = connect(&server, options).await;

        let error = session
            .execute("sleep", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Timeout { limit } if limit == Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn statements_without_driver_cancellation_run_to_completion() {
        let server = FakeServer::new();
        server.without_cooperative_cancellation();
        let options = DatabaseOptions::new("test").with_command_timeout(Duration::from_secs(5));
        let mut session = connect(&server, options).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let affected = session
            .execute(Command::new("sleep; insert").bind(7), &cancel)
            .await
            .unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(affected, 1);
        assert_eq!(server.rows(), vec![7]);
        assert!(
            session
                .execute(Command::new("insert").bind(8), &cancel)
                .await
                .unwrap_err()
                .is_cancelled()
        );
        assert_eq!(server.rows(), vec![7]);
    }

    #[tokio::test]
    async fn execute_logs_start_then_success() {
        let server = FakeServer::new();
        let mut session = connect(&server, DatabaseOptions::new("test")).await;
        let (capture, _guard) = Capture::install(COMPONENT);

        session
            .execute(Command::new("insert").bind(1), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            capture.events(),
            vec![
                (Level::DEBUG, "Executing statement...".to_owned()),
                (Level::INFO, "Statement executed successfully.".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn failed_execute_logs_no_success() {
        let server = FakeServer::new();
        let mut session = connect(&server, DatabaseOptions::new("test")).await;
        let (capture, _guard) = Capture::install(COMPONENT);

        session
            .execute("fail", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            capture.events(),
            vec![(Level::DEBUG, "Executing statement...".to_owned())]
        );
    }

    #[tokio::test]
    async fn close_logs_start_then_success() {
        let server = FakeServer::new();
        let mut session = connect(&server, DatabaseOptions::new("test")).await;
        let (capture, _guard) = Capture::install(COMPONENT);

        session.close().await.unwrap();
        session.close().await.unwrap();

        assert_eq!(
            capture.events(),
            vec![
                (Level::DEBUG, "Closing the database session...".to_owned()),
                (Level::INFO, "Database session closed successfully.".to_owned()),
            ]
        );
    }
}
