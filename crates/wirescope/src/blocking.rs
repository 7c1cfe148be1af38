//! Blocking adapter over the async core.
//!
//! Every blocking type wraps its async counterpart and drives it to
//! completion on a private current-thread `tokio` runtime, so both forms share
//! one implementation and cannot drift apart.
//!
//! # Sync/Async Bridge
//!
//! `block_on` panics when called from inside another `tokio` runtime. Use
//! the blocking types from plain threads (or `spawn_blocking`), and the async
//! types everywhere else.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use tokio::runtime::Runtime;
use tracing::warn;

use crate::cancel::CancellationToken;
use crate::command::Command;
use crate::database::{Database, DatabaseName, NamedDatabase};
use crate::driver::{Connection, ConnectionFactory, IsolationLevel};
use crate::error::Error;
use crate::grid_reader::GridReader;
use crate::options::DatabaseOptions;
use crate::row::{FromRow, Row};
use crate::session::{RowReader, Session};
use crate::transaction::{Transaction, TransactionState};
use crate::value::FromValue;

/// Blocking front end for a [`Database`].
pub struct BlockingDatabase<F> {
    inner: Database<F>,
    runtime: Arc<Runtime>,
}

impl<F: ConnectionFactory> BlockingDatabase<F> {
    /// Wrap `database`, starting the runtime that drives it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] if the runtime cannot be started.
    pub fn new(database: Database<F>) -> Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            inner: database,
            runtime: Arc::new(runtime),
        })
    }

    /// Options shared by every session from this database.
    pub fn options(&self) -> &DatabaseOptions {
        self.inner.options()
    }

    /// Open a new session, blocking until it is connected.
    pub fn connect(&self) -> Result<BlockingSession<F::Connection>, Error> {
        let session = self
            .runtime
            .block_on(self.inner.connect(&CancellationToken::new()))?;
        Ok(BlockingSession {
            inner: session,
            runtime: Arc::clone(&self.runtime),
        })
    }
}

impl<F> fmt::Debug for BlockingDatabase<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingDatabase")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

/// Blocking front end for a [`NamedDatabase`].
pub struct BlockingNamedDatabase<N, F> {
    inner: BlockingDatabase<F>,
    name: PhantomData<fn() -> N>,
}

impl<N: DatabaseName, F: ConnectionFactory> BlockingNamedDatabase<N, F> {
    /// Wrap `database`, starting the runtime that drives it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] if the runtime cannot be started.
    pub fn new(database: NamedDatabase<N, F>) -> Result<Self, Error> {
        Ok(Self {
            inner: BlockingDatabase::new(database.into_inner())?,
            name: PhantomData,
        })
    }

    /// Options shared by every session from this database.
    pub fn options(&self) -> &DatabaseOptions {
        self.inner.options()
    }

    /// Open a new session on `N`, blocking until it is connected.
    pub fn connect(&self) -> Result<BlockingSession<F::Connection>, Error> {
        self.inner.connect()
    }
}

impl<N, F> fmt::Debug for BlockingNamedDatabase<N, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingNamedDatabase")
            .field("database", &std::any::type_name::<N>())
            .field("inner", &self.inner)
            .finish()
    }
}

/// Blocking front end for a [`Session`].
///
/// Dropping the session closes its connection.
pub struct BlockingSession<C: Connection> {
    inner: Session<C>,
    runtime: Arc<Runtime>,
}

impl<C: Connection> BlockingSession<C> {
    /// Run a non-query statement and return the number of rows affected.
    pub fn execute<'q>(&mut self, command: impl Into<Command<'q>>) -> Result<u64, Error> {
        self.runtime
            .block_on(self.inner.execute(command, &CancellationToken::new()))
    }

    /// Run a statement and convert the first column of its first row.
    pub fn execute_scalar<'q, T: FromValue>(
        &mut self,
        command: impl Into<Command<'q>>,
    ) -> Result<T, Error> {
        self.runtime
            .block_on(self.inner.execute_scalar(command, &CancellationToken::new()))
    }

    /// Run a query and iterate over its rows.
    pub fn execute_reader<'s>(
        &'s mut self,
        command: impl Into<Command<'s>>,
    ) -> Result<BlockingRowReader<'s>, Error> {
        let runtime = &*self.runtime;
        let inner = runtime.block_on(
            self.inner
                .execute_reader(command, &CancellationToken::new()),
        )?;
        Ok(BlockingRowReader { inner, runtime })
    }

    /// Run a statement batch and read its result sets one by one.
    pub fn execute_grid_reader<'s>(
        &'s mut self,
        command: impl Into<Command<'s>>,
    ) -> Result<BlockingGridReader<'s>, Error> {
        let runtime = &*self.runtime;
        let inner = runtime.block_on(
            self.inner
                .execute_grid_reader(command, &CancellationToken::new()),
        )?;
        Ok(BlockingGridReader { inner, runtime })
    }

    /// Begin a transaction at the configured default isolation level.
    pub fn begin_transaction(&mut self) -> Result<BlockingTransaction<'_, C>, Error> {
        let runtime = &*self.runtime;
        let inner = runtime.block_on(self.inner.begin_transaction(&CancellationToken::new()))?;
        Ok(BlockingTransaction { inner, runtime })
    }

    /// Begin a transaction at an explicit isolation level.
    pub fn begin_transaction_with(
        &mut self,
        isolation: IsolationLevel,
    ) -> Result<BlockingTransaction<'_, C>, Error> {
        let runtime = &*self.runtime;
        let inner = runtime.block_on(
            self.inner
                .begin_transaction_with(isolation, &CancellationToken::new()),
        )?;
        Ok(BlockingTransaction { inner, runtime })
    }

    /// Release the connection handle. Calling this again is a no-op.
    pub fn close(&mut self) -> Result<(), Error> {
        self.runtime.block_on(self.inner.close())
    }

    /// The async session underneath.
    pub const fn session(&self) -> &Session<C> {
        &self.inner
    }
}

impl<C: Connection> Drop for BlockingSession<C> {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            warn!(error = %error, "Failed to close blocking session on drop");
        }
    }
}

impl<C: Connection> fmt::Debug for BlockingSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingSession")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

/// Blocking front end for a [`Transaction`].
///
/// Dropping an active transaction rolls it back before returning.
pub struct BlockingTransaction<'s, C: Connection> {
    inner: Transaction<'s, C>,
    runtime: &'s Runtime,
}

impl<C: Connection> BlockingTransaction<'_, C> {
    /// Commit the transaction.
    pub fn commit(&mut self) -> Result<(), Error> {
        self.runtime
            .block_on(self.inner.commit(&CancellationToken::new()))
    }

    /// Roll back the transaction.
    pub fn rollback(&mut self) -> Result<(), Error> {
        self.runtime
            .block_on(self.inner.rollback(&CancellationToken::new()))
    }

    /// Roll back if still active and release the scope. Idempotent.
    pub fn dispose(&mut self) -> Result<(), Error> {
        self.runtime.block_on(self.inner.dispose())
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> TransactionState {
        self.inner.state()
    }

    /// Run a non-query statement inside the transaction.
    pub fn execute<'q>(&mut self, command: impl Into<Command<'q>>) -> Result<u64, Error> {
        self.runtime
            .block_on(self.inner.execute(command, &CancellationToken::new()))
    }

    /// Run a scalar statement inside the transaction.
    pub fn execute_scalar<'q, T: FromValue>(
        &mut self,
        command: impl Into<Command<'q>>,
    ) -> Result<T, Error> {
        self.runtime
            .block_on(self.inner.execute_scalar(command, &CancellationToken::new()))
    }

    /// Run a query inside the transaction and iterate over its rows.
    pub fn execute_reader<'a>(
        &'a mut self,
        command: impl Into<Command<'a>>,
    ) -> Result<BlockingRowReader<'a>, Error> {
        let runtime = self.runtime;
        let inner = runtime.block_on(
            self.inner
                .execute_reader(command, &CancellationToken::new()),
        )?;
        Ok(BlockingRowReader { inner, runtime })
    }

    /// Run a statement batch inside the transaction.
    pub fn execute_grid_reader<'a>(
        &'a mut self,
        command: impl Into<Command<'a>>,
    ) -> Result<BlockingGridReader<'a>, Error> {
        let runtime = self.runtime;
        let inner = runtime.block_on(
            self.inner
                .execute_grid_reader(command, &CancellationToken::new()),
        )?;
        Ok(BlockingGridReader { inner, runtime })
    }
}

impl<'s, C: Connection> Deref for BlockingTransaction<'s, C> {
    type Target = Transaction<'s, C>;

    fn deref(&self) -> &Transaction<'s, C> {
        &self.inner
    }
}

impl<C: Connection> Drop for BlockingTransaction<'_, C> {
    fn drop(&mut self) {
        if let Err(error) = self.dispose() {
            warn!(error = %error, "Failed to roll back blocking transaction on drop");
        }
    }
}

impl<C: Connection> fmt::Debug for BlockingTransaction<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingTransaction")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

/// Blocking iterator over the rows of one result set.
pub struct BlockingRowReader<'s> {
    inner: RowReader<'s>,
    runtime: &'s Runtime,
}

impl BlockingRowReader<'_> {
    /// Advance to the next row and materialize it as `T`.
    pub fn read_as<T: FromRow>(&mut self) -> Result<Option<T>, Error> {
        self.runtime.block_on(self.inner.read_as())
    }

    /// Materialize every remaining row as `T`.
    pub fn read_all<T: FromRow>(&mut self) -> Result<Vec<T>, Error> {
        self.runtime.block_on(self.inner.read_all())
    }

    /// Release the cursor. Idempotent.
    pub fn close(&mut self) {
        self.inner.close();
    }
}

impl Iterator for BlockingRowReader<'_> {
    type Item = Result<Row, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.inner.read()).transpose()
    }
}

impl fmt::Debug for BlockingRowReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingRowReader")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

/// Blocking reader over the result sets of one statement batch.
pub struct BlockingGridReader<'s> {
    inner: GridReader<'s>,
    runtime: &'s Runtime,
}

impl BlockingGridReader<'_> {
    /// Read the next result set as a sequence of `T`.
    pub fn read<T: FromRow>(&mut self) -> Result<Vec<T>, Error> {
        self.runtime.block_on(self.inner.read())
    }

    /// Read the first row of the next result set.
    pub fn read_first<T: FromRow>(&mut self) -> Result<T, Error> {
        self.runtime.block_on(self.inner.read_first())
    }

    /// Read the first row of the next result set, or `None` if it is empty.
    pub fn read_first_optional<T: FromRow>(&mut self) -> Result<Option<T>, Error> {
        self.runtime.block_on(self.inner.read_first_optional())
    }

    /// Read the only row of the next result set.
    pub fn read_single<T: FromRow>(&mut self) -> Result<T, Error> {
        self.runtime.block_on(self.inner.read_single())
    }

    /// Read the only row of the next result set, or `None` if it is empty.
    pub fn read_single_optional<T: FromRow>(&mut self) -> Result<Option<T>, Error> {
        self.runtime.block_on(self.inner.read_single_optional())
    }

    /// Whether the cursor has been released.
    pub const fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Release the cursor. Idempotent.
    pub fn close(&mut self) {
        self.inner.close();
    }
}

impl fmt::Debug for BlockingGridReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingGridReader")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}
