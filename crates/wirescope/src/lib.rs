//! Deterministic lifecycle management for database sessions.
//!
//! `wirescope` sits between application code and a relational driver. It
//! does not execute SQL itself; it governs the acquisition, use, and release
//! of three resource kinds: connections, transactions, and multi-result-set
//! readers. Every resource has exactly one owner and is released on every
//! exit path (success, error, or cancellation).
//!
//! # Architecture
//!
//! ```text
//! Database --connect()--> Session (owns one Connection)
//!                            |
//!                            +-- execute / execute_scalar
//!                            +-- execute_reader ------> RowReader   (borrows the session)
//!                            +-- execute_grid_reader -> GridReader  (borrows the session)
//!                            +-- begin_transaction ---> Transaction (borrows the session)
//! ```
//!
//! Every operation comes in two forms: the async API in this module and the
//! [`blocking`] adapter, which drives the same async code on a private
//! runtime.
//!
//! # Modules
//!
//! - [`database`] -- session factories, including type-tagged databases
//! - [`session`] -- the session and its row reader
//! - [`transaction`] -- transaction scopes with implicit rollback
//! - [`grid_reader`] -- sequential reads over multiple result sets
//! - [`driver`] -- the capability contract a driver implements
//! - [`blocking`] -- blocking front end over the async core
//! - [`cancel`] -- cooperative cancellation
//! - [`error`] -- the error taxonomy

pub mod blocking;
pub mod cancel;
pub mod command;
pub mod database;
pub mod driver;
pub mod error;
pub mod grid_reader;
pub mod options;
pub mod row;
pub mod session;
pub mod transaction;
pub mod value;

#[cfg(test)]
mod testing;

// Re-export primary types for convenience.
pub use blocking::{
    BlockingDatabase, BlockingGridReader, BlockingNamedDatabase, BlockingRowReader,
    BlockingSession, BlockingTransaction,
};
pub use cancel::CancellationToken;
pub use command::Command;
pub use database::{Database, DatabaseBuilder, DatabaseName, NamedDatabase, NamedFactory};
pub use driver::{Connection, ConnectionFactory, Fetched, IsolationLevel};
pub use error::{DriverError, Error};
pub use grid_reader::GridReader;
pub use options::DatabaseOptions;
pub use row::{FromRow, Record, Row};
pub use session::{RowReader, Session};
pub use transaction::{Transaction, TransactionState};
pub use value::{FromValue, Value};
