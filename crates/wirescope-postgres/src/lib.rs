//! `PostgreSQL` driver binding for `wirescope`.
//!
//! Implements the core's [`Connection`](wirescope::Connection) capability on
//! top of [`sqlx`]. Each session owns one dedicated `PgConnection`; there is
//! no pool, so a session's lifetime is exactly its connection's lifetime.
//!
//! ```text
//! PostgresConfig --from_env()--> PgConnectionFactory
//!                                      |
//!                                 create() per session
//!                                      v
//!                                 PgConnection --open()--> sqlx::PgConnection
//! ```
//!
//! # Modules
//!
//! - [`config`] -- environment-driven connection configuration
//! - [`connection`] -- connection factory and the `Connection` implementation
//! - [`decode`] -- parameter binding and row decoding

pub mod config;
pub mod connection;
pub mod decode;

pub use config::PostgresConfig;
pub use connection::{PgConnection, PgConnectionFactory};

use wirescope::{Database, Error};

/// Build a [`Database`] from a configuration.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if the URL cannot be parsed or the
/// derived options are invalid.
pub fn database(config: &PostgresConfig) -> Result<Database<PgConnectionFactory>, Error> {
    Database::new(config.database_options(), PgConnectionFactory::new(config)?)
}
