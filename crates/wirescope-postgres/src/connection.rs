//! `sqlx`-backed implementation of the core connection capability.

use std::time::Duration;

use futures::StreamExt as _;
use futures::stream::{self, BoxStream};
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection as _, Either, Executor as _};
use tracing::debug;
use wirescope::{
    Command, Connection, ConnectionFactory, DriverError, Error, Fetched, IsolationLevel, Row,
};

use crate::config::PostgresConfig;
use crate::decode::{bind_all, decode_row};

/// Produces one dedicated, unopened [`PgConnection`] per session.
#[derive(Debug, Clone)]
pub struct PgConnectionFactory {
    options: PgConnectOptions,
    connect_timeout: Duration,
}

impl PgConnectionFactory {
    /// Create a factory from a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the URL cannot be parsed.
    pub fn new(config: &PostgresConfig) -> Result<Self, Error> {
        Ok(Self {
            options: config.connect_options()?,
            connect_timeout: config.connect_timeout,
        })
    }
}

impl ConnectionFactory for PgConnectionFactory {
    type Connection = PgConnection;

    fn create(&self) -> PgConnection {
        PgConnection {
            options: self.options.clone(),
            connect_timeout: self.connect_timeout,
            inner: None,
        }
    }
}

/// One `PostgreSQL` connection handle.
///
/// Nothing touches the network until [`Connection::open`]. Dropping the
/// handle drops the socket. Dropping an in-flight statement does not stop it
/// on the server, so [`Connection::supports_cancellation`] stays `false`.
#[derive(Debug)]
pub struct PgConnection {
    options: PgConnectOptions,
    connect_timeout: Duration,
    inner: Option<sqlx::PgConnection>,
}

impl PgConnection {
    /// Whether the physical connection is established.
    pub const fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    fn live(&mut self) -> Result<&mut sqlx::PgConnection, DriverError> {
        self.inner
            .as_mut()
            .ok_or_else(|| "connection is not open".into())
    }
}

impl Connection for PgConnection {
    async fn open(&mut self) -> Result<(), DriverError> {
        if self.inner.is_some() {
            return Ok(());
        }
        debug!(
            host = self.options.get_host(),
            port = self.options.get_port(),
            "Connecting to PostgreSQL"
        );
        let connect = sqlx::PgConnection::connect_with(&self.options);
        let connection = tokio::time::timeout(self.connect_timeout, connect).await??;
        self.inner = Some(connection);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if let Some(connection) = self.inner.take() {
            connection.close().await?;
        }
        Ok(())
    }

    async fn execute(&mut self, command: Command<'_>) -> Result<u64, DriverError> {
        let connection = self.live()?;
        let (sql, params) = command.into_parts();
        // Unparameterized text goes through the simple protocol so that
        // multi-statement scripts and DDL work.
        let result = if params.is_empty() {
            connection.execute(sqlx::raw_sql(sql)).await?
        } else {
            connection.execute(bind_all(sqlx::query(sql), params)).await?
        };
        Ok(result.rows_affected())
    }

    fn fetch<'c>(&'c mut self, command: Command<'c>) -> BoxStream<'c, Result<Row, DriverError>> {
        let connection = match self.live() {
            Ok(connection) => connection,
            Err(error) => return stream::once(async move { Err(error) }).boxed(),
        };
        let (sql, params) = command.into_parts();
        connection
            .fetch(bind_all(sqlx::query(sql), params))
            .map(|row| -> Result<Row, DriverError> { Ok(decode_row(&row?)?) })
            .boxed()
    }

    fn fetch_multiple<'c>(
        &'c mut self,
        command: Command<'c>,
    ) -> BoxStream<'c, Result<Fetched, DriverError>> {
        let connection = match self.live() {
            Ok(connection) => connection,
            Err(error) => return stream::once(async move { Err(error) }).boxed(),
        };
        let (sql, params) = command.into_parts();
        // Parameters force the extended protocol, which allows one statement.
        let items = if params.is_empty() {
            connection.fetch_many(sqlx::raw_sql(sql))
        } else {
            connection.fetch_many(bind_all(sqlx::query(sql), params))
        };
        items
            .map(|item| -> Result<Fetched, DriverError> {
                match item? {
                    Either::Left(done) => Ok(Fetched::Done {
                        rows_affected: done.rows_affected(),
                    }),
                    Either::Right(row) => Ok(Fetched::Row(decode_row(&row)?)),
                }
            })
            .boxed()
    }

    async fn begin(&mut self, isolation: Option<IsolationLevel>) -> Result<(), DriverError> {
        let statement = isolation.map_or_else(
            || "BEGIN".to_owned(),
            |level| format!("BEGIN ISOLATION LEVEL {level}"),
        );
        self.live()?.execute(sqlx::raw_sql(&statement)).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.live()?.execute(sqlx::raw_sql("COMMIT")).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.live()?.execute(sqlx::raw_sql("ROLLBACK")).await?;
        Ok(())
    }
}
