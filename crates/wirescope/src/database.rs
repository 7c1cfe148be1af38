//! Session factories.
//!
//! A [`Database`] pairs [`DatabaseOptions`] with a [`ConnectionFactory`] and
//! produces open [`Session`]s. A [`NamedDatabase`] carries the logical
//! database identity in its type, so a component asking for the orders
//! database cannot be handed the audit database's connections.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::driver::ConnectionFactory;
use crate::error::Error;
use crate::options::DatabaseOptions;
use crate::session::Session;

const COMPONENT: &str = "Database";

/// Produces sessions over connections from one factory.
pub struct Database<F> {
    options: Arc<DatabaseOptions>,
    factory: F,
}

impl<F: ConnectionFactory> Database<F> {
    /// Create a database from validated options and a connection factory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the options are invalid.
    pub fn new(options: DatabaseOptions, factory: F) -> Result<Self, Error> {
        options.validate()?;
        Ok(Self {
            options: Arc::new(options),
            factory,
        })
    }

    /// Options shared by every session from this database.
    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// Open a new session.
    ///
    /// If opening fails (including by cancellation) the half-built session is
    /// released before the error is returned, so no handle outlives the call.
    pub async fn connect(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Session<F::Connection>, Error> {
        debug!(
            component = COMPONENT,
            database = %self.options.name,
            "Starting a new database session..."
        );
        let mut session = Session::new(self.factory.create(), Arc::clone(&self.options));
        if let Err(error) = session.open(cancel).await {
            session.discard().await;
            return Err(error);
        }
        info!(
            component = COMPONENT,
            database = %self.options.name,
            "Database session started successfully."
        );
        Ok(session)
    }
}

impl<F> Database<F> {
    /// Start building a database; both options and factory are required.
    pub const fn builder() -> DatabaseBuilder<F> {
        DatabaseBuilder {
            options: None,
            factory: None,
        }
    }
}

impl<F> fmt::Debug for Database<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Builder that fails fast when a required argument is missing.
pub struct DatabaseBuilder<F> {
    options: Option<DatabaseOptions>,
    factory: Option<F>,
}

impl<F: ConnectionFactory> DatabaseBuilder<F> {
    /// Set the database options.
    #[must_use]
    pub fn options(mut self, options: DatabaseOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Set the connection factory.
    #[must_use]
    pub fn factory(mut self, factory: F) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Build the database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if options or factory were not given,
    /// or if the options are invalid.
    pub fn build(self) -> Result<Database<F>, Error> {
        let options = self
            .options
            .ok_or_else(|| Error::Configuration("database options are required".to_owned()))?;
        let factory = self
            .factory
            .ok_or_else(|| Error::Configuration("connection factory is required".to_owned()))?;
        Database::new(options, factory)
    }
}

impl<F> fmt::Debug for DatabaseBuilder<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseBuilder")
            .field("options", &self.options)
            .field("factory", &self.factory.is_some())
            .finish()
    }
}

/// A logical database identity, used as a type-level tag.
///
/// ```
/// use wirescope::DatabaseName;
///
/// struct Orders;
///
/// impl DatabaseName for Orders {
///     const NAME: &'static str = "orders";
/// }
/// ```
pub trait DatabaseName: Send + Sync + 'static {
    /// Name used for logging and default options.
    const NAME: &'static str;
}

/// A connection factory bound to the logical database `N`.
pub struct NamedFactory<N, F> {
    factory: F,
    name: PhantomData<fn() -> N>,
}

impl<N: DatabaseName, F: ConnectionFactory> NamedFactory<N, F> {
    /// Tag `factory` as producing connections to `N`.
    pub const fn new(factory: F) -> Self {
        Self {
            factory,
            name: PhantomData,
        }
    }
}

impl<N, F> fmt::Debug for NamedFactory<N, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedFactory")
            .field("database", &std::any::type_name::<N>())
            .finish_non_exhaustive()
    }
}

/// A [`Database`] bound to the logical database `N` at the type level.
pub struct NamedDatabase<N, F> {
    inner: Database<F>,
    name: PhantomData<fn() -> N>,
}

impl<N: DatabaseName, F: ConnectionFactory> NamedDatabase<N, F> {
    /// Create a named database. Only a factory tagged with the same `N` is
    /// accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the options are invalid.
    pub fn new(options: DatabaseOptions, factory: NamedFactory<N, F>) -> Result<Self, Error> {
        Ok(Self {
            inner: Database::new(options, factory.factory)?,
            name: PhantomData,
        })
    }

    /// Create a named database with default options named after `N`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `N::NAME` is empty.
    pub fn with_defaults(factory: NamedFactory<N, F>) -> Result<Self, Error> {
        Self::new(DatabaseOptions::new(N::NAME), factory)
    }

    /// Open a new session on `N`.
    pub async fn connect(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Session<F::Connection>, Error> {
        self.inner.connect(cancel).await
    }

    /// The untyped database.
    pub const fn database(&self) -> &Database<F> {
        &self.inner
    }

    /// Drop the type-level tag.
    pub fn into_inner(self) -> Database<F> {
        self.inner
    }
}

impl<N, F> fmt::Debug for NamedDatabase<N, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedDatabase")
            .field("database", &std::any::type_name::<N>())
            .field("options", &self.inner.options)
            .finish()
    }
}
