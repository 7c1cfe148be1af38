//! Error types for the session lifecycle core.
//!
//! Every failure surfaces as one [`Error`] variant per kind. Failures from
//! the underlying driver are carried unmodified in [`Error::Driver`] and can
//! be downcast back to the driver's own error type.

use std::time::Duration;

/// A failure raised by the underlying connection/driver collaborator.
///
/// Kept as a trait object so that the core never reclassifies driver
/// errors; callers downcast to the concrete type (e.g. `sqlx::Error`).
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while acquiring, using, or releasing a resource.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required construction argument was absent or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The resource was used after its handle had been released.
    #[error("{resource} has been disposed")]
    Disposed {
        /// The kind of resource (`Session`, `Transaction`, ...).
        resource: &'static str,
    },

    /// A scalar or row value could not be coerced to the requested shape.
    #[error("cannot convert value into {expected}: {reason}")]
    Conversion {
        /// The requested target type.
        expected: &'static str,
        /// Why the coercion failed.
        reason: String,
    },

    /// A single-row read received the wrong number of rows.
    #[error("expected {expected}, found {found} row(s)")]
    Cardinality {
        /// The expected row count, in words.
        expected: &'static str,
        /// The number of rows actually present.
        found: usize,
    },

    /// A grid read found that the batch produced no result set at all.
    #[error("the statement batch produced no result set")]
    NoResultSet,

    /// The operation was aborted by its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// A child scope of the same kind is already open on the session.
    #[error("a {scope} is already open on this session")]
    ScopeActive {
        /// The scope that is still outstanding.
        scope: &'static str,
    },

    /// The configured command timeout elapsed.
    #[error("command timed out after {limit:?}")]
    Timeout {
        /// The timeout that was exceeded.
        limit: Duration,
    },

    /// The runtime backing the blocking adapter could not be started.
    #[error("failed to start blocking runtime: {0}")]
    Runtime(#[from] std::io::Error),

    /// The driver reported a failure.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}

impl Error {
    /// Build a [`Error::Disposed`] for the given resource kind.
    pub const fn disposed(resource: &'static str) -> Self {
        Self::Disposed { resource }
    }

    /// Build a [`Error::Conversion`] targeting `T`.
    pub fn conversion<T: ?Sized>(reason: impl Into<String>) -> Self {
        Self::Conversion {
            expected: std::any::type_name::<T>(),
            reason: reason.into(),
        }
    }

    /// Whether this error reports use of a released resource.
    pub const fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed { .. })
    }

    /// Whether this error was produced by a cancellation signal.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The driver error, if this failure came from the driver.
    pub fn as_driver(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Driver(source) => Some(source.as_ref()),
            _ => None,
        }
    }
}
