//! Options shared by every session produced by one database.

use std::time::Duration;

use crate::driver::IsolationLevel;
use crate::error::Error;

/// Default logical database name attached to log events.
const DEFAULT_NAME: &str = "default";

/// Configuration captured when a database is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// Logical database name, attached to every log event.
    pub name: String,
    /// Isolation level used by `begin_transaction` when none is given.
    pub isolation_level: Option<IsolationLevel>,
    /// Upper bound for each statement execution.
    pub command_timeout: Option<Duration>,
}

impl DatabaseOptions {
    /// Create options for the named logical database.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            isolation_level: None,
            command_timeout: None,
        }
    }

    /// Set the default transaction isolation level.
    #[must_use]
    pub const fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Set the per-statement timeout.
    #[must_use]
    pub const fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Check that the options are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an empty name or a zero timeout.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::Configuration(
                "database name must not be empty".to_owned(),
            ));
        }
        if self.command_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(Error::Configuration(
                "command timeout must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self::new(DEFAULT_NAME)
    }
}
