//! Statements and their bound parameters.

use crate::value::Value;

/// One statement (or statement batch) plus positional parameters.
///
/// Parameter binding itself is left to the driver; the command only carries
/// the values in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Command<'q> {
    sql: &'q str,
    params: Vec<Value>,
}

impl<'q> Command<'q> {
    /// Create a command with no parameters.
    pub const fn new(sql: &'q str) -> Self {
        Self {
            sql,
            params: Vec::new(),
        }
    }

    /// Append a positional parameter.
    #[must_use]
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// The statement text.
    pub const fn sql(&self) -> &'q str {
        self.sql
    }

    /// Bound parameters, in order.
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Split into statement text and parameters.
    pub fn into_parts(self) -> (&'q str, Vec<Value>) {
        (self.sql, self.params)
    }
}

impl<'q> From<&'q str> for Command<'q> {
    fn from(sql: &'q str) -> Self {
        Self::new(sql)
    }
}

impl<'q> From<&'q String> for Command<'q> {
    fn from(sql: &'q String) -> Self {
        Self::new(sql)
    }
}
