//! Transaction scopes.
//!
//! ```text
//! Active --commit()----> Committed
//! Active --rollback()--> RolledBack
//! Active --dispose()---> ImplicitlyRolledBack
//! ```
//!
//! Every terminal state rejects further commits and rollbacks with
//! [`Error::Disposed`]. A transaction is never committed without an explicit
//! [`Transaction::commit`].

use std::fmt;
use std::ops::{Deref, DerefMut};

use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::driver::Connection;
use crate::error::Error;
use crate::session::Session;

const COMPONENT: &str = "Transaction";

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Open; statements issued through the transaction run inside it.
    Active,
    /// Committed explicitly.
    Committed,
    /// Rolled back explicitly.
    RolledBack,
    /// Disposed before any decision; rolled back on the caller's behalf.
    ImplicitlyRolledBack,
}

/// A transaction scope borrowed from a [`Session`].
///
/// The transaction dereferences to its session, so statements issued through
/// it run inside the transaction. Dropping an active transaction cannot run
/// async code, so the rollback is deferred: the session issues it before its
/// next operation, and closing the session discards it on the server. Call
/// [`dispose`](Self::dispose) to roll back immediately.
pub struct Transaction<'s, C: Connection> {
    session: &'s mut Session<C>,
    state: TransactionState,
    released: bool,
}

impl<'s, C: Connection> Transaction<'s, C> {
    pub(crate) const fn new(session: &'s mut Session<C>) -> Self {
        Self {
            session,
            state: TransactionState::Active,
            released: false,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> TransactionState {
        self.state
    }

    /// Whether neither commit nor rollback has happened yet.
    pub const fn is_active(&self) -> bool {
        matches!(self.state, TransactionState::Active)
    }

    fn ensure_active(&self) -> Result<(), Error> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::disposed(COMPONENT))
        }
    }

    /// Move to a terminal state and tell the session the scope has closed.
    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        if !self.released {
            self.released = true;
            self.session.end_transaction();
        }
    }

    /// Commit the transaction.
    ///
    /// The token is only checked before the commit starts; once sent, the
    /// commit runs to completion so its outcome is never ambiguous. On a
    /// driver failure the transaction stays active and may be retried or
    /// rolled back.
    pub async fn commit(&mut self, cancel: &CancellationToken) -> Result<(), Error> {
        self.ensure_active()?;
        cancel.check()?;
        debug!(
            component = COMPONENT,
            database = %self.session.options().name,
            "Committing the database transaction..."
        );
        self.session.connection()?.commit().await?;
        self.finish(TransactionState::Committed);
        info!(
            component = COMPONENT,
            database = %self.session.options().name,
            "Database transaction committed successfully."
        );
        Ok(())
    }

    /// Roll back the transaction.
    ///
    /// Cancellation follows the same policy as [`commit`](Self::commit).
    pub async fn rollback(&mut self, cancel: &CancellationToken) -> Result<(), Error> {
        self.ensure_active()?;
        cancel.check()?;
        debug!(
            component = COMPONENT,
            database = %self.session.options().name,
            "Rolling back the database transaction..."
        );
        self.session.connection()?.rollback().await?;
        self.finish(TransactionState::RolledBack);
        info!(
            component = COMPONENT,
            database = %self.session.options().name,
            "Database transaction rolled back successfully."
        );
        Ok(())
    }

    /// Release the transaction, rolling it back if it is still active.
    ///
    /// Calling this again, or after commit or rollback, is a no-op. If the
    /// session's connection was already released the server discarded the
    /// transaction with it and no rollback is sent.
    pub async fn dispose(&mut self) -> Result<(), Error> {
        if !self.is_active() {
            return Ok(());
        }
        if self.session.is_closed() {
            self.finish(TransactionState::ImplicitlyRolledBack);
            return Ok(());
        }
        debug!(
            component = COMPONENT,
            database = %self.session.options().name,
            "Rolling back undecided database transaction..."
        );
        let result = self.session.connection()?.rollback().await;
        if result.is_err() {
            self.session.owe_rollback();
        }
        self.finish(TransactionState::ImplicitlyRolledBack);
        result?;
        info!(
            component = COMPONENT,
            database = %self.session.options().name,
            "Undecided database transaction rolled back successfully."
        );
        Ok(())
    }
}

impl<C: Connection> Deref for Transaction<'_, C> {
    type Target = Session<C>;

    fn deref(&self) -> &Session<C> {
        self.session
    }
}

impl<C: Connection> DerefMut for Transaction<'_, C> {
    fn deref_mut(&mut self) -> &mut Session<C> {
        self.session
    }
}

impl<C: Connection> Drop for Transaction<'_, C> {
    fn drop(&mut self) {
        if self.is_active() {
            debug!(
                component = COMPONENT,
                database = %self.session.options().name,
                "Transaction dropped undecided; rollback deferred to the session."
            );
            self.session.owe_rollback();
            self.state = TransactionState::ImplicitlyRolledBack;
        }
        if !self.released {
            self.released = true;
            self.session.end_transaction();
        }
    }
}

impl<C: Connection> fmt::Debug for Transaction<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("database", &self.session.options().name)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
