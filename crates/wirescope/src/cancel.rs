//! Cooperative cancellation for suspendable operations.
//!
//! A [`CancellationToken`] is cheap to clone; every clone observes the same
//! signal. Operations check the token before starting any I/O. Once the I/O
//! is in flight it is raced against the token only when the connection
//! reports that dropping the operation also stops it on the server.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{DriverError, Error};

/// A shared, one-way cancellation signal.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    /// Create a token that has not been cancelled.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            // The sender lives as long as `self`, so this never resolves.
            std::future::pending::<()>().await;
        }
    }

    /// Fail with [`Error::Cancelled`] if the token is already signalled.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one driver operation under a cancellation token and optional timeout.
///
/// The token is checked before the operation is first polled. When
/// `abortable`, cancellation or the timeout drops the in-flight future and
/// yields [`Error::Cancelled`] or [`Error::Timeout`]. Otherwise the operation
/// runs to completion and any limit is left to the server.
pub(crate) async fn guarded<T, F>(
    cancel: &CancellationToken,
    timeout: Option<Duration>,
    abortable: bool,
    operation: F,
) -> Result<T, Error>
where
    F: Future<Output = Result<T, DriverError>>,
{
    cancel.check()?;
    if !abortable {
        return operation.await.map_err(Error::Driver);
    }

    let bounded = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, operation).await {
                Ok(result) => result.map_err(Error::Driver),
                Err(_elapsed) => Err(Error::Timeout { limit }),
            },
            None => operation.await.map_err(Error::Driver),
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        result = bounded => result,
    }
}
