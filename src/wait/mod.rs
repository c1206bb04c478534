//! Bounded polling of asynchronous remote operations.

use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, warn};

use crate::disk::{DiskService, Operation};

/// Interval between two status polls.
pub const OPERATION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Wall-clock budget for a single operation.
pub const OPERATION_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while waiting for an operation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WaitError {
    /// Raised when the operation does not finish within the budget.
    #[error("timeout while waiting for operation {operation} on {target} to complete")]
    Timeout {
        /// Provider operation name.
        operation: String,
        /// Resource the operation acts upon.
        target: String,
        /// Budget that elapsed.
        timeout: Duration,
    },
    /// Raised when the operation finished with an error payload.
    #[error("operation {operation} on {target} failed: {message}")]
    Failed {
        /// Provider operation name.
        operation: String,
        /// Resource the operation acts upon.
        target: String,
        /// Error reported by the provider.
        message: String,
    },
}

/// Polls an operation until it reports completion or the deadline passes.
///
/// Status fetch failures are logged and polling continues; only the
/// deadline ends an unfinished wait. A poll still in flight at the deadline
/// is abandoned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OperationWaiter {
    poll_interval: Duration,
    timeout: Duration,
}

impl Default for OperationWaiter {
    fn default() -> Self {
        Self::new(OPERATION_POLL_INTERVAL, OPERATION_WAIT_TIMEOUT)
    }
}

impl OperationWaiter {
    /// Creates a waiter with explicit timing.
    #[must_use]
    pub const fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    /// Overall wait budget.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Waits for `operation` to finish.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Timeout`] when the budget elapses first, or
    /// [`WaitError::Failed`] when the finished operation carries an error.
    pub async fn wait<S>(&self, service: &S, operation: &Operation) -> Result<(), WaitError>
    where
        S: DiskService + ?Sized,
    {
        let deadline = Instant::now() + self.timeout;
        while Instant::now() < deadline {
            debug!(
                operation = %operation.name,
                target = %operation.target_link,
                "waiting for operation"
            );
            let Ok(polled) = timeout_at(deadline, service.get_operation(operation)).await else {
                break;
            };
            match polled {
                Ok(current) if current.is_done() => return finished(current),
                Ok(current) => {
                    debug!(operation = %current.name, status = ?current.status, "operation status");
                }
                Err(err) => {
                    warn!(
                        operation = %operation.name,
                        target = %operation.target_link,
                        error = %err,
                        "error while getting operation"
                    );
                }
            }
            sleep(self.poll_interval).await;
        }

        warn!(
            operation = %operation.name,
            target = %operation.target_link,
            timeout = ?self.timeout,
            "timeout while waiting for operation to complete"
        );
        Err(WaitError::Timeout {
            operation: operation.name.clone(),
            target: operation.target_link.clone(),
            timeout: self.timeout,
        })
    }
}

fn finished(operation: Operation) -> Result<(), WaitError> {
    match operation.error {
        None => Ok(()),
        Some(message) => Err(WaitError::Failed {
            operation: operation.name,
            target: operation.target_link,
            message,
        }),
    }
}

#[cfg(test)]
mod tests;
