//! Run context and callback traits
//!
//! These traits let callers observe and steer a run without the engine
//! depending on a particular terminal UI or prompt implementation.

use crate::error::ProviderError;
use crate::planner::{Operation, Plan};
use crate::types::OperationReport;
use anyhow::Result;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Progress callback for apply runs
///
/// Called from the scheduling thread only, so implementations need not be
/// `Sync`.
pub trait ProgressCallback: Send {
    /// Called once before any operation is dispatched
    fn on_run_start(&mut self, total: usize);

    /// Called when an operation is handed to a worker
    fn on_operation_start(&mut self, operation: &Operation);

    /// Called when a provider call is about to be retried
    fn on_retry(&mut self, node_id: &str, attempt: u32, error: &ProviderError, delay: Duration);

    /// Called when an operation reaches a terminal state
    fn on_operation_complete(&mut self, report: &OperationReport);

    /// Called after the last operation finished
    fn on_run_complete(&mut self);
}

/// Confirmation callback used before applying a plan with changes
pub trait ConfirmCallback: Send {
    /// Ask whether `plan` should be applied
    fn confirm(&mut self, plan: &Plan) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize) {}
    fn on_operation_start(&mut self, _operation: &Operation) {}
    fn on_retry(
        &mut self,
        _node_id: &str,
        _attempt: u32,
        _error: &ProviderError,
        _delay: Duration,
    ) {
    }
    fn on_operation_complete(&mut self, _report: &OperationReport) {}
    fn on_run_complete(&mut self) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _plan: &Plan) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _plan: &Plan) -> Result<bool> {
        Ok(false)
    }
}

/// Shared cancellation signal.
///
/// Cancelling stops the executor from dispatching new operations and wakes
/// operations sleeping in retry backoff. Calls already inside a provider
/// run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, wake) = &*self.inner;
        *lock(flag) = true;
        wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *lock(&self.inner.0)
    }

    /// Sleep for `timeout` unless cancelled first.
    ///
    /// Returns `true` if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, wake) = &*self.inner;
        let guard = lock(flag);
        let result = wake.wait_timeout_while(guard, timeout, |cancelled| !*cancelled);
        match result {
            Ok((guard, _)) => *guard,
            Err(poisoned) => *poisoned.into_inner().0,
        }
    }
}

fn lock(flag: &Mutex<bool>) -> std::sync::MutexGuard<'_, bool> {
    match flag.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
