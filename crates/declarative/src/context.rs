//! Progress, confirmation and cancellation hooks
//!
//! These traits allow the declarative crate to be used without
//! depending on a specific terminal UI.

use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::NodeError;
use crate::executor::NodeReport;
use crate::types::Operation;

/// Progress callback for execution
///
/// Called from worker threads, so implementations must be `Sync`.
pub trait ProgressCallback: Sync {
    /// Called once before dispatch with the number of entries to run
    fn on_start(&self, total: usize);

    /// Called when a provider operation begins for a resource
    fn on_node_start(&self, id: &str, operation: Operation);

    /// Called when a provider call failed and will be retried
    fn on_retry(&self, id: &str, attempt: u32, error: &NodeError, delay: Duration);

    /// Called when a resource reaches a terminal status
    fn on_node_complete(&self, report: &NodeReport);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback {
    /// Ask the user to confirm an action
    ///
    /// Returns `true` if the user confirmed.
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_start(&self, _total: usize) {}
    fn on_node_start(&self, _id: &str, _operation: Operation) {}
    fn on_retry(&self, _id: &str, _attempt: u32, _error: &NodeError, _delay: Duration) {}
    fn on_node_complete(&self, _report: &NodeReport) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Shared cancellation flag
///
/// Cancelling stops dispatch of resources that have not started yet.
/// Provider calls already in flight run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
