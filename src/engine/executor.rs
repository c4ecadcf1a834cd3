//! Execution engine - groundwork executor with UI integration

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use indicatif::ProgressBar;
use std::io::IsTerminal;
use std::time::Duration;

use declarative::{
    ApplyReport, CancelToken, ChangeSet, ConfirmCallback, ExecuteOptions, Executor, NodeError,
    NodeReport, NodeStatus, Operation, ProgressCallback, ProviderRegistry, ResourceGraph,
    StateStore,
};

use crate::progress;
use crate::ui;

/// Everything needed to apply one change set
pub struct ExecuteRequest<'a> {
    pub graph: &'a ResourceGraph,
    pub changeset: &'a ChangeSet,
    pub store: &'a dyn StateStore,
    pub registry: &'a ProviderRegistry,
    pub options: ExecuteOptions,
    /// Skip the confirmation prompt
    pub yes: bool,
    pub quiet: bool,
    /// Verb shown in the prompt, e.g. "apply" or "destroy"
    pub action: &'a str,
}

/// Execute a change set with a progress bar, confirmation and Ctrl+C handling
pub fn execute(request: ExecuteRequest<'_>) -> Result<ApplyReport> {
    let cancel = CancelToken::new();
    install_interrupt_handler(&cancel);

    let progress = TerminalProgress::new(progress::bar(0, request.quiet));
    let mut confirm = PromptConfirm {
        yes: request.yes,
        action: request.action,
    };

    let report = Executor::new(request.registry)
        .with_options(request.options)
        .with_cancel(cancel)
        .execute(
            request.graph,
            request.changeset,
            request.store,
            &progress,
            &mut confirm,
        )
        .with_context(|| format!("Failed to {}", request.action))?;

    progress.bar.finish_and_clear();
    Ok(report)
}

/// Wire Ctrl+C to the cancel token
///
/// The handler can only be installed once per process; later calls keep
/// the first token, which is fine for a CLI running a single execution.
fn install_interrupt_handler(cancel: &CancelToken) {
    let token = cancel.clone();
    let result = ctrlc::set_handler(move || {
        if !token.is_cancelled() {
            eprintln!(
                "\n  {} Interrupted, waiting for in-flight operations to finish...",
                "⚠".yellow()
            );
        }
        token.cancel();
    });
    if let Err(e) = result {
        log::debug!("Could not install Ctrl+C handler: {e}");
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Progress bar that prints one line per finished resource
struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.enable_steady_tick(Duration::from_millis(120));
    }

    fn on_node_start(&self, id: &str, operation: Operation) {
        self.bar.set_message(format!("{operation} {id}"));
    }

    fn on_retry(&self, id: &str, attempt: u32, error: &NodeError, delay: Duration) {
        self.bar.suspend(|| {
            println!(
                "  {} {} attempt {} failed ({}), retrying in {:.1}s",
                "↻".yellow(),
                id,
                attempt,
                error,
                delay.as_secs_f64()
            );
        });
    }

    fn on_node_complete(&self, report: &NodeReport) {
        if report.operation.is_change() || report.status != NodeStatus::Applied {
            self.bar.suspend(|| {
                let detail = match (&report.error, &report.reason) {
                    (Some(error), _) => format!(" ({error})").red().to_string(),
                    (None, Some(reason)) => format!(" ({reason})").dimmed().to_string(),
                    (None, None) => String::new(),
                };
                println!(
                    "  {} {} {}{}",
                    ui::status_symbol(report.status),
                    report.operation,
                    report.id,
                    detail
                );
            });
        }
        self.bar.inc(1);
    }
}

// ============================================================================
// Confirmation
// ============================================================================

/// Confirm through a dialoguer prompt unless `--yes` was given
struct PromptConfirm<'a> {
    yes: bool,
    action: &'a str,
}

impl ConfirmCallback for PromptConfirm<'_> {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        if self.yes {
            return Ok(true);
        }
        if !std::io::stdin().is_terminal() {
            bail!(
                "Refusing to {} without confirmation; re-run with --yes",
                self.action
            );
        }

        println!();
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?;

        Ok(confirmed)
    }
}
