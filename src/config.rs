use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use declarative::{ExecuteOptions, PlanOptions, ReplacePolicy, RetryConfig};

/// Get the state directory path (~/.local/state/groundwork)
pub fn state_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".local").join("state").join("groundwork"))
}

// ============================================================================
// Engine Settings
// ============================================================================

/// The `[engine]` section of a stack file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Maximum number of provider calls in flight
    pub jobs: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    /// Upper bound on a single provider call, unbounded when absent
    pub call_timeout_ms: Option<u64>,
    pub replace_policy: ReplacePolicy,
    /// State file location, `~` is expanded and relative paths are
    /// resolved against the stack file's directory
    pub state_path: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            jobs: 4,
            max_attempts: 4,
            base_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            call_timeout_ms: None,
            replace_policy: ReplacePolicy::Enforce,
            state_path: None,
        }
    }
}

impl EngineSettings {
    /// Reject settings the executor cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            bail!("engine.jobs must be at least 1");
        }
        if self.max_attempts == 0 {
            bail!("engine.max_attempts must be at least 1");
        }
        if self.backoff_factor < 1.0 {
            bail!(
                "engine.backoff_factor must be at least 1.0 (got {})",
                self.backoff_factor
            );
        }
        if self.call_timeout_ms == Some(0) {
            bail!("engine.call_timeout_ms must be positive");
        }
        Ok(())
    }

    /// Executor options, with `jobs` overridden from the command line
    pub fn execute_options(&self, jobs: Option<usize>) -> ExecuteOptions {
        ExecuteOptions {
            jobs: jobs.unwrap_or(self.jobs).max(1),
            retry: RetryConfig {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_millis(self.base_delay_ms),
                backoff_factor: self.backoff_factor,
                max_delay: Duration::from_millis(self.max_delay_ms),
            },
            call_timeout: self.call_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Planner options; `allow_replace` lifts the replace policy
    pub fn plan_options(&self, allow_replace: bool) -> PlanOptions {
        PlanOptions {
            replace_policy: if allow_replace {
                ReplacePolicy::Allow
            } else {
                self.replace_policy
            },
        }
    }

    /// Resolve the state file for a stack
    ///
    /// Precedence: command line, `engine.state_path`, then
    /// `~/.local/state/groundwork/<stack>.json`.
    pub fn state_path(
        &self,
        stack_name: &str,
        stack_dir: &Path,
        flag: Option<&Path>,
    ) -> Result<PathBuf> {
        if let Some(path) = flag {
            return Ok(path.to_path_buf());
        }
        match &self.state_path {
            Some(configured) => {
                let expanded = PathBuf::from(shellexpand::tilde(configured).as_ref());
                if expanded.is_absolute() {
                    Ok(expanded)
                } else {
                    Ok(stack_dir.join(expanded))
                }
            }
            None => Ok(state_dir()?.join(format!("{stack_name}.json"))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
