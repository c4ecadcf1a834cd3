//! Command implementations
//!
//! - `validate` - Check the stack file and its graph
//! - `plan` - Preview what apply would change
//! - `apply` / `destroy` - Converge recorded state to the stack file
//! - `output` - Print stack outputs
//! - `state` - Inspect recorded state

pub mod apply;
pub mod output;
pub mod plan;
pub mod state;
pub mod validate;

use anyhow::{Context as AnyhowContext, Result};

use declarative::{ProviderRegistry, StateStore};

use crate::Context;
use crate::manifest::Stack;
use crate::provider::{self, display_output};
use crate::state::FileStore;

/// A loaded stack with its state and providers
pub struct Session {
    pub stack: Stack,
    pub store: FileStore,
    pub registry: ProviderRegistry,
}

impl Session {
    /// Load the stack file, open its state and build the provider registry
    pub fn open(ctx: &Context) -> Result<Self> {
        let stack = Stack::load(&ctx.file)?;
        stack.engine.validate()?;

        let path = stack
            .engine
            .state_path(&stack.name, &stack.dir, ctx.state.as_deref())?;
        log::info!("Using state file {}", path.display());
        let store = FileStore::open(&path)
            .with_context(|| format!("Failed to open state file {}", path.display()))?;

        let registry = provider::registry(&stack, &store)?;
        Ok(Self {
            stack,
            store,
            registry,
        })
    }

    /// Resolve stack outputs against recorded state, redacting sensitive ones
    pub fn outputs(&self) -> Result<Vec<(String, String)>> {
        let mut resolved = Vec::with_capacity(self.stack.outputs.len());
        for (name, reference) in &self.stack.outputs {
            let record = self.store.read(&reference.node)?;
            let value = record.as_ref().and_then(|r| r.outputs.get(&reference.output));
            let sensitive = record
                .as_ref()
                .is_some_and(|r| self.stack.schema(&r.kind).is_sensitive(&reference.output));
            resolved.push((name.clone(), display_output(value, sensitive)));
        }
        Ok(resolved)
    }
}

// ============================================================================
// Tests
// ============================================================================
