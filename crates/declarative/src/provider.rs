//! Provider capability interface
//!
//! A provider performs the remote operations for one resource kind and
//! describes how the kind behaves when its inputs change.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::types::Attributes;

/// Static description of a resource kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindSchema {
    /// Fields whose change forces a replace instead of an in-place update
    pub immutable: BTreeSet<String>,
    /// Fields whose values must never be displayed or logged
    pub sensitive: BTreeSet<String>,
    /// Whether the resource may be replaced while other resources reference it
    pub replace_while_referenced: bool,
}

impl Default for KindSchema {
    fn default() -> Self {
        Self {
            immutable: BTreeSet::new(),
            sensitive: BTreeSet::new(),
            replace_while_referenced: true,
        }
    }
}

impl KindSchema {
    pub fn is_immutable(&self, field: &str) -> bool {
        self.immutable.contains(field)
    }

    pub fn is_sensitive(&self, field: &str) -> bool {
        self.sensitive.contains(field)
    }
}

/// Operations for a resource kind
///
/// Idempotency of remote calls is the provider's responsibility. Outputs
/// returned by `create` and `update` must include an `id` string, which is
/// passed back as the physical id on later calls.
pub trait Provider: Send + Sync {
    /// Create the resource and return its outputs
    fn create(&self, node_id: &str, inputs: &Attributes) -> Result<Attributes, ProviderError>;

    /// Update the resource in place and return its outputs
    fn update(&self, physical_id: &str, inputs: &Attributes) -> Result<Attributes, ProviderError>;

    /// Delete the resource
    fn delete(&self, physical_id: &str) -> Result<(), ProviderError>;

    /// Behaviour of the kind on change
    fn schema(&self) -> &KindSchema;

    /// Whether a failed call should be retried
    fn is_retryable(&self, error: &ProviderError) -> bool {
        error.retryable
    }
}

/// Maps resource kinds to providers
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    fallback: Option<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for a kind, replacing any previous one
    pub fn register(&mut self, kind: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(kind.into(), provider);
    }

    /// Use `provider` for kinds without a dedicated registration
    pub fn with_fallback(mut self, provider: Arc<dyn Provider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    /// Look up the provider for a kind
    pub fn get(&self, kind: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .get(kind)
            .or(self.fallback.as_ref())
            .map(Arc::clone)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.get(kind).is_some()
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
