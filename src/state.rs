//! File-backed state store
//!
//! The state file is a single JSON document rewritten after every mutation.
//! Writes go to a sibling temp file which is then renamed over the original,
//! so a crash never leaves a half-written document behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use declarative::{StateError, StateRecord, StateStore};

/// Version of the state document layout
pub const FORMAT_VERSION: u32 = 1;

// ============================================================================
// State Document
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StateDocument {
    format_version: u32,
    /// Incremented on every write
    serial: u64,
    last_updated: DateTime<Utc>,
    #[serde(default)]
    resources: BTreeMap<String, StateRecord>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            serial: 0,
            last_updated: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

// ============================================================================
// FileStore
// ============================================================================

/// State store persisted as a JSON file
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    document: Mutex<StateDocument>,
}

impl FileStore {
    /// Open a state file; a missing file is an empty state
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();

        let document = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let document: StateDocument = serde_json::from_str(&content).map_err(|e| {
                StateError::corruption(format!("{} does not match the state schema: {e}", path.display()))
            })?;
            if document.format_version != FORMAT_VERSION {
                return Err(StateError::corruption(format!(
                    "{} has format version {}, expected {}",
                    path.display(),
                    document.format_version,
                    FORMAT_VERSION
                )));
            }
            for (id, record) in &document.resources {
                record.validate(id)?;
            }
            log::debug!(
                "Loaded {} records (serial {}) from {}",
                document.resources.len(),
                document.serial,
                path.display()
            );
            document
        } else {
            log::debug!("State file {} does not exist, using empty state", path.display());
            StateDocument::default()
        };

        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of writes since the state file was created
    pub fn serial(&self) -> u64 {
        self.with_document(|doc| doc.serial)
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.with_document(|doc| doc.last_updated)
    }

    fn with_document<T>(&self, f: impl FnOnce(&StateDocument) -> T) -> T {
        match self.document.lock() {
            Ok(doc) => f(&*doc),
            Err(poisoned) => f(&*poisoned.into_inner()),
        }
    }

    /// Apply a mutation, persist it, and only then make it visible
    fn mutate(&self, f: impl FnOnce(&mut BTreeMap<String, StateRecord>)) -> Result<(), StateError> {
        let mut doc = self
            .document
            .lock()
            .map_err(|_| StateError::Backend("state lock poisoned".into()))?;

        let mut next = doc.clone();
        f(&mut next.resources);
        next.serial += 1;
        next.last_updated = Utc::now();
        self.persist(&next)?;
        *doc = next;
        Ok(())
    }

    fn persist(&self, doc: &StateDocument) -> Result<(), StateError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let content =
            serde_json::to_string_pretty(doc).map_err(|e| StateError::Serialization(e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;

        log::trace!("Saved state serial {} to {}", doc.serial, self.path.display());
        Ok(())
    }
}

impl StateStore for FileStore {
    fn read(&self, id: &str) -> Result<Option<StateRecord>, StateError> {
        Ok(self.with_document(|doc| doc.resources.get(id).cloned()))
    }

    fn write(&self, id: &str, record: StateRecord) -> Result<(), StateError> {
        self.mutate(|resources| {
            resources.insert(id.to_string(), record);
        })
    }

    fn delete(&self, id: &str) -> Result<(), StateError> {
        self.mutate(|resources| {
            resources.remove(id);
        })
    }

    fn ids(&self) -> Result<Vec<String>, StateError> {
        Ok(self.with_document(|doc| doc.resources.keys().cloned().collect()))
    }
}

// ============================================================================
// Tests
// ============================================================================
