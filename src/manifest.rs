//! Stack files - TOML declarations of resources, kinds and outputs
//!
//! ```toml
//! name = "network"
//!
//! [[resource]]
//! name = "vpc"
//! kind = "aws:ec2/vpc"
//! attributes = { cidr_block = "10.0.0.0/16" }
//!
//! [[resource]]
//! name = "igw"
//! kind = "aws:ec2/internetGateway"
//! attributes = { vpc_id = "${vpc.id}" }
//!
//! [kinds."aws:ec2/vpc"]
//! immutable = ["cidr_block"]
//!
//! [outputs]
//! vpc_id = "${vpc.id}"
//! ```
//!
//! A string attribute of the exact form `${node.output}` is a reference to
//! another resource's output.

use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

use crate::config::EngineSettings;
use declarative::{
    Attributes, Declaration, GraphError, KindSchema, Reference, ResourceGraph, Value,
};

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$\{([A-Za-z][A-Za-z0-9_-]*)\.([A-Za-z_][A-Za-z0-9_]*)\}$")
        .expect("reference pattern is valid")
});

static NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("name pattern is valid"));

/// Errors loading a stack file
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("could not read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid stack file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid resource name {name:?}: use letters, digits, '-' and '_'")]
    InvalidName { name: String },

    #[error(
        "{resource}.{attribute}: {value:?} embeds a reference in a larger string; only whole-value references (\"${{node.output}}\") are supported"
    )]
    Interpolation {
        resource: String,
        attribute: String,
        value: String,
    },

    #[error("{resource}.{attribute}: {value} is not a finite number")]
    NonFiniteNumber {
        resource: String,
        attribute: String,
        value: f64,
    },

    #[error("{resource}.{attribute}: the key \"$ref\" is reserved for references")]
    ReservedKey { resource: String, attribute: String },

    #[error("output {name}: {value:?} is not a reference of the form \"${{node.output}}\"")]
    InvalidOutput { name: String, value: String },

    #[error("output {name} references undeclared resource {target}")]
    UnknownOutputTarget { name: String, target: String },
}

// ============================================================================
// File Schema
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StackFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "resource")]
    resources: Vec<ResourceEntry>,
    #[serde(default)]
    kinds: BTreeMap<String, KindSchema>,
    #[serde(default)]
    outputs: BTreeMap<String, String>,
    #[serde(default)]
    engine: EngineSettings,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceEntry {
    name: String,
    kind: String,
    #[serde(default)]
    attributes: toml::Table,
    #[serde(default)]
    depends_on: Vec<String>,
}

// ============================================================================
// Stack
// ============================================================================

/// A loaded stack file
#[derive(Debug, Clone)]
pub struct Stack {
    /// Stack name, used for the default state file
    pub name: String,
    /// Directory of the stack file
    pub dir: PathBuf,
    /// Resources in declaration order
    pub declarations: Vec<Declaration>,
    /// Per-kind behaviour
    pub kinds: BTreeMap<String, KindSchema>,
    /// Stack outputs
    pub outputs: BTreeMap<String, Reference>,
    pub engine: EngineSettings,
}

impl Stack {
    /// Load a stack file from disk
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let stack = Self::parse(&content, path)?;
        log::debug!(
            "Loaded stack {} with {} resources from {}",
            stack.name,
            stack.declarations.len(),
            path.display()
        );
        Ok(stack)
    }

    /// Parse stack file content; `path` names the file in errors
    pub fn parse(content: &str, path: &Path) -> Result<Self, ManifestError> {
        let file: StackFile = toml::from_str(content).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let declarations = file
            .resources
            .into_iter()
            .map(into_declaration)
            .collect::<Result<Vec<_>, _>>()?;

        let declared: HashSet<&str> = declarations.iter().map(|d| d.name.as_str()).collect();
        let mut outputs = BTreeMap::new();
        for (name, value) in file.outputs {
            let reference = parse_reference(&value).ok_or_else(|| ManifestError::InvalidOutput {
                name: name.clone(),
                value: value.clone(),
            })?;
            if !declared.contains(reference.node.as_str()) {
                return Err(ManifestError::UnknownOutputTarget {
                    name,
                    target: reference.node,
                });
            }
            outputs.insert(name, reference);
        }

        let name = file.name.unwrap_or_else(|| default_name(path));
        let dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        Ok(Self {
            name,
            dir,
            declarations,
            kinds: file.kinds,
            outputs,
            engine: file.engine,
        })
    }

    /// Build the dependency graph of the declared resources
    pub fn graph(&self) -> Result<ResourceGraph, GraphError> {
        ResourceGraph::build(self.declarations.iter().cloned())
    }

    /// Schema declared for a kind, or the default
    pub fn schema(&self, kind: &str) -> KindSchema {
        self.kinds.get(kind).cloned().unwrap_or_default()
    }
}

/// Stack name from the file name: `network.toml` is `network`, while the
/// conventional `groundwork.toml` takes its directory's name
fn default_name(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("default");
    if stem != "groundwork" {
        return stem.to_string();
    }
    path.canonicalize()
        .ok()
        .as_deref()
        .and_then(Path::parent)
        .and_then(Path::file_name)
        .and_then(|s| s.to_str())
        .unwrap_or("default")
        .to_string()
}

/// Parse the `${node.output}` reference form
pub fn parse_reference(value: &str) -> Option<Reference> {
    REFERENCE
        .captures(value)
        .map(|caps| Reference::new(&caps[1], &caps[2]))
}

fn into_declaration(entry: ResourceEntry) -> Result<Declaration, ManifestError> {
    if !NAME.is_match(&entry.name) {
        return Err(ManifestError::InvalidName { name: entry.name });
    }
    let mut attributes = Attributes::new();
    for (key, value) in entry.attributes {
        let value = convert(&entry.name, &key, value)?;
        attributes.insert(key, value);
    }
    Ok(Declaration {
        name: entry.name,
        kind: entry.kind,
        attributes,
        depends_on: entry.depends_on,
    })
}

/// Convert a TOML value, turning reference strings into references
fn convert(resource: &str, attribute: &str, value: toml::Value) -> Result<Value, ManifestError> {
    Ok(match value {
        toml::Value::String(s) => match parse_reference(&s) {
            Some(reference) => Value::Ref(reference),
            None if s.contains("${") => {
                return Err(ManifestError::Interpolation {
                    resource: resource.to_string(),
                    attribute: attribute.to_string(),
                    value: s,
                });
            }
            None => Value::String(s),
        },
        toml::Value::Integer(i) => Value::Int(i),
        toml::Value::Float(f) if !f.is_finite() => {
            return Err(ManifestError::NonFiniteNumber {
                resource: resource.to_string(),
                attribute: attribute.to_string(),
                value: f,
            });
        }
        toml::Value::Float(f) => Value::Float(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::List(
            items
                .into_iter()
                .map(|v| convert(resource, attribute, v))
                .collect::<Result<_, _>>()?,
        ),
        // A table shaped like a serialized reference would read back as one
        toml::Value::Table(table) if table.contains_key("$ref") => {
            return Err(ManifestError::ReservedKey {
                resource: resource.to_string(),
                attribute: attribute.to_string(),
            });
        }
        toml::Value::Table(table) => Value::Map(
            table
                .into_iter()
                .map(|(k, v)| convert(resource, attribute, v).map(|v| (k, v)))
                .collect::<Result<_, _>>()?,
        ),
    })
}

// ============================================================================
// Tests
// ============================================================================
