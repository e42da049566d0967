//! AL-001: Core data model.
//!
//! Identity primitives, persisted solution metadata, install state, sync
//! changes, resolve results, run-queue bundles, and provenance events.
//! Descriptor-facing types derive Serialize/Deserialize for YAML and JSON.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Coordinates
// ============================================================================

/// Identity triple of a solution. Equality and hashing use all three fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinates {
    pub group: String,
    pub name: String,
    pub version: String,
}

impl Coordinates {
    pub fn new(group: &str, name: &str, version: &str) -> Self {
        Self {
            group: group.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.version)
    }
}

// ============================================================================
// Catalogs
// ============================================================================

/// A catalog known to the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub catalog_id: i64,
    pub name: String,
    /// Source locator (directory or git URL). The cache catalog has none.
    pub src: Option<String>,
    /// Local copy of the catalog.
    pub path: PathBuf,
    pub branch: Option<String>,
    #[serde(rename = "type")]
    pub catalog_type: String,
    pub is_cache: bool,
    pub deletable: bool,
    pub version: Option<String>,
}

/// Contents of `album_catalog_index.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMeta {
    pub name: String,
    #[serde(default = "default_catalog_version")]
    pub version: String,
    #[serde(rename = "type", default = "default_catalog_type")]
    pub catalog_type: String,
}

fn default_catalog_version() -> String {
    "0.1.0".to_string()
}

fn default_catalog_type() -> String {
    "direct".to_string()
}

// ============================================================================
// Solution metadata
// ============================================================================

/// Persisted description of a solution: everything the indices store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SolutionMetadata {
    pub group: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub changelog: Option<String>,
    #[serde(default)]
    pub acknowledgement: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub album_api_version: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub cite: Vec<Citation>,
    #[serde(default)]
    pub args: Vec<Argument>,
    #[serde(default)]
    pub covers: Vec<Cover>,
    #[serde(default)]
    pub documentation: Vec<String>,
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
    /// Content hash used for change detection (`blake3:<hex>`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
}

impl SolutionMetadata {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(&self.group, &self.name, &self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Citation {
    pub text: String,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// A declared solution argument.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    #[serde(rename = "type", default = "default_arg_type")]
    pub arg_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub default: Option<String>,
    #[serde(default)]
    pub required: bool,
}

fn default_arg_type() -> String {
    "string".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cover {
    pub source: String,
    #[serde(default)]
    pub description: Option<String>,
}

// ============================================================================
// Descriptor (solution.yml)
// ============================================================================

/// Full solution descriptor: persisted metadata plus composition and hooks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SolutionDescriptor {
    #[serde(flatten)]
    pub metadata: SolutionMetadata,
    #[serde(default)]
    pub dependencies: Option<Dependencies>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub hooks: Hooks,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dependencies {
    #[serde(default)]
    pub parent: Option<ParentRef>,
    /// Environment specification file, relative to the package directory.
    #[serde(default)]
    pub environment_file: Option<String>,
}

/// Reference to a parent solution, either as a handle or split coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParentRef {
    #[serde(default)]
    pub resolve_solution: Option<String>,
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// Parent arguments contributed by the child.
    #[serde(default)]
    pub args: Vec<ArgBinding>,
}

impl ParentRef {
    /// Handle string for the resolver.
    pub fn handle(&self) -> Option<String> {
        if let Some(ref h) = self.resolve_solution {
            return Some(h.clone());
        }
        let (group, name, version) = (
            self.group.as_ref()?,
            self.name.as_ref()?,
            self.version.as_ref()?,
        );
        Some(match self.catalog {
            Some(ref catalog) => format!("{}:{}:{}:{}", catalog, group, name, version),
            None => format!("{}:{}:{}", group, name, version),
        })
    }
}

/// One element of a step list: a single step or a nested group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Group(Vec<Step>),
    Single(StepDescriptor),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StepDescriptor {
    /// Handle of the step's solution.
    pub solution: String,
    #[serde(default)]
    pub args: Vec<ArgBinding>,
    #[serde(default)]
    pub parent_args: Vec<ArgBinding>,
}

/// Argument binding as written in a descriptor: exactly one of
/// `value` or `from_arg` is set (checked by the parser).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArgBinding {
    pub name: String,
    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_arg: Option<String>,
}

/// Evaluated form of an [`ArgBinding`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingValue {
    Literal(String),
    /// Name of a parsed top-level argument.
    FromArg(String),
}

impl ArgBinding {
    pub fn literal(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: Some(value.to_string()),
            from_arg: None,
        }
    }

    pub fn from_arg(name: &str, arg: &str) -> Self {
        Self {
            name: name.to_string(),
            value: None,
            from_arg: Some(arg.to_string()),
        }
    }

    pub fn binding(&self) -> Result<BindingValue, String> {
        match (&self.value, &self.from_arg) {
            (Some(v), None) => Ok(BindingValue::Literal(v.clone())),
            (None, Some(a)) => Ok(BindingValue::FromArg(a.clone())),
            (Some(_), Some(_)) => Err(format!(
                "binding '{}' sets both value and from_arg",
                self.name
            )),
            (None, None) => Err(format!(
                "binding '{}' needs a value or from_arg",
                self.name
            )),
        }
    }
}

/// Named lifecycle hooks. Each is a shell snippet run by the environment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Hooks {
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub install: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub close: Option<String>,
}

/// Capability names a loaded solution exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Run,
    Install,
    Test,
    Close,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => write!(f, "run"),
            Self::Install => write!(f, "install"),
            Self::Test => write!(f, "test"),
            Self::Close => write!(f, "close"),
        }
    }
}

impl Hooks {
    pub fn get(&self, hook: Hook) -> Option<&str> {
        match hook {
            Hook::Run => self.run.as_deref(),
            Hook::Install => self.install.as_deref(),
            Hook::Test => self.test.as_deref(),
            Hook::Close => self.close.as_deref(),
        }
    }
}

/// A descriptor loaded from disk together with its package directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSolution {
    pub descriptor: SolutionDescriptor,
    pub package_dir: PathBuf,
}

impl LoadedSolution {
    pub fn coordinates(&self) -> Coordinates {
        self.descriptor.metadata.coordinates()
    }

    pub fn parent(&self) -> Option<&ParentRef> {
        self.descriptor
            .dependencies
            .as_ref()
            .and_then(|d| d.parent.as_ref())
    }

    pub fn hook(&self, hook: Hook) -> Option<&str> {
        self.descriptor.hooks.get(hook)
    }
}

/// Parsed top-level arguments in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedArgs(pub IndexMap<String, String>);

impl ParsedArgs {
    pub fn get_argument(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

// ============================================================================
// Collection
// ============================================================================

/// Per-installation state of a collection entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstallState {
    pub installed: bool,
    pub installation_unfinished: bool,
    pub install_date: Option<String>,
    pub last_execution: Option<String>,
    /// `collection_id` of the parent entry.
    pub parent_id: Option<i64>,
}

/// A solution as known to the collection, with its install state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionEntry {
    pub collection_id: i64,
    pub catalog_id: i64,
    pub metadata: SolutionMetadata,
    pub state: InstallState,
}

impl CollectionEntry {
    pub fn coordinates(&self) -> Coordinates {
        self.metadata.coordinates()
    }

    pub fn is_installed(&self) -> bool {
        self.state.installed && !self.state.installation_unfinished
    }
}

// ============================================================================
// Synchronization
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeType {
    Added,
    Removed,
    Changed,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "ADDED"),
            Self::Removed => write!(f, "REMOVED"),
            Self::Changed => write!(f, "CHANGED"),
        }
    }
}

/// One difference between a catalog snapshot and the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolutionChange {
    pub coordinates: Coordinates,
    pub change_type: ChangeType,
    pub change_log: Option<String>,
    /// Install state of the collection row before the change.
    pub prior: Option<InstallState>,
    /// Fresh metadata for ADDED and CHANGED.
    pub metadata: Option<SolutionMetadata>,
}

// ============================================================================
// Resolution
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveResult {
    /// Package directory of the solution.
    pub path: PathBuf,
    pub catalog: CatalogRecord,
    pub entry: Option<CollectionEntry>,
    pub coordinates: Coordinates,
    pub loaded: Option<LoadedSolution>,
}

impl ResolveResult {
    pub fn is_installed(&self) -> bool {
        self.entry.as_ref().is_some_and(CollectionEntry::is_installed)
    }
}

// ============================================================================
// Run queue
// ============================================================================

/// Opaque environment reference handed out by the environment manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvironmentHandle {
    pub name: String,
    pub path: PathBuf,
}

/// One hook invocation inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCall {
    pub coordinates: Coordinates,
    /// Catalog of the collection entry, stamped with `last_execution` on success.
    pub catalog_id: Option<i64>,
    pub hook: Hook,
    /// Shell body of the hook.
    pub body: String,
    pub package_dir: PathBuf,
    pub argv: Vec<String>,
}

/// One environment invocation running its scripts to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunQueueEntry {
    /// Owner of the bundle: the parent for grouped steps, else the solution.
    pub coordinates: Coordinates,
    pub scripts: Vec<ScriptCall>,
    pub environment: EnvironmentHandle,
    /// Credit lines announced before the bundle runs.
    pub credits: Vec<String>,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Event for the JSONL provenance log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    CatalogAdded {
        catalog: String,
        src: String,
    },
    CatalogRemoved {
        catalog: String,
    },
    CatalogUpdated {
        catalog: String,
        added: u32,
        removed: u32,
        changed: u32,
    },
    SolutionInstalled {
        catalog: String,
        solution: String,
        hash: String,
    },
    SolutionUninstalled {
        catalog: String,
        solution: String,
    },
    BundleStarted {
        owner: String,
        scripts: u32,
    },
    BundleFinished {
        owner: String,
        duration_seconds: f64,
    },
    BundleFailed {
        owner: String,
        error: String,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Scalar helper
// ============================================================================

/// Convert a serde_yaml_ng::Value to a string.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

/// Accept any scalar (string, number, bool) where a string is stored.
fn deserialize_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_yaml_ng::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_yaml_ng::Value::Null) => None,
        Some(v) => Some(yaml_value_to_string(&v)),
    })
}

// ============================================================================
// Tests
// ============================================================================
