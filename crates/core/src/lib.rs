//! Forma core types: dynamic values, field paths, resource identity, synthesized state
//! and the error taxonomy shared by every other crate.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod path;
pub mod value;

pub use path::{FieldPath, Segment};
pub use value::Value;

/// Fixed (apiVersion, kind) pair stamped into every manifest of a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub api_version: String,
    pub kind: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("apiVersion must not be empty")]
    EmptyApiVersion,
    #[error("kind must not be empty")]
    EmptyKind,
}

impl ResourceIdentity {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Result<Self, IdentityError> {
        let api_version = api_version.into();
        let kind = kind.into();
        if api_version.trim().is_empty() { return Err(IdentityError::EmptyApiVersion); }
        if kind.trim().is_empty() { return Err(IdentityError::EmptyKind); }
        Ok(Self { api_version, kind })
    }

    /// API group; empty for the core group (`v1`).
    pub fn group(&self) -> &str {
        self.api_version.split_once('/').map(|(g, _)| g).unwrap_or("")
    }

    pub fn version(&self) -> &str {
        self.api_version.split_once('/').map(|(_, v)| v).unwrap_or(&self.api_version)
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version, self.kind)
    }
}

/// Opaque, strictly increasing marker identifying one synthesis of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(pub u64);

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl FromStr for VersionToken {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { s.parse::<u64>().map(VersionToken) }
}

/// Output of one synthesis: what the caller writes to its state store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizedState {
    pub version: VersionToken,
    pub api_version: String,
    pub kind: String,
    pub manifest: String,
}

impl SynthesizedState {
    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity { api_version: self.api_version.clone(), kind: self.kind.clone() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MissingRequired,
    TypeMismatch,
    EnumViolation,
    PatternViolation,
    BoundViolation,
    UnknownField,
}

/// One user-correctable problem with one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{path}: {message}")]
pub struct ValidationError {
    pub path: FieldPath,
    pub kind: ViolationKind,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: FieldPath, kind: ViolationKind, message: impl Into<String>) -> Self {
        Self { path, kind, message: message.into() }
    }

    pub fn missing(path: FieldPath) -> Self {
        Self::new(path, ViolationKind::MissingRequired, "required field missing")
    }
}

/// Validated data could not be encoded. Always a defect, never user-correctable.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("encoding yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{path}: {reason}")]
    Structure { path: FieldPath, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("{} invalid field(s): {}", .0.len(), summarize(.0))]
    Validation(Vec<ValidationError>),
    #[error("internal error: {0}")]
    Serialization(#[from] SerializationError),
}

impl SynthesisError {
    /// Field-level problems, empty for internal errors.
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            SynthesisError::Validation(errs) => errs,
            SynthesisError::Serialization(_) => &[],
        }
    }
}

fn summarize(errs: &[ValidationError]) -> String {
    let mut s = errs.iter().take(3).map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
    if errs.len() > 3 { s.push_str("; ..."); }
    s
}

// ---- user configuration input ----

fn max_config_bytes() -> usize {
    std::env::var("FORMA_MAX_CONFIG_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000) // 1 MiB default
}

fn max_config_nodes() -> usize {
    std::env::var("FORMA_MAX_CONFIG_NODES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100_000)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config document too large (>{0} bytes)")]
    TooLarge(usize),
    #[error("config document too complex (>{0} nodes)")]
    TooComplex(usize),
    #[error("parsing config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("config document must be a mapping, got {0}")]
    NotAMapping(&'static str),
}

/// Parse a YAML (or JSON) user configuration, enforcing the size and node budgets.
pub fn parse_config(text: &str) -> Result<Value, ConfigError> {
    parse_config_with_limits(text, max_config_bytes(), max_config_nodes())
}

pub fn parse_config_with_limits(text: &str, max_bytes: usize, max_nodes: usize) -> Result<Value, ConfigError> {
    if text.len() > max_bytes {
        return Err(ConfigError::TooLarge(max_bytes));
    }
    let value: Value = serde_yaml::from_str(text)?;
    if value.node_count(max_nodes.saturating_add(1)) > max_nodes {
        return Err(ConfigError::TooComplex(max_nodes));
    }
    match value {
        Value::Map(_) => Ok(value),
        other => Err(ConfigError::NotAMapping(other.type_name())),
    }
}

pub mod prelude {
    pub use super::{
        FieldPath, ResourceIdentity, SynthesisError, SynthesizedState, ValidationError, Value, VersionToken,
        ViolationKind,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rejects_empty_parts() {
        assert_eq!(ResourceIdentity::new("", "Kind").unwrap_err(), IdentityError::EmptyApiVersion);
        assert_eq!(ResourceIdentity::new("v1", " ").unwrap_err(), IdentityError::EmptyKind);
        let id = ResourceIdentity::new("couchbase.com/v2", "CouchbaseReplication").unwrap();
        assert_eq!(id.group(), "couchbase.com");
        assert_eq!(id.version(), "v2");
        let core = ResourceIdentity::new("v1", "ConfigMap").unwrap();
        assert_eq!(core.group(), "");
        assert_eq!(core.version(), "v1");
    }

    #[test]
    fn version_token_roundtrips_through_text() {
        let t = VersionToken(1_700_000_000_123_456_789);
        assert_eq!(t.to_string().parse::<VersionToken>().unwrap(), t);
    }

    #[test]
    fn config_budgets_are_enforced() {
        let doc = "metadata:\n  name: x\n";
        assert!(parse_config_with_limits(doc, 1_000, 100).is_ok());
        assert!(matches!(parse_config_with_limits(doc, 4, 100), Err(ConfigError::TooLarge(4))));
        assert!(matches!(parse_config_with_limits(doc, 1_000, 2), Err(ConfigError::TooComplex(2))));
        // root, metadata and name: exactly at the budget is fine
        assert!(parse_config_with_limits(doc, 1_000, 3).is_ok());
        assert!(parse_config_with_limits(doc, doc.len(), 100).is_ok());
        assert!(matches!(parse_config_with_limits("- a\n", 1_000, 100), Err(ConfigError::NotAMapping("list"))));
    }

    #[test]
    fn validation_error_display_names_the_path() {
        let e = ValidationError::missing(FieldPath::parse("metadata.name"));
        assert_eq!(e.to_string(), "metadata.name: required field missing");
        let err = SynthesisError::Validation(vec![e]);
        assert_eq!(err.to_string(), "1 invalid field(s): metadata.name: required field missing");
    }
}
