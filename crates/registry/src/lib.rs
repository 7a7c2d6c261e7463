//! Forma registry: the lookup table from resource type name to schema and identity.
//!
//! Built-in resource types are plain descriptor documents compiled into the binary;
//! more can be loaded from descriptor files or CRD manifests at startup. The table is
//! read-only once handed out.

#![forbid(unsafe_code)]

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use convert_case::{Case, Casing};
use forma_core::ResourceIdentity;
use forma_schema::{crd, ResourceDescriptor, ResourceSchema, SchemaError};
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use tracing::{debug, info, warn};

const BUILTIN: &[(&str, &str)] = &[
    ("couchbase_replication.yaml", include_str!("../resources/couchbase_replication.yaml")),
    ("elasticsearch_autoscaler.yaml", include_str!("../resources/elasticsearch_autoscaler.yaml")),
    ("dns_chaos.yaml", include_str!("../resources/dns_chaos.yaml")),
    ("integration_kit.yaml", include_str!("../resources/integration_kit.yaml")),
];

#[derive(Debug, Clone)]
pub struct ResourceType {
    pub type_name: String,
    pub identity: ResourceIdentity,
    pub schema: Arc<ResourceSchema>,
    pub description: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{source_name}: {error}")]
    Schema { source_name: String, #[source] error: SchemaError },
    #[error("resource type {0:?} is already registered")]
    Duplicate(String),
    #[error("unknown resource type {name:?}{}", suggestion.as_ref().map(|s| format!(" (did you mean {:?}?)", s)).unwrap_or_default())]
    UnknownType { name: String, suggestion: Option<String> },
}

/// Registry name for an identity: `k8s_<group>_<kind>_<version>`, e.g.
/// `k8s_couchbase_com_couchbase_replication_v2`.
pub fn type_name_for(identity: &ResourceIdentity) -> String {
    let kind = identity.kind.to_case(Case::Snake);
    let group: String = identity
        .group()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if group.is_empty() {
        format!("k8s_{}_{}", kind, identity.version())
    } else {
        format!("k8s_{}_{}_{}", group, kind, identity.version())
    }
}

#[derive(Debug, Default, Clone)]
pub struct Registry {
    types: FxHashMap<String, Arc<ResourceType>>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }

    /// Registry holding the built-in resource types.
    pub fn builtin() -> Result<Self, RegistryError> {
        let mut reg = Self::new();
        for (file, text) in BUILTIN {
            let schema_err = |error| RegistryError::Schema { source_name: (*file).to_string(), error };
            let descriptor = ResourceDescriptor::from_yaml(text).map_err(schema_err)?;
            reg.register_descriptor(&descriptor).map_err(|e| match e {
                RegistryError::Schema { error, .. } => schema_err(error),
                other => other,
            })?;
        }
        debug!(types = reg.len(), "built-in registry ready");
        Ok(reg)
    }

    pub fn len(&self) -> usize { self.types.len() }
    pub fn is_empty(&self) -> bool { self.types.is_empty() }

    pub fn register(&mut self, rt: ResourceType) -> Result<Arc<ResourceType>, RegistryError> {
        if self.types.contains_key(&rt.type_name) {
            return Err(RegistryError::Duplicate(rt.type_name));
        }
        let rt = Arc::new(rt);
        self.types.insert(rt.type_name.clone(), rt.clone());
        Ok(rt)
    }

    pub fn register_descriptor(&mut self, d: &ResourceDescriptor) -> Result<Arc<ResourceType>, RegistryError> {
        self.register(descriptor_type(d)?)
    }

    /// Register every served version of a CRD document; returns the new type names.
    pub fn register_crd(&mut self, doc: serde_yaml::Value, source_name: &str) -> Result<Vec<String>, RegistryError> {
        let types = crd_types(doc, source_name)?;
        self.register_all(types)
    }

    /// Load a (possibly multi-document) YAML stream of CRDs and/or resource descriptors.
    /// All or nothing: on any error the registry is left as it was.
    pub fn load_str(&mut self, text: &str, source_name: &str) -> Result<Vec<String>, RegistryError> {
        let types = parse_stream(text, source_name)?;
        self.register_all(types)
    }

    /// Load every `*.yaml`/`*.yml` file of a directory (not recursive), in name order.
    /// Types that are already registered are skipped with a warning; the rest of the file still loads.
    pub fn load_dir(&mut self, dir: &Path) -> anyhow::Result<usize> {
        let mut files: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("reading resource directory {}", dir.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")))
            .collect();
        files.sort();
        let mut added = 0usize;
        for path in files {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            let types = parse_stream(&text, &path.display().to_string()).with_context(|| format!("loading {}", path.display()))?;
            let mut loaded = 0usize;
            for rt in types {
                match self.register(rt) {
                    Ok(_) => loaded += 1,
                    Err(RegistryError::Duplicate(name)) => {
                        warn!(file = %path.display(), type_name = %name, "skipping duplicate resource type");
                    }
                    Err(e) => return Err(e).with_context(|| format!("loading {}", path.display())),
                }
            }
            info!(file = %path.display(), types = loaded, "loaded resource types");
            added += loaded;
        }
        Ok(added)
    }

    fn register_all(&mut self, types: Vec<ResourceType>) -> Result<Vec<String>, RegistryError> {
        {
            let mut seen = FxHashSet::default();
            for rt in &types {
                if self.types.contains_key(&rt.type_name) || !seen.insert(rt.type_name.as_str()) {
                    return Err(RegistryError::Duplicate(rt.type_name.clone()));
                }
            }
        }
        let names = types.iter().map(|rt| rt.type_name.clone()).collect();
        for rt in types {
            self.types.insert(rt.type_name.clone(), Arc::new(rt));
        }
        Ok(names)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ResourceType>> { self.types.get(name).cloned() }

    /// Like [`get`](Self::get), with a close-match suggestion on failure.
    pub fn resolve(&self, name: &str) -> Result<Arc<ResourceType>, RegistryError> {
        self.get(name).ok_or_else(|| RegistryError::UnknownType { name: name.to_string(), suggestion: self.suggest(name) })
    }

    pub fn find_by_identity(&self, identity: &ResourceIdentity) -> Option<Arc<ResourceType>> {
        self.types.values().find(|rt| rt.identity == *identity).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.types.keys().map(|s| s.as_str()).collect();
        out.sort_unstable();
        out
    }

    /// Registered types, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = Arc<ResourceType>> + '_ {
        self.names().into_iter().filter_map(move |n| self.get(n))
    }

    fn suggest(&self, name: &str) -> Option<String> {
        let matcher = SkimMatcherV2::default();
        self.types
            .keys()
            .filter_map(|cand| matcher.fuzzy_match(cand, name).map(|score| (score, cand)))
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)))
            .map(|(_, cand)| cand.clone())
    }
}

fn descriptor_type(d: &ResourceDescriptor) -> Result<ResourceType, RegistryError> {
    let source_name = format!("{}/{}", d.api_version, d.kind);
    let (identity, schema) = d.build().map_err(|error| RegistryError::Schema { source_name, error })?;
    let type_name = d.type_name.clone().unwrap_or_else(|| type_name_for(&identity));
    Ok(ResourceType { type_name, identity, schema: Arc::new(schema), description: d.description.clone() })
}

fn crd_types(doc: serde_yaml::Value, source_name: &str) -> Result<Vec<ResourceType>, RegistryError> {
    let versions = crd::import_crd_document(doc)
        .map_err(|error| RegistryError::Schema { source_name: source_name.to_string(), error })?;
    Ok(versions
        .into_iter()
        .map(|v| ResourceType {
            type_name: type_name_for(&v.identity),
            identity: v.identity,
            schema: Arc::new(v.schema),
            description: v.description,
        })
        .collect())
}

/// Build the resource types of every document in a stream without registering any.
fn parse_stream(text: &str, source_name: &str) -> Result<Vec<ResourceType>, RegistryError> {
    let mut out = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(doc)
            .map_err(|e| RegistryError::Schema { source_name: source_name.to_string(), error: e.into() })?;
        if value.is_null() {
            continue;
        }
        if value.get("kind").and_then(|k| k.as_str()) == Some("CustomResourceDefinition") {
            out.extend(crd_types(value, source_name)?);
        } else {
            let d: ResourceDescriptor = serde_yaml::from_value(value)
                .map_err(|e| RegistryError::Schema { source_name: source_name.to_string(), error: e.into() })?;
            out.push(descriptor_type(&d)?);
        }
    }
    Ok(out)
}
