//! Build resource schemas straight from CustomResourceDefinition documents.
//!
//! One schema per served version, derived from `openAPIV3Schema.properties.spec`.
//! OpenAPI patterns the regex engine cannot compile (look-arounds and friends) are
//! dropped with a warning instead of failing the whole CRD.

use convert_case::{Case, Casing};
use forma_core::{FieldPath, ResourceIdentity, Value};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1 as apiextv1;
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::{Element, Field, FieldType, Pattern, Presence, ResourceSchema, SchemaError, Validator};

/// Nesting depth past which sub-trees are treated as dynamic.
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub struct CrdVersion {
    pub identity: ResourceIdentity,
    pub schema: ResourceSchema,
    pub storage: bool,
    pub description: Option<String>,
}

/// Parse a CRD YAML document and build one schema per served version.
pub fn import_crd(text: &str) -> Result<Vec<CrdVersion>, SchemaError> {
    from_definition(&serde_yaml::from_str(text)?)
}

/// Same as [`import_crd`] for a document already split out of a multi-document stream.
pub fn import_crd_document(doc: serde_yaml::Value) -> Result<Vec<CrdVersion>, SchemaError> {
    from_definition(&serde_yaml::from_value(doc)?)
}

pub fn from_definition(crd: &apiextv1::CustomResourceDefinition) -> Result<Vec<CrdVersion>, SchemaError> {
    let group = crd.spec.group.clone();
    let kind = crd.spec.names.kind.clone();
    if group.is_empty() {
        return Err(SchemaError::Crd(format!("{}: spec.group is empty", kind)));
    }
    let mut out = Vec::new();
    for ver in crd.spec.versions.iter().filter(|v| v.served) {
        let identity = ResourceIdentity::new(format!("{}/{}", group, ver.name), kind.clone())?;
        let root = match ver.schema.as_ref().and_then(|s| s.open_api_v3_schema.as_ref()) {
            Some(props) => serde_json::to_value(props).map_err(|e| SchemaError::Crd(e.to_string()))?,
            None => Json::Null,
        };
        let spec_presence = match root.get("required").and_then(|r| r.as_array()) {
            Some(req) if req.iter().any(|r| r.as_str() == Some("spec")) => Presence::Required,
            _ => Presence::Optional,
        };
        let schema = match root.get("properties").and_then(|p| p.get("spec")) {
            Some(spec) => {
                let (ty, _) = type_from_node(spec, &FieldPath::parse("spec"), 0)?;
                ResourceSchema::with_spec_presence(ty, spec_presence)?
            }
            None => ResourceSchema::with_spec_presence(FieldType::Dynamic, spec_presence)?,
        };
        debug!(identity = %identity, fields = schema.spec_fields().len(), "imported CRD version");
        out.push(CrdVersion {
            identity,
            schema,
            storage: ver.storage,
            description: root.get("description").and_then(|d| d.as_str()).map(|s| s.to_string()),
        });
    }
    if out.is_empty() {
        return Err(SchemaError::Crd(format!("{}.{}: no served versions", kind, group)));
    }
    Ok(out)
}

fn flag(node: &Json, key: &str) -> bool {
    node.get(key).and_then(|b| b.as_bool()).unwrap_or(false)
}

fn fields_from_properties(node: &Json, path: &FieldPath, depth: usize) -> Result<Vec<Field>, SchemaError> {
    let Some(props) = node.get("properties").and_then(|p| p.as_object()) else { return Ok(vec![]) };
    let required: Vec<&str> = node
        .get("required")
        .and_then(|r| r.as_array())
        .map(|r| r.iter().filter_map(|s| s.as_str()).collect())
        .unwrap_or_default();
    let mut out = Vec::with_capacity(props.len());
    for (wire, sub) in props {
        let name = wire.to_case(Case::Snake);
        let fpath = path.child(&name);
        let (ty, validators) = type_from_node(sub, &fpath, depth + 1)?;
        out.push(Field {
            presence: if required.contains(&wire.as_str()) { Presence::Required } else { Presence::Optional },
            name,
            wire_name: wire.clone(),
            ty,
            validators,
            description: sub.get("description").and_then(|d| d.as_str()).map(|s| s.to_string()),
        });
    }
    Ok(out)
}

fn type_from_node(node: &Json, path: &FieldPath, depth: usize) -> Result<(FieldType, Vec<Validator>), SchemaError> {
    if depth > MAX_DEPTH {
        return Ok((FieldType::Dynamic, vec![]));
    }
    let ty = if flag(node, "x-kubernetes-int-or-string") {
        FieldType::IntOrString
    } else if flag(node, "x-kubernetes-preserve-unknown-fields") {
        FieldType::Dynamic
    } else {
        match node.get("type").and_then(|t| t.as_str()).unwrap_or("") {
            "string" => FieldType::String,
            "integer" => FieldType::Integer,
            "number" => FieldType::Number,
            "boolean" => FieldType::Bool,
            "array" => {
                let elem = match node.get("items").filter(|i| i.is_object()) {
                    Some(items) => {
                        let (ty, validators) = type_from_node(items, path, depth + 1)?;
                        Box::new(Element { ty, validators })
                    }
                    None => Element::of(FieldType::Dynamic),
                };
                FieldType::List(elem)
            }
            "object" | "" => {
                let has_props = node.get("properties").and_then(|p| p.as_object()).is_some_and(|p| !p.is_empty());
                if has_props {
                    FieldType::Object(fields_from_properties(node, path, depth)?)
                } else if let Some(ap) = node.get("additionalProperties").filter(|a| a.is_object()) {
                    let (ty, validators) = type_from_node(ap, path, depth + 1)?;
                    FieldType::Map(Box::new(Element { ty, validators }))
                } else {
                    FieldType::Dynamic
                }
            }
            other => {
                warn!(path = %path, ty = other, "unsupported OpenAPI type; treating as dynamic");
                FieldType::Dynamic
            }
        }
    };
    Ok((ty, validators_from_node(node, path)))
}

fn validators_from_node(node: &Json, path: &FieldPath) -> Vec<Validator> {
    let mut out = Vec::new();
    if let Some(values) = node.get("enum").and_then(|e| e.as_array()).filter(|e| !e.is_empty()) {
        let allowed: Vec<Value> = values.iter().filter_map(|v| serde_json::from_value(v.clone()).ok()).collect();
        out.push(Validator::OneOf(allowed));
    }
    if let Some(src) = node.get("pattern").and_then(|p| p.as_str()) {
        match Pattern::new(src) {
            Ok(p) => out.push(Validator::Pattern(p)),
            Err(e) => warn!(path = %path, pattern = src, error = %e, "dropping unsupported pattern"),
        }
    }
    let num = |k: &str| node.get(k).and_then(|n| n.as_f64());
    let (min, max) = (num("minimum"), num("maximum"));
    if min.is_some() || max.is_some() {
        out.push(Validator::Range { min, max });
    }
    let len = |k: &str| node.get(k).and_then(|n| n.as_u64()).map(|n| n as usize);
    let min = len("minLength").or_else(|| len("minItems")).or_else(|| len("minProperties"));
    let max = len("maxLength").or_else(|| len("maxItems")).or_else(|| len("maxProperties"));
    if min.is_some() || max.is_some() {
        out.push(Validator::Length { min, max });
    }
    out
}
