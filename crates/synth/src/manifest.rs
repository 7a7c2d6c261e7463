//! Manifest encoding and decoding under a schema.
//!
//! Encoding walks the schema, not the config: fields come out in declaration order under
//! their wire names, absent optional fields are skipped, map entries come out sorted.

use std::collections::BTreeMap;

use forma_core::{FieldPath, ResourceIdentity, SerializationError, Value};
use forma_schema::{Field, FieldType, Presence, ResourceSchema};
use serde_yaml::{Mapping, Value as Yaml};

const API_VERSION: &str = "api_version";
const KIND: &str = "kind";

/// Render the manifest text for an already validated config.
pub fn render_manifest(schema: &ResourceSchema, identity: &ResourceIdentity, config: &Value) -> Result<String, SerializationError> {
    let root = config.as_map().ok_or_else(|| SerializationError::Structure {
        path: FieldPath::root(),
        reason: format!("expected object, got {}", config.type_name()),
    })?;
    let mut out = Mapping::new();
    let mut path = FieldPath::root();
    for field in schema.fields() {
        match (field.name.as_str(), field.presence) {
            (API_VERSION, _) => { out.insert(field.wire_name.clone().into(), identity.api_version.clone().into()); }
            (KIND, _) => { out.insert(field.wire_name.clone().into(), identity.kind.clone().into()); }
            (_, Presence::Computed) => {}
            _ => {
                if let Some(v) = root.get(&field.name).filter(|v| !v.is_null()) {
                    path.push_field(&field.name);
                    out.insert(field.wire_name.clone().into(), encode(&field.ty, v, &mut path)?);
                    path.pop();
                }
            }
        }
    }
    Ok(serde_yaml::to_string(&Yaml::Mapping(out))?)
}

fn structure(path: &FieldPath, ty: &FieldType, v: &Value) -> SerializationError {
    SerializationError::Structure { path: path.clone(), reason: format!("cannot encode {} as {}", v.type_name(), ty) }
}

fn encode(ty: &FieldType, v: &Value, path: &mut FieldPath) -> Result<Yaml, SerializationError> {
    match (ty, v) {
        (FieldType::Dynamic, _) => Ok(verbatim(v)),
        (FieldType::Object(fields), Value::Map(map)) => {
            let mut out = Mapping::new();
            for field in fields.iter().filter(|f| f.presence != Presence::Computed) {
                if let Some(item) = map.get(&field.name).filter(|x| !x.is_null()) {
                    path.push_field(&field.name);
                    out.insert(field.wire_name.clone().into(), encode(&field.ty, item, path)?);
                    path.pop();
                }
            }
            Ok(Yaml::Mapping(out))
        }
        (FieldType::List(elem), Value::List(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                path.push_index(i);
                out.push(encode(&elem.ty, item, path)?);
                path.pop();
            }
            Ok(Yaml::Sequence(out))
        }
        (FieldType::Map(elem), Value::Map(entries)) => {
            let mut out = Mapping::new();
            for (k, item) in entries {
                path.push_key(k);
                out.insert(k.clone().into(), encode(&elem.ty, item, path)?);
                path.pop();
            }
            Ok(Yaml::Mapping(out))
        }
        _ if ty.accepts(v) => Ok(verbatim(v)),
        _ => Err(structure(path, ty, v)),
    }
}

fn verbatim(v: &Value) -> Yaml {
    match v {
        Value::Null => Yaml::Null,
        Value::Bool(b) => Yaml::Bool(*b),
        Value::Int(i) => Yaml::Number((*i).into()),
        Value::Float(f) => Yaml::Number((*f).into()),
        Value::String(s) => Yaml::String(s.clone()),
        Value::List(items) => Yaml::Sequence(items.iter().map(verbatim).collect()),
        Value::Map(map) => Yaml::Mapping(map.iter().map(|(k, v)| (Yaml::String(k.clone()), verbatim(v))).collect()),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("parsing manifest: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("{0}: missing in manifest")]
    Missing(FieldPath),
    #[error("{path}: {reason}")]
    Mismatch { path: FieldPath, reason: String },
    #[error("{0}: not part of the schema")]
    Unknown(FieldPath),
    #[error("invalid identity: {0}")]
    Identity(#[from] forma_core::IdentityError),
}

/// Parse a manifest back into a config tree (config names) plus the identity it carries.
pub fn decode_manifest(schema: &ResourceSchema, text: &str) -> Result<(ResourceIdentity, Value), DecodeError> {
    let doc: Value = serde_yaml::from_str(text)?;
    let Value::Map(map) = doc else {
        return Err(DecodeError::Mismatch { path: FieldPath::root(), reason: format!("expected object, got {}", doc.type_name()) });
    };
    let wire_of = |name: &str| schema.field(name).map(|f| f.wire_name.clone()).unwrap_or_else(|| name.to_string());
    let read_str = |name: &str| -> Result<String, DecodeError> {
        let wire = wire_of(name);
        map.get(&wire)
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .ok_or_else(|| DecodeError::Missing(FieldPath::parse(&wire)))
    };
    let identity = ResourceIdentity::new(read_str(API_VERSION)?, read_str(KIND)?)?;
    let config = decode_object(schema.fields(), &map, &mut FieldPath::root())?;
    Ok((identity, config))
}

fn decode_object(fields: &[Field], map: &BTreeMap<String, Value>, path: &mut FieldPath) -> Result<Value, DecodeError> {
    let mut out = BTreeMap::new();
    for (wire, item) in map {
        let Some(field) = fields.iter().find(|f| f.wire_name == *wire) else {
            path.push_field(wire);
            return Err(DecodeError::Unknown(path.clone()));
        };
        if field.presence == Presence::Computed {
            continue;
        }
        path.push_field(&field.name);
        out.insert(field.name.clone(), decode(&field.ty, item, path)?);
        path.pop();
    }
    Ok(Value::Map(out))
}

fn decode(ty: &FieldType, v: &Value, path: &mut FieldPath) -> Result<Value, DecodeError> {
    match (ty, v) {
        (FieldType::Dynamic, _) => Ok(v.clone()),
        (FieldType::Object(fields), Value::Map(map)) => decode_object(fields, map, path),
        (FieldType::List(elem), Value::List(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                path.push_index(i);
                out.push(decode(&elem.ty, item, path)?);
                path.pop();
            }
            Ok(Value::List(out))
        }
        (FieldType::Map(elem), Value::Map(entries)) => {
            let mut out = BTreeMap::new();
            for (k, item) in entries {
                path.push_key(k);
                out.insert(k.clone(), decode(&elem.ty, item, path)?);
                path.pop();
            }
            Ok(Value::Map(out))
        }
        _ if ty.accepts(v) => Ok(v.clone()),
        _ => Err(DecodeError::Mismatch { path: path.clone(), reason: format!("expected {}, got {}", ty, v.type_name()) }),
    }
}
