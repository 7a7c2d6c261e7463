//! Forma schema engine: the static description of one resource type's shape.
//!
//! A [`ResourceSchema`] is an owned (and therefore acyclic) tree of [`Field`]s. Every
//! schema shares the same top level: computed `api_version`/`kind`, the standard
//! `metadata` block, and a resource-specific `spec` object.

#![forbid(unsafe_code)]

use std::fmt;

use convert_case::{Case, Casing};
use forma_core::{FieldPath, IdentityError, ValidationError, Value};

pub mod crd;
pub mod descriptor;
mod validate;
pub mod validators;

pub use descriptor::{FieldSpec, ResourceDescriptor, TypeSpec};
pub use validators::{Pattern, Validator, ValidatorSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Optional,
    /// Set by the engine; ignored when present in user config.
    Computed,
}

/// Element description for lists and maps.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub ty: FieldType,
    pub validators: Vec<Validator>,
}

impl Element {
    pub fn of(ty: FieldType) -> Box<Self> { Box::new(Self { ty, validators: Vec::new() }) }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Bool,
    /// Kubernetes `int-or-string` (ports, percentages).
    IntOrString,
    /// Free-form structured data emitted verbatim.
    Dynamic,
    List(Box<Element>),
    Map(Box<Element>),
    Object(Vec<Field>),
}

impl FieldType {
    pub fn list_of(ty: FieldType) -> Self { FieldType::List(Element::of(ty)) }
    pub fn map_of(ty: FieldType) -> Self { FieldType::Map(Element::of(ty)) }

    /// Whether a value's variant is acceptable for this type (shallow).
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (FieldType::String, Value::String(_))
                | (FieldType::Integer, Value::Int(_))
                | (FieldType::Number, Value::Int(_) | Value::Float(_))
                | (FieldType::Bool, Value::Bool(_))
                | (FieldType::IntOrString, Value::Int(_) | Value::String(_))
                | (FieldType::Dynamic, _)
                | (FieldType::List(_), Value::List(_))
                | (FieldType::Map(_) | FieldType::Object(_), Value::Map(_))
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => f.write_str("string"),
            FieldType::Integer => f.write_str("integer"),
            FieldType::Number => f.write_str("number"),
            FieldType::Bool => f.write_str("bool"),
            FieldType::IntOrString => f.write_str("int-or-string"),
            FieldType::Dynamic => f.write_str("dynamic"),
            FieldType::List(e) => write!(f, "list<{}>", e.ty),
            FieldType::Map(e) => write!(f, "map<{}>", e.ty),
            FieldType::Object(_) => f.write_str("object"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Name used in user configuration (snake_case).
    pub name: String,
    /// Name emitted in the manifest.
    pub wire_name: String,
    pub ty: FieldType,
    pub presence: Presence,
    pub validators: Vec<Validator>,
    pub description: Option<String>,
}

impl Field {
    /// New field whose wire name is the camelCase form of `name`.
    pub fn new(name: &str, ty: FieldType, presence: Presence) -> Self {
        Self {
            name: name.to_string(),
            wire_name: name.to_case(Case::Camel),
            ty,
            presence,
            validators: Vec::new(),
            description: None,
        }
    }

    pub fn required(name: &str, ty: FieldType) -> Self { Self::new(name, ty, Presence::Required) }
    pub fn optional(name: &str, ty: FieldType) -> Self { Self::new(name, ty, Presence::Optional) }
    pub fn computed(name: &str, ty: FieldType) -> Self { Self::new(name, ty, Presence::Computed) }

    pub fn wire(mut self, wire_name: &str) -> Self {
        self.wire_name = wire_name.to_string();
        self
    }

    pub fn with_validator(mut self, v: Validator) -> Self {
        self.validators.push(v);
        self
    }

    pub fn describe(mut self, text: &str) -> Self {
        self.description = Some(text.to_string());
        self
    }

    pub fn is_required(&self) -> bool { self.presence == Presence::Required }

    /// Sub-fields when this is an object.
    pub fn fields(&self) -> Option<&[Field]> {
        match &self.ty {
            FieldType::Object(fields) => Some(fields),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("{path}: duplicate field name {name:?}")]
    DuplicateField { path: FieldPath, name: String },
    #[error("{path}: duplicate wire name {name:?}")]
    DuplicateWireName { path: FieldPath, name: String },
    #[error("{path}: field name must not be empty")]
    EmptyName { path: FieldPath },
    #[error("schema has no metadata.name field")]
    MissingName,
    #[error("{path}: {source}")]
    Validator { path: FieldPath, #[source] source: validators::ResolveError },
    #[error("{path}: {reason}")]
    Malformed { path: FieldPath, reason: String },
    #[error("invalid identity: {0}")]
    Identity(#[from] IdentityError),
    #[error("parsing resource description: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("CRD: {0}")]
    Crd(String),
}

/// Pattern for `metadata.name` (DNS-1123 subdomain).
pub const NAME_PATTERN: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$";
/// Pattern for `metadata.namespace` (DNS-1123 label).
pub const NAMESPACE_PATTERN: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$";

/// The metadata block every resource type carries.
pub fn metadata_field() -> Result<Field, SchemaError> {
    let pattern = |src: &str, path: &str| {
        Pattern::new(src).map_err(|source| SchemaError::Validator {
            path: FieldPath::parse(path),
            source: validators::ResolveError::Pattern { pattern: src.to_string(), source },
        })
    };
    Ok(Field::required(
        "metadata",
        FieldType::Object(vec![
            Field::required("name", FieldType::String)
                .with_validator(Validator::Length { min: Some(1), max: Some(253) })
                .with_validator(Validator::Pattern(pattern(NAME_PATTERN, "metadata.name")?))
                .describe("Unique name of the resource within its namespace."),
            Field::optional("namespace", FieldType::String)
                .with_validator(Validator::Length { min: Some(1), max: Some(63) })
                .with_validator(Validator::Pattern(pattern(NAMESPACE_PATTERN, "metadata.namespace")?))
                .describe("Namespace the resource lives in."),
            Field::optional("labels", FieldType::map_of(FieldType::String)).describe("Labels for selection and grouping."),
            Field::optional("annotations", FieldType::map_of(FieldType::String)).describe("Unstructured key/value metadata."),
        ]),
    )
    .describe("Standard object metadata."))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSchema {
    root: Vec<Field>,
}

impl ResourceSchema {
    /// Standard top level around resource-specific spec fields.
    pub fn new(spec_fields: Vec<Field>) -> Result<Self, SchemaError> {
        Self::with_spec(FieldType::Object(spec_fields))
    }

    /// Standard top level with an arbitrary `spec` type (e.g. dynamic for schemaless CRDs).
    pub fn with_spec(spec: FieldType) -> Result<Self, SchemaError> {
        Self::with_spec_presence(spec, Presence::Optional)
    }

    /// Like [`with_spec`](Self::with_spec) with an explicit presence for `spec` itself.
    pub fn with_spec_presence(spec: FieldType, presence: Presence) -> Result<Self, SchemaError> {
        Self::from_root(vec![
            Field::computed("api_version", FieldType::String),
            Field::computed("kind", FieldType::String),
            metadata_field()?,
            Field::new("spec", spec, presence).describe("Resource-specific desired state."),
        ])
    }

    /// Build from a complete top-level field list, checking the tree invariants.
    pub fn from_root(root: Vec<Field>) -> Result<Self, SchemaError> {
        check_level(&root, &FieldPath::root())?;
        let schema = Self { root };
        match schema.lookup("metadata.name") {
            Some(f) if matches!(f.ty, FieldType::String) => Ok(schema),
            _ => Err(SchemaError::MissingName),
        }
    }

    pub fn fields(&self) -> &[Field] { &self.root }

    pub fn field(&self, name: &str) -> Option<&Field> { self.root.iter().find(|f| f.name == name) }

    pub fn spec_fields(&self) -> &[Field] {
        self.field("spec").and_then(Field::fields).unwrap_or(&[])
    }

    /// Resolve a dotted path of config names through nested objects.
    pub fn lookup(&self, dotted: &str) -> Option<&Field> {
        let mut level: &[Field] = &self.root;
        let mut found = None;
        for name in dotted.split('.') {
            let f = level.iter().find(|f| f.name == name)?;
            level = f.fields().unwrap_or(&[]);
            found = Some(f);
        }
        found
    }

    /// Check `config` against the schema, collecting every field-level problem.
    pub fn validate(&self, config: &Value) -> Vec<ValidationError> {
        validate::validate(&self.root, config)
    }
}

fn check_level(fields: &[Field], path: &FieldPath) -> Result<(), SchemaError> {
    for (i, f) in fields.iter().enumerate() {
        if f.name.is_empty() || f.wire_name.is_empty() {
            return Err(SchemaError::EmptyName { path: path.clone() });
        }
        if fields[..i].iter().any(|o| o.name == f.name) {
            return Err(SchemaError::DuplicateField { path: path.clone(), name: f.name.clone() });
        }
        if fields[..i].iter().any(|o| o.wire_name == f.wire_name) {
            return Err(SchemaError::DuplicateWireName { path: path.clone(), name: f.wire_name.clone() });
        }
        check_type(&f.ty, &path.child(&f.name))?;
    }
    Ok(())
}

fn check_type(ty: &FieldType, path: &FieldPath) -> Result<(), SchemaError> {
    match ty {
        FieldType::Object(fields) => check_level(fields, path),
        FieldType::List(e) | FieldType::Map(e) => check_type(&e.ty, path),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_top_level_is_added() {
        let s = ResourceSchema::new(vec![Field::required("bucket", FieldType::String)]).unwrap();
        let names: Vec<_> = s.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["api_version", "kind", "metadata", "spec"]);
        assert_eq!(s.field("api_version").unwrap().wire_name, "apiVersion");
        assert!(s.lookup("metadata.name").unwrap().is_required());
        assert_eq!(s.lookup("spec.bucket").unwrap().ty, FieldType::String);
        assert!(s.lookup("spec.nope").is_none());
    }

    #[test]
    fn wire_names_default_to_camel_case() {
        assert_eq!(Field::optional("resource_key", FieldType::String).wire_name, "resourceKey");
        assert_eq!(Field::optional("x", FieldType::String).wire("X-Key").wire_name, "X-Key");
    }

    #[test]
    fn duplicate_names_are_rejected_per_level() {
        let err = ResourceSchema::new(vec![
            Field::optional("bucket", FieldType::String),
            Field::optional("bucket", FieldType::Bool),
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { ref name, .. } if name == "bucket"));
        assert_eq!(err.to_string(), r#"spec: duplicate field name "bucket""#);

        let err = ResourceSchema::new(vec![
            Field::optional("a", FieldType::String).wire("same"),
            Field::optional("b", FieldType::String).wire("same"),
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateWireName { .. }));

        // Same name on different levels is fine.
        assert!(ResourceSchema::new(vec![Field::optional(
            "name",
            FieldType::Object(vec![Field::optional("name", FieldType::String)])
        )])
        .is_ok());
    }

    #[test]
    fn schema_without_name_is_rejected() {
        let err = ResourceSchema::from_root(vec![Field::optional("spec", FieldType::Object(vec![]))]).unwrap_err();
        assert!(matches!(err, SchemaError::MissingName));
    }
}
