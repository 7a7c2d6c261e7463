//! Resource descriptors: schema descriptions as data.
//!
//! ```yaml
//! api_version: couchbase.com/v2
//! kind: CouchbaseReplication
//! spec:
//!   - name: bucket
//!     type: string
//!     required: true
//!   - name: compression_type
//!     validators:
//!       - one_of: [None, Auto, Snappy]
//! ```

use convert_case::{Case, Casing};
use forma_core::{FieldPath, ResourceIdentity};
use serde::{Deserialize, Serialize};

use crate::{Element, Field, FieldType, Presence, ResourceSchema, SchemaError, ValidatorSpec};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSpec {
    #[default]
    String,
    Integer,
    Number,
    Bool,
    IntOrString,
    Dynamic,
    Object,
    List,
    Map,
}

fn is_false(b: &bool) -> bool { !*b }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wire_name: Option<String>,
    #[serde(rename = "type", default)]
    pub ty: TypeSpec,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub computed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Element type for lists and maps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ElementSpec>>,
    /// Sub-fields for objects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "serde_yaml::with::singleton_map_recursive")]
    pub validators: Vec<ValidatorSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElementSpec {
    #[serde(rename = "type", default)]
    pub ty: TypeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ElementSpec>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "serde_yaml::with::singleton_map_recursive")]
    pub validators: Vec<ValidatorSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceDescriptor {
    /// Registry name; derived from the identity when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub spec: Vec<FieldSpec>,
}

impl ResourceDescriptor {
    pub fn from_yaml(text: &str) -> Result<Self, SchemaError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn identity(&self) -> Result<ResourceIdentity, SchemaError> {
        Ok(ResourceIdentity::new(&self.api_version, &self.kind)?)
    }

    pub fn build(&self) -> Result<(ResourceIdentity, ResourceSchema), SchemaError> {
        let identity = self.identity()?;
        let spec_path = FieldPath::parse("spec");
        let fields = self.spec.iter().map(|f| f.build(&spec_path)).collect::<Result<Vec<_>, _>>()?;
        Ok((identity, ResourceSchema::new(fields)?))
    }

    /// Describe an existing schema, e.g. for printing.
    pub fn from_schema(identity: &ResourceIdentity, schema: &ResourceSchema) -> Self {
        Self {
            type_name: None,
            api_version: identity.api_version.clone(),
            kind: identity.kind.clone(),
            description: None,
            spec: schema.spec_fields().iter().map(FieldSpec::from).collect(),
        }
    }
}

impl FieldSpec {
    pub fn build(&self, parent: &FieldPath) -> Result<Field, SchemaError> {
        let path = parent.child(&self.name);
        let presence = match (self.required, self.computed) {
            (true, true) => return Err(SchemaError::Malformed { path, reason: "field cannot be both required and computed".into() }),
            (true, false) => Presence::Required,
            (false, true) => Presence::Computed,
            (false, false) => Presence::Optional,
        };
        let ty = build_type(self.ty, self.items.as_deref(), &self.fields, &path)?;
        Ok(Field {
            name: self.name.clone(),
            wire_name: self.wire_name.clone().unwrap_or_else(|| self.name.to_case(Case::Camel)),
            ty,
            presence,
            validators: resolve_all(&self.validators, &path)?,
            description: self.description.clone(),
        })
    }
}

fn resolve_all(specs: &[ValidatorSpec], path: &FieldPath) -> Result<Vec<crate::Validator>, SchemaError> {
    specs
        .iter()
        .map(|v| v.resolve().map_err(|source| SchemaError::Validator { path: path.clone(), source }))
        .collect()
}

fn build_type(ty: TypeSpec, items: Option<&ElementSpec>, fields: &[FieldSpec], path: &FieldPath) -> Result<FieldType, SchemaError> {
    let malformed = |reason: &str| SchemaError::Malformed { path: path.clone(), reason: reason.to_string() };
    if ty != TypeSpec::Object && !fields.is_empty() {
        return Err(malformed("only objects may declare fields"));
    }
    if !matches!(ty, TypeSpec::List | TypeSpec::Map) && items.is_some() {
        return Err(malformed("only lists and maps may declare items"));
    }
    Ok(match ty {
        TypeSpec::String => FieldType::String,
        TypeSpec::Integer => FieldType::Integer,
        TypeSpec::Number => FieldType::Number,
        TypeSpec::Bool => FieldType::Bool,
        TypeSpec::IntOrString => FieldType::IntOrString,
        TypeSpec::Dynamic => FieldType::Dynamic,
        TypeSpec::Object => FieldType::Object(fields.iter().map(|f| f.build(path)).collect::<Result<_, _>>()?),
        TypeSpec::List | TypeSpec::Map => {
            let item = items.ok_or_else(|| malformed("lists and maps need an items type"))?;
            let elem = Box::new(Element {
                ty: build_type(item.ty, item.items.as_deref(), &item.fields, path)?,
                validators: resolve_all(&item.validators, path)?,
            });
            if ty == TypeSpec::List { FieldType::List(elem) } else { FieldType::Map(elem) }
        }
    })
}

fn type_spec(ty: &FieldType) -> (TypeSpec, Option<Box<ElementSpec>>, Vec<FieldSpec>) {
    match ty {
        FieldType::String => (TypeSpec::String, None, vec![]),
        FieldType::Integer => (TypeSpec::Integer, None, vec![]),
        FieldType::Number => (TypeSpec::Number, None, vec![]),
        FieldType::Bool => (TypeSpec::Bool, None, vec![]),
        FieldType::IntOrString => (TypeSpec::IntOrString, None, vec![]),
        FieldType::Dynamic => (TypeSpec::Dynamic, None, vec![]),
        FieldType::Object(fields) => (TypeSpec::Object, None, fields.iter().map(FieldSpec::from).collect()),
        FieldType::List(e) | FieldType::Map(e) => {
            let (ity, items, fields) = type_spec(&e.ty);
            let elem = ElementSpec { ty: ity, items, fields, validators: e.validators.iter().map(ValidatorSpec::from).collect() };
            let outer = if matches!(ty, FieldType::List(_)) { TypeSpec::List } else { TypeSpec::Map };
            (outer, Some(Box::new(elem)), vec![])
        }
    }
}

impl From<&Field> for FieldSpec {
    fn from(f: &Field) -> Self {
        let (ty, items, fields) = type_spec(&f.ty);
        let default_wire = f.name.to_case(Case::Camel);
        Self {
            name: f.name.clone(),
            wire_name: (f.wire_name != default_wire).then(|| f.wire_name.clone()),
            ty,
            required: f.presence == Presence::Required,
            computed: f.presence == Presence::Computed,
            description: f.description.clone(),
            items,
            fields,
            validators: f.validators.iter().map(ValidatorSpec::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Validator;

    const REPLICATION: &str = r#"
api_version: couchbase.com/v2
kind: CouchbaseReplication
spec:
  - name: bucket
    required: true
  - name: paused
    type: bool
  - name: compression_type
    validators:
      - one_of: [None, Auto, Snappy]
  - name: filter_expression
    validators:
      - length: {min: 1}
      - not_empty
  - name: explicit_mapping
    type: object
    fields:
      - name: allow_rules
        type: list
        items:
          type: object
          fields:
            - name: source_keyspace
              type: object
              fields:
                - name: scope
                  required: true
"#;

    #[test]
    fn parses_and_builds_nested_descriptor() {
        let d = ResourceDescriptor::from_yaml(REPLICATION).unwrap();
        let (identity, schema) = d.build().unwrap();
        assert_eq!(identity.kind, "CouchbaseReplication");
        let ct = schema.lookup("spec.compression_type").unwrap();
        assert_eq!(ct.wire_name, "compressionType");
        assert!(matches!(ct.validators[0], Validator::OneOf(ref v) if v.len() == 3));
        let fe = schema.lookup("spec.filter_expression").unwrap();
        assert_eq!(fe.validators, vec![Validator::Length { min: Some(1), max: None }, Validator::NotEmpty]);
        let rules = schema.lookup("spec.explicit_mapping.allow_rules").unwrap();
        assert_eq!(rules.wire_name, "allowRules");
        assert!(matches!(rules.ty, FieldType::List(_)));
    }

    #[test]
    fn unknown_validator_kinds_are_rejected() {
        let y = "api_version: a/v1\nkind: K\nspec:\n  - name: x\n    validators:\n      - luhn: true\n";
        assert!(matches!(ResourceDescriptor::from_yaml(y), Err(SchemaError::Parse(_))));
    }

    #[test]
    fn bad_pattern_is_reported_with_path() {
        let y = "api_version: a/v1\nkind: K\nspec:\n  - name: x\n    validators:\n      - pattern: \"(\"\n";
        let err = ResourceDescriptor::from_yaml(y).unwrap().build().unwrap_err();
        assert!(err.to_string().starts_with("spec.x: invalid pattern"), "{}", err);
    }

    #[test]
    fn structural_mistakes_are_rejected() {
        let y = "api_version: a/v1\nkind: K\nspec:\n  - name: x\n    type: list\n";
        assert!(matches!(ResourceDescriptor::from_yaml(y).unwrap().build(), Err(SchemaError::Malformed { .. })));
        let y = "api_version: a/v1\nkind: K\nspec:\n  - name: x\n    fields: [{name: y}]\n";
        assert!(matches!(ResourceDescriptor::from_yaml(y).unwrap().build(), Err(SchemaError::Malformed { .. })));
        let y = "api_version: \"\"\nkind: K\n";
        assert!(matches!(ResourceDescriptor::from_yaml(y).unwrap().build(), Err(SchemaError::Identity(_))));
    }

    #[test]
    fn schema_dump_rebuilds_the_same_schema() {
        let d = ResourceDescriptor::from_yaml(REPLICATION).unwrap();
        let (identity, schema) = d.build().unwrap();
        let dumped = ResourceDescriptor::from_schema(&identity, &schema);
        let text = serde_yaml::to_string(&dumped).unwrap();
        let (_, rebuilt) = ResourceDescriptor::from_yaml(&text).unwrap().build().unwrap();
        assert_eq!(rebuilt, schema);
    }
}
