//! Depth-first validation walk: collect every bad field, stop at the first failing
//! check within a field.

use std::collections::BTreeMap;

use forma_core::{FieldPath, ValidationError, Value, ViolationKind};

use crate::{Field, FieldType, Presence, Validator};

pub(crate) fn validate(root: &[Field], config: &Value) -> Vec<ValidationError> {
    let mut errs = Vec::new();
    let mut path = FieldPath::root();
    match config {
        Value::Map(map) => check_object(root, map, &mut path, &mut errs),
        other => errs.push(mismatch(&path, "object", other)),
    }
    errs
}

fn mismatch(path: &FieldPath, expected: impl std::fmt::Display, got: &Value) -> ValidationError {
    ValidationError::new(
        path.clone(),
        ViolationKind::TypeMismatch,
        format!("expected {}, got {}", expected, got.type_name()),
    )
}

fn check_object(fields: &[Field], map: &BTreeMap<String, Value>, path: &mut FieldPath, errs: &mut Vec<ValidationError>) {
    for field in fields {
        path.push_field(&field.name);
        let present = map.get(&field.name).filter(|v| !v.is_null());
        match (present, field.presence) {
            (_, Presence::Computed) => {}
            (None, Presence::Required) => report_missing(field, path, errs),
            (None, Presence::Optional) => {}
            (Some(v), _) => check_value(&field.ty, &field.validators, v, path, errs),
        }
        path.pop();
    }
    for key in map.keys() {
        let known = fields
            .iter()
            .any(|f| f.name == *key || (f.presence == Presence::Computed && f.wire_name == *key));
        if !known {
            path.push_field(key);
            errs.push(ValidationError::new(path.clone(), ViolationKind::UnknownField, "unsupported field"));
            path.pop();
        }
    }
}

/// An absent required object is reported through its required leaves, so a missing
/// `metadata` block surfaces as `metadata.name`.
fn report_missing(field: &Field, path: &mut FieldPath, errs: &mut Vec<ValidationError>) {
    let required: Vec<&Field> = match &field.ty {
        FieldType::Object(fields) => fields.iter().filter(|f| f.is_required()).collect(),
        _ => Vec::new(),
    };
    if required.is_empty() {
        errs.push(ValidationError::missing(path.clone()));
        return;
    }
    for child in required {
        path.push_field(&child.name);
        report_missing(child, path, errs);
        path.pop();
    }
}

fn check_value(ty: &FieldType, validators: &[Validator], value: &Value, path: &mut FieldPath, errs: &mut Vec<ValidationError>) {
    if !ty.accepts(value) {
        errs.push(mismatch(path, ty, value));
        return;
    }
    for v in validators {
        if let Err((kind, message)) = v.check(value) {
            errs.push(ValidationError::new(path.clone(), kind, message));
            return;
        }
    }
    match (ty, value) {
        (FieldType::List(elem), Value::List(items)) => {
            for (i, item) in items.iter().enumerate() {
                path.push_index(i);
                check_element(&elem.ty, &elem.validators, item, path, errs);
                path.pop();
            }
        }
        (FieldType::Map(elem), Value::Map(entries)) => {
            for (k, item) in entries {
                path.push_key(k);
                check_element(&elem.ty, &elem.validators, item, path, errs);
                path.pop();
            }
        }
        (FieldType::Object(fields), Value::Map(map)) => check_object(fields, map, path, errs),
        _ => {}
    }
}

fn check_element(ty: &FieldType, validators: &[Validator], item: &Value, path: &mut FieldPath, errs: &mut Vec<ValidationError>) {
    // Collection elements cannot be absent; null is only meaningful inside dynamic values.
    if item.is_null() && !matches!(ty, FieldType::Dynamic) {
        errs.push(mismatch(path, ty, item));
        return;
    }
    check_value(ty, validators, item, path, errs);
}
