//! Validator library: the named checks a schema field can reference.

use std::fmt;

use forma_core::{Value, ViolationKind};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Compiled regular expression that keeps its source for display and comparison.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    re: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Ok(Self { source: source.to_string(), re: Regex::new(source)? })
    }

    pub fn as_str(&self) -> &str { &self.source }
    pub fn is_match(&self, s: &str) -> bool { self.re.is_match(s) }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Pattern({:?})", self.source) }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool { self.source == other.source }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Validator {
    /// Value must equal one of the listed values.
    OneOf(Vec<Value>),
    /// String must match the expression (unanchored, like OpenAPI `pattern`).
    Pattern(Pattern),
    /// Inclusive numeric bounds.
    Range { min: Option<f64>, max: Option<f64> },
    /// Inclusive length bounds: characters for strings, entries for lists and maps.
    Length { min: Option<usize>, max: Option<usize> },
    /// Collection (or string) must not be empty.
    NotEmpty,
}

/// Why a validator rejected a value.
pub type Rejection = (ViolationKind, String);

impl Validator {
    pub fn name(&self) -> &'static str {
        match self {
            Validator::OneOf(_) => "one_of",
            Validator::Pattern(_) => "pattern",
            Validator::Range { .. } => "range",
            Validator::Length { .. } => "length",
            Validator::NotEmpty => "not_empty",
        }
    }

    /// Validators only look at values of the kind they understand; anything else passes.
    pub fn check(&self, value: &Value) -> Result<(), Rejection> {
        match self {
            Validator::OneOf(allowed) => {
                if allowed.iter().any(|a| a.loosely_eq(value)) {
                    Ok(())
                } else {
                    Err((ViolationKind::EnumViolation, format!("value {} is not one of {}", value, Value::List(allowed.clone()))))
                }
            }
            Validator::Pattern(p) => match value {
                Value::String(s) if !p.is_match(s) => {
                    Err((ViolationKind::PatternViolation, format!("value {:?} does not match pattern {:?}", s, p.as_str())))
                }
                _ => Ok(()),
            },
            Validator::Range { min, max } => {
                let Some(n) = value.as_f64() else { return Ok(()) };
                if let Some(lo) = min {
                    if n < *lo { return Err((ViolationKind::BoundViolation, format!("value {} is below minimum {}", value, lo))); }
                }
                if let Some(hi) = max {
                    if n > *hi { return Err((ViolationKind::BoundViolation, format!("value {} is above maximum {}", value, hi))); }
                }
                Ok(())
            }
            Validator::Length { min, max } => {
                let Some(len) = length_of(value) else { return Ok(()) };
                if let Some(lo) = min {
                    if len < *lo { return Err((ViolationKind::BoundViolation, format!("length {} is below minimum {}", len, lo))); }
                }
                if let Some(hi) = max {
                    if len > *hi { return Err((ViolationKind::BoundViolation, format!("length {} is above maximum {}", len, hi))); }
                }
                Ok(())
            }
            Validator::NotEmpty => match length_of(value) {
                Some(0) => Err((ViolationKind::BoundViolation, "must not be empty".to_string())),
                _ => Ok(()),
            },
        }
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::List(l) => Some(l.len()),
        Value::Map(m) => Some(m.len()),
        _ => None,
    }
}

/// Serializable reference to a validator, as written in resource descriptors.
/// Unknown kinds fail to deserialize, so every referenced validator resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum ValidatorSpec {
    OneOf(Vec<Value>),
    Pattern(String),
    Range {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Length {
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
    },
    NotEmpty,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern { pattern: String, #[source] source: regex::Error },
    #[error("{0} bounds are inverted (min > max)")]
    InvertedBounds(&'static str),
    #[error("one_of needs at least one value")]
    EmptyOneOf,
}

impl ValidatorSpec {
    pub fn resolve(&self) -> Result<Validator, ResolveError> {
        match self {
            ValidatorSpec::OneOf(values) => {
                if values.is_empty() { return Err(ResolveError::EmptyOneOf); }
                Ok(Validator::OneOf(values.clone()))
            }
            ValidatorSpec::Pattern(p) => Pattern::new(p)
                .map(Validator::Pattern)
                .map_err(|source| ResolveError::Pattern { pattern: p.clone(), source }),
            ValidatorSpec::Range { min, max } => {
                if let (Some(lo), Some(hi)) = (min, max) {
                    if lo > hi { return Err(ResolveError::InvertedBounds("range")); }
                }
                Ok(Validator::Range { min: *min, max: *max })
            }
            ValidatorSpec::Length { min, max } => {
                if let (Some(lo), Some(hi)) = (min, max) {
                    if lo > hi { return Err(ResolveError::InvertedBounds("length")); }
                }
                Ok(Validator::Length { min: *min, max: *max })
            }
            ValidatorSpec::NotEmpty => Ok(Validator::NotEmpty),
        }
    }
}

impl From<&Validator> for ValidatorSpec {
    fn from(v: &Validator) -> Self {
        match v {
            Validator::OneOf(values) => ValidatorSpec::OneOf(values.clone()),
            Validator::Pattern(p) => ValidatorSpec::Pattern(p.as_str().to_string()),
            Validator::Range { min, max } => ValidatorSpec::Range { min: *min, max: *max },
            Validator::Length { min, max } => ValidatorSpec::Length { min: *min, max: *max },
            Validator::NotEmpty => ValidatorSpec::NotEmpty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_of_accepts_members_only() {
        let v = Validator::OneOf(vec!["A".into(), "B".into()]);
        assert!(v.check(&"A".into()).is_ok());
        assert!(v.check(&"B".into()).is_ok());
        let (kind, msg) = v.check(&"C".into()).unwrap_err();
        assert_eq!(kind, ViolationKind::EnumViolation);
        assert_eq!(msg, r#"value "C" is not one of ["A", "B"]"#);
    }

    #[test]
    fn pattern_only_applies_to_strings() {
        let v = Validator::Pattern(Pattern::new("^[a-z]+$").unwrap());
        assert!(v.check(&"abc".into()).is_ok());
        assert_eq!(v.check(&"ABC".into()).unwrap_err().0, ViolationKind::PatternViolation);
        assert!(v.check(&Value::Int(3)).is_ok());
    }

    #[test]
    fn range_and_length_are_inclusive() {
        let r = Validator::Range { min: Some(1.0), max: Some(10.0) };
        assert!(r.check(&Value::Int(1)).is_ok());
        assert!(r.check(&Value::Float(10.0)).is_ok());
        assert_eq!(r.check(&Value::Int(11)).unwrap_err().0, ViolationKind::BoundViolation);
        let l = Validator::Length { min: Some(1), max: Some(3) };
        assert!(l.check(&"abc".into()).is_ok());
        assert!(l.check(&"".into()).is_err());
        assert!(l.check(&Value::from(vec![1, 2, 3, 4])).is_err());
    }

    #[test]
    fn not_empty_rejects_empty_collections() {
        assert!(Validator::NotEmpty.check(&Value::List(vec![])).is_err());
        assert!(Validator::NotEmpty.check(&Value::map()).is_err());
        assert!(Validator::NotEmpty.check(&Value::from(vec!["x"])).is_ok());
    }

    #[test]
    fn specs_resolve_or_explain() {
        assert!(ValidatorSpec::Pattern("(".into()).resolve().is_err());
        assert!(matches!(
            ValidatorSpec::Range { min: Some(5.0), max: Some(1.0) }.resolve(),
            Err(ResolveError::InvertedBounds("range"))
        ));
        assert!(matches!(ValidatorSpec::OneOf(vec![]).resolve(), Err(ResolveError::EmptyOneOf)));
        assert_eq!(ValidatorSpec::NotEmpty.resolve().unwrap(), Validator::NotEmpty);
    }
}
