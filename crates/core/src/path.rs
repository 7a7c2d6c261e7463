//! Field paths used to point at a location inside a configuration tree.

use std::fmt::{self, Write};

use serde::{Serialize, Serializer};
use smallvec::SmallVec;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Named schema field.
    Field(String),
    /// Position inside a list.
    Index(usize),
    /// Free-form key inside a map field.
    Key(String),
}

/// Path from the configuration root, rendered as `spec.items[0].labels["app"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: SmallVec<[Segment; 6]>,
}

impl FieldPath {
    pub fn root() -> Self { Self::default() }

    /// Build from a dotted list of field names, e.g. `metadata.name`.
    pub fn parse(dotted: &str) -> Self {
        let mut p = Self::root();
        for seg in dotted.split('.').filter(|s| !s.is_empty()) {
            p.push_field(seg);
        }
        p
    }

    pub fn push_field(&mut self, name: &str) { self.segments.push(Segment::Field(name.to_string())); }
    pub fn push_index(&mut self, idx: usize) { self.segments.push(Segment::Index(idx)); }
    pub fn push_key(&mut self, key: &str) { self.segments.push(Segment::Key(key.to_string())); }
    pub fn pop(&mut self) -> Option<Segment> { self.segments.pop() }

    pub fn child(&self, name: &str) -> Self {
        let mut p = self.clone();
        p.push_field(name);
        p
    }

    pub fn segments(&self) -> &[Segment] { &self.segments }
    pub fn is_root(&self) -> bool { self.segments.is_empty() }
    pub fn depth(&self) -> usize { self.segments.len() }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_char('.');
        }
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                Segment::Field(name) => {
                    if i > 0 { f.write_char('.')?; }
                    f.write_str(name)?;
                }
                Segment::Index(idx) => write!(f, "[{}]", idx)?,
                Segment::Key(key) => write!(f, "[{:?}]", key)?,
            }
        }
        Ok(())
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_fields_indices_and_keys() {
        let mut p = FieldPath::parse("spec.items");
        p.push_index(0);
        p.push_field("labels");
        p.push_key("app");
        assert_eq!(p.to_string(), r#"spec.items[0].labels["app"]"#);
        assert_eq!(FieldPath::root().to_string(), ".");
    }

    #[test]
    fn parse_ignores_empty_segments() {
        assert_eq!(FieldPath::parse(".metadata.name").to_string(), "metadata.name");
        assert_eq!(FieldPath::parse("metadata.name").depth(), 2);
    }
}
