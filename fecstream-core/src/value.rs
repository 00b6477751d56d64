//! Self-describing values exchanged with the media pipeline.
//!
//! Element properties and session statistics are both expressed as
//! [`Value`] trees. A [`Structure`] is a named, ordered set of fields;
//! lists and arrays hold unnamed children.

use serde::Serialize;

/// A dynamically typed property or statistics value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Str(String),
    /// Numerator / denominator, e.g. a frame rate.
    Fraction(i32, i32),
    Structure(Structure),
    /// Media capabilities, described by a single structure.
    Caps(Structure),
    List(Vec<Value>),
    Array(Vec<Value>),
}

impl Value {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Unsigned integer view, rejecting negatives and fractions.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            Self::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_structure(&self) -> Option<&Structure> {
        match self {
            Self::Structure(s) | Self::Caps(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Structure> for Value {
    fn from(v: Structure) -> Self {
        Self::Structure(v)
    }
}

// ── Structure ────────────────────────────────────────────────────

/// A named record of ordered `(field, value)` pairs.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Structure {
    name: String,
    fields: Vec<(String, Value)>,
}

impl Structure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field insertion.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Insert or replace a field, preserving its original position.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == field) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((field, value)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == field).map(|(_, v)| v)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_in_place() {
        let mut s = Structure::new("stats").with("a", 1u32).with("b", 2u32);
        s.set("a", 7u32);
        let names: Vec<_> = s.fields().map(|(k, _)| k).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(s.get("a"), Some(&Value::UInt(7)));
    }

    #[test]
    fn numeric_views() {
        assert_eq!(Value::Int(-1).as_u64(), None);
        assert_eq!(Value::Int(12).as_u64(), Some(12));
        assert_eq!(Value::UInt(3).as_f64(), Some(3.0));
        assert_eq!(Value::Str("x".into()).as_f64(), None);
    }

    #[test]
    fn serializes_as_plain_json() {
        let s = Structure::new("qos-bitrate").with("old", 4000u32).with("loss", 0.5);
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"qos-bitrate\""));
        assert!(json.contains("4000"));
    }
}
