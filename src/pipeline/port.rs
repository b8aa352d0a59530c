//! Port types and port collections.
//!
//! A port type is a structural predicate over `serde_json::Value` plus a list
//! of example values. Compatibility between two port types is decided by the
//! examples of the emitting side: `a.can_input_to(b)` holds if *any* example of
//! `a` passes `b.check_value`. The rule is deliberately one-directional.
//!
//! Port types are validated once per node class (see `NodeRegistry::register`
//! and `Graph::add_node`): a type without examples, or whose examples fail its
//! own check, is rejected before any node of that class can run.

use crate::pipeline::error::{PipelineError, PipelineResult};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt;

/// Structural type of the values flowing through a port.
pub trait PortType: Send + Sync {
    /// Stable type name, used for port equality.
    fn name(&self) -> &'static str;

    /// Example values. Must be non-empty and must all pass `check_value`.
    fn examples(&self) -> Vec<Value>;

    /// Pure predicate. `Err` carries the reason the value was rejected.
    fn check_value(&self, value: &Value) -> Result<(), String>;

    /// Whether any of this type's examples would be accepted by `other`.
    fn can_input_to(&self, other: &dyn PortType) -> bool {
        self.examples()
            .iter()
            .any(|example| other.check_value(example).is_ok())
    }
}

/// Check the example invariant of a port type.
pub fn validate_port_type(kind: &dyn PortType) -> PipelineResult<()> {
    let examples = kind.examples();
    if examples.is_empty() {
        return Err(PipelineError::InvalidPortType {
            port_type: kind.name().to_string(),
            reason: "no example values".to_string(),
        });
    }
    for example in &examples {
        if let Err(reason) = kind.check_value(example) {
            return Err(PipelineError::InvalidPortType {
                port_type: kind.name().to_string(),
                reason: format!("example {} fails its own check: {}", example, reason),
            });
        }
    }
    Ok(())
}

// ── Built-in port types ──

/// Accepts anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyValue;

impl PortType for AnyValue {
    fn name(&self) -> &'static str {
        "any"
    }

    fn examples(&self) -> Vec<Value> {
        vec![json!(0), json!(0.5), json!("text"), json!([1, 2, 3]), Value::Null]
    }

    fn check_value(&self, _value: &Value) -> Result<(), String> {
        Ok(())
    }
}

/// Whole numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Integer;

impl PortType for Integer {
    fn name(&self) -> &'static str {
        "integer"
    }

    fn examples(&self) -> Vec<Value> {
        vec![json!(0), json!(1), json!(-20)]
    }

    fn check_value(&self, value: &Value) -> Result<(), String> {
        if value.is_i64() || value.is_u64() {
            Ok(())
        } else {
            Err(format!("expected an integer, got {}", value))
        }
    }
}

/// Any JSON number.
#[derive(Debug, Clone, Copy, Default)]
pub struct Number;

impl PortType for Number {
    fn name(&self) -> &'static str {
        "number"
    }

    fn examples(&self) -> Vec<Value> {
        vec![json!(0.5), json!(-3.25)]
    }

    fn check_value(&self, value: &Value) -> Result<(), String> {
        if value.is_number() {
            Ok(())
        } else {
            Err(format!("expected a number, got {}", value))
        }
    }
}

/// Strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Text;

impl PortType for Text {
    fn name(&self) -> &'static str {
        "text"
    }

    fn examples(&self) -> Vec<Value> {
        vec![json!(""), json!("sample")]
    }

    fn check_value(&self, value: &Value) -> Result<(), String> {
        if value.is_string() {
            Ok(())
        } else {
            Err(format!("expected a string, got {}", value))
        }
    }
}

/// Booleans.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flag;

impl PortType for Flag {
    fn name(&self) -> &'static str {
        "flag"
    }

    fn examples(&self) -> Vec<Value> {
        vec![json!(true), json!(false)]
    }

    fn check_value(&self, value: &Value) -> Result<(), String> {
        if value.is_boolean() {
            Ok(())
        } else {
            Err(format!("expected a boolean, got {}", value))
        }
    }
}

/// Arrays of numbers, e.g. one multi-channel sensor frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberList;

impl PortType for NumberList {
    fn name(&self) -> &'static str {
        "number_list"
    }

    fn examples(&self) -> Vec<Value> {
        vec![json!([0.0, 1.5, -2.0]), json!([])]
    }

    fn check_value(&self, value: &Value) -> Result<(), String> {
        let items = value
            .as_array()
            .ok_or_else(|| format!("expected an array, got {}", value))?;
        match items.iter().position(|v| !v.is_number()) {
            Some(idx) => Err(format!("element {} is not a number", idx)),
            None => Ok(()),
        }
    }
}

// ── Ports ──

/// Derive a port key from its display label: lower-case, whitespace to `_`.
pub fn derive_key(label: &str) -> String {
    label
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// A typed connection endpoint.
#[derive(Clone)]
pub struct Port {
    label: String,
    key: String,
    optional: bool,
    kind: &'static dyn PortType,
}

impl Port {
    pub fn new(label: impl Into<String>, kind: &'static dyn PortType) -> Self {
        let label = label.into();
        let key = derive_key(&label);
        Self {
            label,
            key,
            optional: false,
            kind,
        }
    }

    /// Override the key derived from the label.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Mark the port as not required for processing.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn kind(&self) -> &'static dyn PortType {
        self.kind
    }

    pub fn check_value(&self, value: &Value) -> Result<(), String> {
        self.kind.check_value(value)
    }

    pub fn can_input_to(&self, other: &Port) -> bool {
        self.kind.can_input_to(other.kind)
    }
}

impl PartialEq for Port {
    fn eq(&self, other: &Self) -> bool {
        self.kind.name() == other.kind.name() && self.key == other.key
    }
}

impl Eq for Port {}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("label", &self.label)
            .field("key", &self.key)
            .field("optional", &self.optional)
            .field("kind", &self.kind.name())
            .finish()
    }
}

/// Ordered, fixed set of ports for one direction of a node class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ports(Vec<Port>);

impl Ports {
    pub fn new(ports: Vec<Port>) -> Self {
        Self(ports)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Check the class-level invariants: unique keys and valid port types.
    pub fn validate(&self, collection: &str) -> PipelineResult<()> {
        let mut seen = HashSet::new();
        for port in &self.0 {
            if !seen.insert(port.key()) {
                return Err(PipelineError::DuplicatePortKey {
                    key: port.key().to_string(),
                    collection: collection.to_string(),
                });
            }
            validate_port_type(port.kind())?;
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Port> {
        self.0.iter().find(|p| p.key() == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.0.iter().map(|p| p.key()).collect()
    }

    /// Comma separated keys, for error messages.
    pub fn describe(&self) -> String {
        if self.0.is_empty() {
            "none".to_string()
        } else {
            self.keys().join(", ")
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Port>> for Ports {
    fn from(ports: Vec<Port>) -> Self {
        Self(ports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hollow;

    impl PortType for Hollow {
        fn name(&self) -> &'static str {
            "hollow"
        }

        fn examples(&self) -> Vec<Value> {
            Vec::new()
        }

        fn check_value(&self, _value: &Value) -> Result<(), String> {
            Ok(())
        }
    }

    struct Liar;

    impl PortType for Liar {
        fn name(&self) -> &'static str {
            "liar"
        }

        fn examples(&self) -> Vec<Value> {
            vec![json!("not a number")]
        }

        fn check_value(&self, value: &Value) -> Result<(), String> {
            Number.check_value(value)
        }
    }

    #[test]
    fn test_builtin_types_are_valid() {
        for kind in [
            &AnyValue as &dyn PortType,
            &Integer,
            &Number,
            &Text,
            &Flag,
            &NumberList,
        ] {
            validate_port_type(kind).unwrap();
        }
    }

    #[test]
    fn test_type_without_examples_is_rejected() {
        let err = validate_port_type(&Hollow).unwrap_err();
        assert!(err.to_string().contains("no example values"));
    }

    #[test]
    fn test_type_with_failing_example_is_rejected() {
        let err = validate_port_type(&Liar).unwrap_err();
        assert!(err.to_string().contains("fails its own check"));
    }

    #[test]
    fn test_compatibility_is_one_directional() {
        // Every integer is a number, but the number examples are fractional.
        assert!(Integer.can_input_to(&Number));
        assert!(!Number.can_input_to(&Integer));
        assert!(Text.can_input_to(&AnyValue));
        // AnyValue has a numeric example, so it may feed a number port.
        assert!(AnyValue.can_input_to(&Number));
        assert!(!Flag.can_input_to(&Text));
    }

    #[test]
    fn test_number_list_check() {
        assert!(NumberList.check_value(&json!([1, 2.5])).is_ok());
        assert!(NumberList.check_value(&json!([1, "x"])).is_err());
        assert!(NumberList.check_value(&json!(3)).is_err());
    }

    #[test]
    fn test_key_derived_from_label() {
        let port = Port::new("Raw Data", &Number);
        assert_eq!(port.key(), "raw_data");
        assert_eq!(port.label(), "Raw Data");
        let port = port.with_key("raw");
        assert_eq!(port.key(), "raw");
    }

    #[test]
    fn test_port_equality_uses_type_and_key() {
        let a = Port::new("Data", &Number);
        let b = Port::new("Data", &Number).optional();
        let c = Port::new("Data", &Integer);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let ports = Ports::new(vec![
            Port::new("Data", &Number),
            Port::new("data", &Integer),
        ]);
        let err = ports.validate("Example inputs").unwrap_err();
        assert!(matches!(err, PipelineError::DuplicatePortKey { .. }));
    }

    #[test]
    fn test_describe_lists_keys() {
        let ports = Ports::new(vec![Port::new("Left", &Number), Port::new("Right", &Number)]);
        assert_eq!(ports.describe(), "left, right");
        assert_eq!(Ports::empty().describe(), "none");
    }
}
