//! Built-in pipeline node implementations.

pub mod collect;
pub mod counter;
pub mod merge;
pub mod scale;
pub mod square;

pub use collect::{Collect, CollectBuffer};
pub use counter::Counter;
pub use merge::Merge;
pub use scale::Scale;
pub use square::Square;

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::registry::NodeRegistry;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

/// Registry holding every built-in class.
pub fn builtin_registry() -> PipelineResult<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    registry
        .register::<Counter>()?
        .register::<Square>()?
        .register::<Scale>()?
        .register::<Collect>()?
        .register::<Merge>()?;
    Ok(registry)
}

/// Decode a settings object; `null` means all defaults.
pub(crate) fn parse_settings<T: DeserializeOwned + Default>(
    class: &str,
    settings: &Value,
) -> PipelineResult<T> {
    if settings.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(settings.clone())
        .map_err(|e| PipelineError::settings(class, e.to_string()))
}

/// Apply a binary numeric operation, staying integral when both sides are.
pub(crate) fn numeric(
    lhs: &Value,
    rhs: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Option<Value> {
    if let (Some(a), Some(b)) = (lhs.as_i64(), rhs.as_i64()) {
        if let Some(v) = int_op(a, b) {
            return Some(json!(v));
        }
    }
    Some(json!(float_op(lhs.as_f64()?, rhs.as_f64()?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = builtin_registry().unwrap();
        let classes: Vec<_> = registry.classes().collect();
        assert_eq!(classes, vec!["Collect", "Counter", "Merge", "Scale", "Square"]);
    }

    #[test]
    fn test_numeric_keeps_integers() {
        let sum = numeric(&json!(2), &json!(3), i64::checked_add, |a, b| a + b);
        assert_eq!(sum, Some(json!(5)));
        let sum = numeric(&json!(2), &json!(0.5), i64::checked_add, |a, b| a + b);
        assert_eq!(sum, Some(json!(2.5)));
        let overflow = numeric(&json!(i64::MAX), &json!(2), i64::checked_mul, |a, b| a * b);
        assert!(overflow.unwrap().is_f64());
        assert_eq!(numeric(&json!("x"), &json!(1), i64::checked_add, |a, b| a + b), None);
    }
}
