//! Node class registry.
//!
//! An explicit context object handed to graph reconstruction and to worker
//! processes. Registration is where a class's port collections are validated,
//! so a broken class fails before any instance exists.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{Node, NodeClass};
use crate::pipeline::port::Ports;
use serde_json::Value;
use std::collections::BTreeMap;

type Constructor = fn(&Value) -> PipelineResult<Box<dyn Node>>;

/// Class-level information kept for each registered node type.
#[derive(Clone)]
pub struct ClassInfo {
    pub class: &'static str,
    pub ports_in: Ports,
    pub ports_out: Ports,
    build: Constructor,
}

impl std::fmt::Debug for ClassInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassInfo")
            .field("class", &self.class)
            .field("ports_in", &self.ports_in.describe())
            .field("ports_out", &self.ports_out.describe())
            .finish()
    }
}

fn construct<T: NodeClass>(settings: &Value) -> PipelineResult<Box<dyn Node>> {
    Ok(Box::new(T::from_settings(settings)?))
}

/// Maps class names to constructors.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    classes: BTreeMap<&'static str, ClassInfo>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node class, validating its declared ports.
    pub fn register<T: NodeClass>(&mut self) -> PipelineResult<&mut Self> {
        if self.classes.contains_key(T::CLASS) {
            return Err(PipelineError::DuplicateClass(T::CLASS.to_string()));
        }
        let ports_in = T::class_ports_in();
        let ports_out = T::class_ports_out();
        ports_in.validate(&format!("{} inputs", T::CLASS))?;
        ports_out.validate(&format!("{} outputs", T::CLASS))?;

        tracing::debug!(
            "Registered node class {} (in: {}, out: {})",
            T::CLASS,
            ports_in.describe(),
            ports_out.describe()
        );
        self.classes.insert(
            T::CLASS,
            ClassInfo {
                class: T::CLASS,
                ports_in,
                ports_out,
                build: construct::<T>,
            },
        );
        Ok(self)
    }

    /// Instantiate a registered class from its settings.
    pub fn build(&self, class: &str, settings: &Value) -> PipelineResult<Box<dyn Node>> {
        let info = self.info(class)?;
        (info.build)(settings)
    }

    pub fn info(&self, class: &str) -> PipelineResult<&ClassInfo> {
        self.classes
            .get(class)
            .ok_or_else(|| PipelineError::UnknownClass(class.to_string()))
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    pub fn classes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.classes.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::port::{Number, Port};
    use serde_json::json;

    struct Twice;

    impl Node for Twice {
        fn class(&self) -> &'static str {
            Self::CLASS
        }
        fn ports_in(&self) -> Ports {
            Self::class_ports_in()
        }
        fn ports_out(&self) -> Ports {
            Self::class_ports_out()
        }
    }

    impl NodeClass for Twice {
        const CLASS: &'static str = "Twice";
        fn class_ports_in() -> Ports {
            Ports::new(vec![Port::new("Data", &Number)])
        }
        fn class_ports_out() -> Ports {
            Ports::new(vec![Port::new("Data", &Number)])
        }
        fn from_settings(_settings: &Value) -> PipelineResult<Self> {
            Ok(Twice)
        }
    }

    struct Clashing;

    impl Node for Clashing {
        fn class(&self) -> &'static str {
            Self::CLASS
        }
        fn ports_in(&self) -> Ports {
            Self::class_ports_in()
        }
        fn ports_out(&self) -> Ports {
            Self::class_ports_out()
        }
    }

    impl NodeClass for Clashing {
        const CLASS: &'static str = "Clashing";
        fn class_ports_in() -> Ports {
            Ports::new(vec![Port::new("A", &Number), Port::new("a", &Number)])
        }
        fn class_ports_out() -> Ports {
            Ports::empty()
        }
        fn from_settings(_settings: &Value) -> PipelineResult<Self> {
            Ok(Clashing)
        }
    }

    #[test]
    fn test_register_and_build() {
        let mut registry = NodeRegistry::new();
        registry.register::<Twice>().unwrap();
        assert!(registry.contains("Twice"));
        let node = registry.build("Twice", &json!({})).unwrap();
        assert_eq!(node.class(), "Twice");
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let mut registry = NodeRegistry::new();
        registry.register::<Twice>().unwrap();
        assert!(matches!(
            registry.register::<Twice>(),
            Err(PipelineError::DuplicateClass(_))
        ));
    }

    #[test]
    fn test_invalid_ports_fail_at_registration() {
        let mut registry = NodeRegistry::new();
        let err = registry.register::<Clashing>().unwrap_err();
        assert!(matches!(err, PipelineError::DuplicatePortKey { .. }));
        assert!(!registry.contains("Clashing"));
    }

    #[test]
    fn test_unknown_class() {
        let registry = NodeRegistry::new();
        assert!(matches!(
            registry.build("Nope", &json!(null)),
            Err(PipelineError::UnknownClass(_))
        ));
    }
}
