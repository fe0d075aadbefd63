//! Name → factory table for rebuilding operators from their serialized form.
//!
//! `OperatorSpec` is what crosses a process boundary or lands in a pipeline
//! definition file; the receiving side looks the name up here.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use flowline_core::error::ConstructionError;

use crate::traits::Operator;

pub type Factory = fn(&Value) -> Result<Box<dyn Operator>, ConstructionError>;

/// Structured serialized form of one operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorSpec {
    pub name: String,
    #[serde(default)]
    pub config: Value,
}

impl OperatorSpec {
    pub fn of(op: &dyn Operator) -> Self {
        Self {
            name: op.name().to_string(),
            config: op.config(),
        }
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    factories: BTreeMap<String, Factory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every builtin operator.
    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        crate::builtins::register(&mut r);
        r
    }

    /// Register `factory` under `name`; a later registration replaces an earlier one.
    pub fn register(&mut self, name: &str, factory: Factory) -> &mut Self {
        self.factories.insert(name.to_string(), factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn make(&self, spec: &OperatorSpec) -> Result<Box<dyn Operator>, ConstructionError> {
        let factory = self
            .factories
            .get(&spec.name)
            .ok_or_else(|| ConstructionError::UnknownOperator(spec.name.clone()))?;
        factory(&spec.config)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

/// Deserialize operator arguments, treating a missing config as `{}`.
pub fn parse_config<T: DeserializeOwned>(
    operator: &str,
    config: &Value,
) -> Result<T, ConstructionError> {
    let config = match config {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(config).map_err(|e| ConstructionError::invalid(operator, e.to_string()))
}

/// Serialize operator arguments for `Operator::config`.
pub fn to_config<T: Serialize>(args: &T) -> Value {
    serde_json::to_value(args).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_operator_is_rejected() {
        let registry = Registry::with_builtins();
        let err = registry
            .make(&OperatorSpec {
                name: "nope".into(),
                config: Value::Null,
            })
            .expect_err("unknown");
        assert_eq!(err, ConstructionError::UnknownOperator("nope".into()));
    }

    #[test]
    fn test_spec_rebuilds_equal_config() {
        let registry = Registry::with_builtins();
        let spec = OperatorSpec {
            name: "slice".into(),
            config: json!({"begin": -5}),
        };
        let op = registry.make(&spec).expect("slice");
        let again = registry.make(&OperatorSpec::of(op.as_ref())).expect("rebuilt");
        assert_eq!(op.config(), again.config());
    }

    #[test]
    fn test_bad_arguments_fail_fast() {
        let registry = Registry::with_builtins();
        let err = registry
            .make(&OperatorSpec {
                name: "head".into(),
                config: json!({"count": "ten"}),
            })
            .expect_err("bad count");
        assert!(matches!(err, ConstructionError::InvalidArgument { .. }));
    }
}
