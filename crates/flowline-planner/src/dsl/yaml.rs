//! YAML pipeline definitions.
//!
//! Example:
//! ```yaml
//! config:
//!   strict: true
//!   events_demand: { min_elements: 16, max_elements: 256, max_batches: 4 }
//! steps:
//!   - op: from_events
//!     count: 100
//!   - op: where
//!     expression: "id > 10"
//!   - op: head
//!     count: 5
//!   - op: discard
//! ```
//!
//! Every key of a step besides `op` is handed to the operator's factory as
//! its config.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use flowline_core::config::EngineConfig;
use flowline_core::error::ConstructionError;
use flowline_operators::registry::{OperatorSpec, Registry};

use crate::pipeline::Pipeline;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Document {
    #[serde(default)]
    config: Option<EngineConfig>,
    steps: Vec<StepDef>,
}

#[derive(Debug, Deserialize)]
struct StepDef {
    op: String,
    #[serde(flatten)]
    args: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct ParsedPipeline {
    pub specs: Vec<OperatorSpec>,
    pub config: EngineConfig,
}

/// Parse a definition into operator specs and the engine config it carries.
pub fn parse_yaml_pipeline(yaml_src: &str) -> Result<ParsedPipeline, ConstructionError> {
    let doc: Document = serde_yaml::from_str(yaml_src)
        .map_err(|e| ConstructionError::Definition(e.to_string()))?;
    if doc.steps.is_empty() {
        return Err(ConstructionError::Definition("pipeline has no steps".into()));
    }
    let specs = doc
        .steps
        .into_iter()
        .map(|step| OperatorSpec {
            name: step.op,
            config: Value::Object(step.args.into_iter().collect()),
        })
        .collect();
    let config = doc.config.unwrap_or_default();
    config
        .validate()
        .map_err(|e| ConstructionError::Definition(e.to_string()))?;
    Ok(ParsedPipeline { specs, config })
}

/// Parse a definition and build its operators through `registry`.
pub fn load_pipeline(
    yaml_src: &str,
    registry: &Registry,
) -> Result<(Pipeline, EngineConfig), ConstructionError> {
    let parsed = parse_yaml_pipeline(yaml_src)?;
    let pipeline = Pipeline::from_specs(registry, &parsed.specs)?;
    tracing::debug!(operators = pipeline.len(), "loaded pipeline definition");
    Ok((pipeline, parsed.config))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = r#"
config:
  strict: true
  events_demand: { min_elements: 16, max_elements: 256, max_batches: 4 }
steps:
  - op: from_events
    count: 100
  - op: where
    expression: "id > 10"
  - op: head
    count: 5
  - op: discard
"#;

    #[test]
    fn test_parse_steps_and_config() {
        let parsed = parse_yaml_pipeline(SRC).expect("parse");
        let names: Vec<&str> = parsed.specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["from_events", "where", "head", "discard"]);
        assert_eq!(parsed.specs[2].config, serde_json::json!({"count": 5}));
        assert_eq!(parsed.specs[3].config, serde_json::json!({}));
        assert!(parsed.config.strict);
        assert_eq!(parsed.config.events_demand.max_batches, 4);
        // Untouched sections keep their defaults.
        assert_eq!(parsed.config.bytes_demand, EngineConfig::default().bytes_demand);
    }

    #[test]
    fn test_load_builds_runnable_pipeline() {
        let (pipeline, _) = load_pipeline(SRC, &Registry::with_builtins()).expect("load");
        pipeline.check_runnable().expect("runnable");
    }

    #[test]
    fn test_unknown_operator() {
        let src = "steps:\n  - op: frobnicate\n";
        let err = load_pipeline(src, &Registry::with_builtins()).expect_err("unknown");
        assert_eq!(err, ConstructionError::UnknownOperator("frobnicate".into()));
    }

    #[test]
    fn test_malformed_documents() {
        assert!(matches!(
            parse_yaml_pipeline("steps: []"),
            Err(ConstructionError::Definition(_))
        ));
        assert!(matches!(
            parse_yaml_pipeline("steps:\n  - count: 3\n"),
            Err(ConstructionError::Definition(_))
        ));
        assert!(matches!(
            parse_yaml_pipeline("config:\n  backoff_rate: 0.5\nsteps:\n  - op: pass\n"),
            Err(ConstructionError::Definition(_))
        ));
    }
}
