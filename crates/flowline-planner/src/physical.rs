//! Physical plan: the pipeline as it will be spawned.
//!
//! Each step carries the operator's serialized form, its element types, and
//! the process it was placed in. The executor instantiates client steps
//! directly and ships server steps as `OperatorSpec`s.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use flowline_core::element::ElementType;
use flowline_core::error::Result;
use flowline_core::hash::Hash256;
use flowline_core::id::OperatorIndex;
use flowline_core::location::Placement;
use flowline_operators::registry::OperatorSpec;

use crate::pipeline::Pipeline;
use crate::placement::{crossings, plan_placements};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub index: OperatorIndex,
    pub name: String,
    pub spec: OperatorSpec,
    pub placement: Placement,
    pub input: ElementType,
    pub output: ElementType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalPlan {
    pub steps: Vec<PlannedStep>,
    /// Hash of the step specs; identifies the plan in run manifests.
    pub fingerprint: Hash256,
}

impl PhysicalPlan {
    /// Type and place a runnable pipeline.
    pub fn build(pipeline: &Pipeline, overrides: &BTreeMap<usize, Placement>) -> Result<Self> {
        pipeline.check_runnable()?;
        let placements = plan_placements(pipeline, overrides)?;
        let mut input = ElementType::Void;
        let mut steps = Vec::with_capacity(pipeline.len());
        for (i, (op, placement)) in pipeline.operators().iter().zip(placements).enumerate() {
            let output = op.infer_type(input)?;
            steps.push(PlannedStep {
                index: OperatorIndex::from_position(i),
                name: op.name().to_string(),
                spec: OperatorSpec::of(op.as_ref()),
                placement,
                input,
                output,
            });
            input = output;
        }
        let fingerprint = pipeline.fingerprint()?;
        Ok(Self { steps, fingerprint })
    }

    pub fn placements(&self) -> Vec<Placement> {
        self.steps.iter().map(|s| s.placement).collect()
    }

    /// Links that cross a process boundary, by upstream operator index.
    pub fn crossings(&self) -> Vec<usize> {
        crossings(&self.placements())
    }

    pub fn needs_server(&self) -> bool {
        self.steps.iter().any(|s| s.placement == Placement::Server)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_core::error::{ConstructionError, Error};
    use flowline_operators::builtins::{Discard, FromEvents, Head, WriteJson};

    #[test]
    fn test_build_records_types_and_placement() {
        let p = Pipeline::new(vec![
            Box::new(FromEvents::sequence(3)),
            Box::new(Head::new(1)),
            Box::new(WriteJson),
            Box::new(Discard),
        ])
        .expect("pipeline");
        let overrides = BTreeMap::from([(2, Placement::Server)]);
        let plan = PhysicalPlan::build(&p, &overrides).expect("plan");
        let types: Vec<_> = plan.steps.iter().map(|s| (s.input, s.output)).collect();
        assert_eq!(
            types,
            vec![
                (ElementType::Void, ElementType::Events),
                (ElementType::Events, ElementType::Events),
                (ElementType::Events, ElementType::Bytes),
                (ElementType::Bytes, ElementType::Void),
            ]
        );
        assert_eq!(plan.crossings(), vec![1]);
        assert!(plan.needs_server());
        assert_eq!(plan.fingerprint, p.fingerprint().expect("hash"));
    }

    #[test]
    fn test_unrunnable_pipeline_is_rejected() {
        let p = Pipeline::new(vec![Box::new(FromEvents::sequence(3))]).expect("pipeline");
        let err = PhysicalPlan::build(&p, &BTreeMap::new()).expect_err("no sink");
        assert_eq!(
            err,
            Error::Construction(ConstructionError::Pipeline(
                "expected pipeline to end with a sink".into()
            ))
        );
    }
}
