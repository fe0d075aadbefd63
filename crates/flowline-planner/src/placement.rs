//! Decide which process each operator runs in.

use std::collections::BTreeMap;

use flowline_core::error::ConstructionError;
use flowline_core::location::{Location, Placement};

use crate::pipeline::Pipeline;

/// One placement per operator.
///
/// `Local` operators go to the client and `Remote` ones to the server;
/// `Anywhere` follows its predecessor, and the first operator defaults to
/// the client. An override wins unless it contradicts a fixed location.
pub fn plan_placements(
    pipeline: &Pipeline,
    overrides: &BTreeMap<usize, Placement>,
) -> Result<Vec<Placement>, ConstructionError> {
    if let Some(index) = overrides.keys().find(|i| **i >= pipeline.len()) {
        return Err(ConstructionError::Pipeline(format!(
            "placement override for operator {index}, but the pipeline has {} operators",
            pipeline.len()
        )));
    }
    let mut previous = Placement::Client;
    let mut placements = Vec::with_capacity(pipeline.len());
    for (i, op) in pipeline.operators().iter().enumerate() {
        let location = op.location();
        let placement = match overrides.get(&i) {
            Some(&forced) if location.admits(forced) => forced,
            Some(&forced) => {
                return Err(ConstructionError::invalid(
                    op.name(),
                    format!("cannot place a {location} operator on the {forced}"),
                ));
            }
            None => match location {
                Location::Local => Placement::Client,
                Location::Remote => Placement::Server,
                Location::Anywhere => previous,
            },
        };
        previous = placement;
        placements.push(placement);
    }
    Ok(placements)
}

/// Indices `i` where operator `i` and `i + 1` run in different processes.
pub fn crossings(placements: &[Placement]) -> Vec<usize> {
    placements
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[0] != pair[1])
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_operators::builtins::{Collect, Discard, FromEvents, Head};

    fn pipeline() -> Pipeline {
        Pipeline::new(vec![
            Box::new(FromEvents::sequence(3)),
            Box::new(Head::new(2)),
            Box::new(Collect::default()),
        ])
        .expect("pipeline")
    }

    #[test]
    fn test_anywhere_follows_predecessor() {
        let got = plan_placements(&pipeline(), &BTreeMap::new()).expect("plan");
        assert_eq!(got, vec![Placement::Client; 3]);
        assert!(crossings(&got).is_empty());
    }

    #[test]
    fn test_override_moves_the_rest_of_the_chain() {
        let overrides = BTreeMap::from([(0, Placement::Server)]);
        let got = plan_placements(&pipeline(), &overrides).expect("plan");
        assert_eq!(got, vec![Placement::Server, Placement::Server, Placement::Client]);
        assert_eq!(crossings(&got), vec![1]);
    }

    #[test]
    fn test_override_contradicting_location_is_rejected() {
        let overrides = BTreeMap::from([(2, Placement::Server)]);
        let err = plan_placements(&pipeline(), &overrides).expect_err("local on server");
        assert!(matches!(err, ConstructionError::InvalidArgument { ref operator, .. } if operator == "collect"));
    }

    #[test]
    fn test_out_of_range_override() {
        let p = Pipeline::new(vec![Box::new(FromEvents::sequence(1)), Box::new(Discard)])
            .expect("pipeline");
        let overrides = BTreeMap::from([(5, Placement::Server)]);
        assert!(plan_placements(&p, &overrides).is_err());
    }
}
