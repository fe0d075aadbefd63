//! Predicate pushdown and order propagation over a linear pipeline.
//!
//! One pass walks from the sink towards the source. Each operator is offered
//! the filter accumulated downstream and the ordering downstream still needs;
//! its `OptimizeResult` decides whether the filter keeps moving upstream or is
//! materialized as a `where` right after it.

use flowline_core::element::ElementType;
use flowline_core::expr::Expression;
use flowline_operators::builtins::Where;
use flowline_operators::optimize::EventOrder;
use flowline_operators::traits::Operator;

use crate::pipeline::Pipeline;

/// Result of one pass: what is left to apply at the source end, and the
/// rewritten pipeline.
#[derive(Debug, Clone)]
pub struct Optimized {
    pub filter: Expression,
    pub order: EventOrder,
    pub pipeline: Pipeline,
}

impl Pipeline {
    pub fn optimize(&self, filter: &Expression, order: EventOrder) -> Optimized {
        let mut current_filter = filter.clone();
        let mut current_order = order;
        // Built back to front, reversed at the end.
        let mut rewritten: Vec<Box<dyn Operator>> = Vec::with_capacity(self.len());
        for op in self.operators().iter().rev() {
            let result = op.optimize(&current_filter, current_order);
            match result.filter {
                Some(upstream) => current_filter = upstream,
                None => {
                    if !current_filter.is_trivially_true() {
                        let kept = std::mem::replace(&mut current_filter, Expression::True);
                        rewritten.push(Box::new(Where::new(kept)));
                    }
                }
            }
            rewritten.extend(result.replacement.into_iter().rev());
            current_order = result.order.apply(current_order);
        }
        rewritten.reverse();
        Optimized {
            filter: current_filter,
            order: current_order,
            pipeline: Pipeline::from_unchecked(rewritten),
        }
    }
}

/// Optimize a closed pipeline; anything else comes back unchanged.
///
/// A closed pipeline has nowhere to put a residual filter, so a pass that
/// leaves one (or produces an ill-typed pipeline) is discarded.
pub fn optimize_if_closed(pipeline: &Pipeline) -> Pipeline {
    if !pipeline.is_closed() {
        return pipeline.clone();
    }
    let Optimized {
        filter,
        order,
        pipeline: rewritten,
    } = pipeline.optimize(&Expression::True, EventOrder::Ordered);
    if !filter.is_trivially_true() {
        tracing::error!(
            ?filter,
            ?order,
            "optimizing a closed pipeline left a residual filter; keeping the original"
        );
        return pipeline.clone();
    }
    if let Err(e) = rewritten.infer_type(ElementType::Void) {
        tracing::error!(error = %e, "optimized pipeline failed to type check; keeping the original");
        return pipeline.clone();
    }
    if !rewritten.is_closed() {
        tracing::error!("optimized pipeline is no longer closed; keeping the original");
        return pipeline.clone();
    }
    rewritten
}

/// Repeat [`optimize_if_closed`] until the serialized form stops changing or
/// `max_passes` passes ran.
pub fn optimize_to_fixpoint(pipeline: &Pipeline, max_passes: usize) -> Pipeline {
    let mut current = pipeline.clone();
    let mut specs = current.to_specs();
    for pass in 1..=max_passes {
        let next = optimize_if_closed(&current);
        let next_specs = next.to_specs();
        if next_specs == specs {
            tracing::debug!(passes = pass, operators = next.len(), "optimizer reached a fixpoint");
            return next;
        }
        tracing::trace!(pass, before = specs.len(), after = next_specs.len(), "optimizer pass");
        current = next;
        specs = next_specs;
    }
    tracing::debug!(max_passes, "optimizer stopped at the pass limit");
    current
}
