//! Answers an operator gives the optimizer.
//!
//! The optimizer walks a pipeline from sink to source and offers each
//! operator the filter accumulated downstream plus the ordering downstream
//! still cares about. The operator answers with an [`OptimizeResult`].

use serde::{Deserialize, Serialize};

use flowline_core::expr::Expression;

use crate::traits::Operator;

/// Ordering requirement offered from downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrder {
    Ordered,
    /// Order only matters between events of the same schema.
    Schema,
    Unordered,
}

/// What the operator does to the ordering requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEffect {
    /// Needs ordered input regardless of what downstream needs.
    Ordered,
    /// Output order does not depend on input order; upstream may reorder.
    Unordered,
    /// Passes the downstream requirement through.
    OrderInvariant,
}

impl OrderEffect {
    pub fn apply(self, current: EventOrder) -> EventOrder {
        match self {
            OrderEffect::Ordered => EventOrder::Ordered,
            OrderEffect::Unordered => EventOrder::Unordered,
            OrderEffect::OrderInvariant => current,
        }
    }
}

pub struct OptimizeResult {
    /// `None`: the offered filter must stay downstream of this operator.
    /// `Some(expr)`: residual to push further upstream.
    pub filter: Option<Expression>,
    pub order: OrderEffect,
    /// Operators that take this one's place; empty means eliminated.
    pub replacement: Vec<Box<dyn Operator>>,
}

impl std::fmt::Debug for OptimizeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.replacement.iter().map(|op| op.name()).collect();
        f.debug_struct("OptimizeResult")
            .field("filter", &self.filter)
            .field("order", &self.order)
            .field("replacement", &names)
            .finish()
    }
}

impl OptimizeResult {
    pub fn new(
        filter: Option<Expression>,
        order: OrderEffect,
        replacement: Vec<Box<dyn Operator>>,
    ) -> Self {
        Self {
            filter,
            order,
            replacement,
        }
    }
}

/// Keep the operator as is and the filter downstream of it.
pub fn do_not_optimize(op: Box<dyn Operator>) -> OptimizeResult {
    OptimizeResult::new(None, OrderEffect::Ordered, vec![op])
}

/// Keep the operator, let `filter` and the ordering requirement pass.
pub fn order_invariant(op: Box<dyn Operator>, filter: Expression) -> OptimizeResult {
    OptimizeResult::new(Some(filter), OrderEffect::OrderInvariant, vec![op])
}

/// Eliminate the operator, pushing `filter` upstream.
pub fn eliminate(filter: Expression) -> OptimizeResult {
    OptimizeResult::new(Some(filter), OrderEffect::OrderInvariant, Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_effect_application() {
        assert_eq!(OrderEffect::Ordered.apply(EventOrder::Unordered), EventOrder::Ordered);
        assert_eq!(OrderEffect::Unordered.apply(EventOrder::Ordered), EventOrder::Unordered);
        assert_eq!(OrderEffect::OrderInvariant.apply(EventOrder::Schema), EventOrder::Schema);
    }

    #[test]
    fn test_eliminate_has_no_replacement() {
        let res = eliminate(Expression::True);
        assert!(res.replacement.is_empty());
        assert_eq!(res.filter, Some(Expression::True));
    }
}
