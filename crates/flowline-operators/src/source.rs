//! In-memory sources.
//!
//! `from_events` replays fixed batches (or generates a numbered sequence)
//! and applies any filter the optimizer pushed into it. `from_bytes` replays
//! fixed byte chunks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use flowline_core::element::{Chunk, ElementType};
use flowline_core::error::{ConstructionError, OperatorError};
use flowline_core::expr::Expression;
use flowline_core::schema::{DataType, Field, Schema};
use flowline_core::types::{EventBatch, Scalar};

use crate::control::Ctrl;
use crate::generator::{OperatorInput, OperatorOutput};
use crate::optimize::{EventOrder, OptimizeResult, OrderEffect};
use crate::registry::{parse_config, to_config};
use crate::traits::{expect_input, unexpected_input, Operator};

/// Schema of generated sequence events.
pub const SEQUENCE_SCHEMA: &str = "flowline.sequence";

const DEFAULT_BATCH_SIZE: u64 = 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FromEvents {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub batches: Vec<EventBatch>,
    /// Generate `count` sequence events (`id` = 0..count) after `batches`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Expression>,
}

impl FromEvents {
    pub fn new(batches: Vec<EventBatch>) -> Self {
        Self {
            batches,
            ..Self::default()
        }
    }

    pub fn sequence(count: u64) -> Self {
        Self {
            count: Some(count),
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn from_config(config: &Value) -> Result<Box<dyn Operator>, ConstructionError> {
        let op: FromEvents = parse_config("from_events", config)?;
        if op.batch_size == Some(0) {
            return Err(ConstructionError::invalid("from_events", "batch_size must be positive"));
        }
        Ok(Box::new(op))
    }
}

/// `count` events of the sequence schema, `batch_size` rows per batch.
pub fn sequence_batches(count: u64, batch_size: u64) -> Vec<EventBatch> {
    let schema = Arc::new(Schema::new(
        SEQUENCE_SCHEMA,
        vec![Field::new("id", DataType::Int64, false)],
    ));
    let batch_size = batch_size.max(1);
    let mut out = Vec::new();
    let mut next = 0u64;
    while next < count {
        let end = (next + batch_size).min(count);
        let rows = (next..end).map(|i| vec![Scalar::I64(i as i64)]).collect();
        // The generated rows always match the single-column schema.
        if let Ok(batch) = EventBatch::from_rows(Arc::clone(&schema), rows) {
            out.push(batch);
        }
        next = end;
    }
    out
}

impl Operator for FromEvents {
    fn name(&self) -> &'static str {
        "from_events"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        expect_input(self.name(), input, ElementType::Void, ElementType::Events)
    }

    fn instantiate(&self, input: OperatorInput, _ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        if !matches!(input, OperatorInput::Void) {
            return Err(unexpected_input(self.name(), &input));
        }
        let mut batches = self.batches.clone();
        if let Some(count) = self.count {
            batches.extend(sequence_batches(
                count,
                self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            ));
        }
        let filter = self.filter.clone().filter(|f| !f.is_trivially_true());
        let gen = batches.into_iter().map(move |batch| {
            Ok(match &filter {
                Some(f) => batch.filter(&f.eval_rows(&batch)),
                None => batch,
            })
        });
        Ok(OperatorOutput::Events(Box::new(gen)))
    }

    fn config(&self) -> Value {
        to_config(self)
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn optimize(&self, filter: &Expression, _order: EventOrder) -> OptimizeResult {
        let mut replacement = self.clone();
        let combined = replacement.filter.take().unwrap_or_default().conjoin(filter.clone());
        if !combined.is_trivially_true() {
            replacement.filter = Some(combined);
        }
        OptimizeResult::new(
            Some(Expression::True),
            OrderEffect::Ordered,
            vec![Box::new(replacement)],
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FromBytes {
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

impl FromBytes {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    pub fn from_config(config: &Value) -> Result<Box<dyn Operator>, ConstructionError> {
        let op: FromBytes = parse_config("from_bytes", config)?;
        Ok(Box::new(op))
    }
}

impl Operator for FromBytes {
    fn name(&self) -> &'static str {
        "from_bytes"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        expect_input(self.name(), input, ElementType::Void, ElementType::Bytes)
    }

    fn instantiate(&self, input: OperatorInput, _ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        if !matches!(input, OperatorInput::Void) {
            return Err(unexpected_input(self.name(), &input));
        }
        let gen = self.chunks.clone().into_iter().map(Ok);
        Ok(OperatorOutput::Bytes(Box::new(gen)))
    }

    fn config(&self) -> Value {
        to_config(self)
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{run_local, LocalControl};
    use flowline_core::expr::CmpOp;

    #[test]
    fn test_sequence_respects_batch_size() {
        let batches = sequence_batches(10, 4);
        let sizes: Vec<usize> = batches.iter().map(EventBatch::rows).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(batches[2].row(1), Some(vec![Scalar::I64(9)]));
    }

    #[test]
    fn test_source_absorbs_pushed_filter() {
        let op = FromEvents::sequence(10);
        let filter = Expression::compare("id", CmpOp::Ge, Scalar::I64(7));
        let res = op.optimize(&filter, EventOrder::Ordered);
        assert_eq!(res.filter, Some(Expression::True));
        assert_eq!(res.replacement.len(), 1);

        let out: Vec<EventBatch> =
            run_local::<(), _>(res.replacement[0].as_ref(), Arc::new(LocalControl::default()), vec![])
                .expect("run");
        let total: usize = out.iter().map(EventBatch::rows).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_from_events_rejects_zero_batch_size() {
        let err = FromEvents::from_config(&serde_json::json!({"count": 3, "batch_size": 0}))
            .expect_err("zero");
        assert!(matches!(err, ConstructionError::InvalidArgument { .. }));
    }

    #[test]
    fn test_config_round_trips_through_factory() {
        let op = FromEvents::sequence(5).with_batch_size(2);
        let rebuilt = FromEvents::from_config(&op.config()).expect("rebuild");
        assert_eq!(rebuilt.config(), op.config());
    }
}
