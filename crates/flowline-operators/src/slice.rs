//! `slice begin:end` and `tail n`.
//!
//! Indices follow the usual negative-from-the-end convention. Depending on
//! the signs the operator streams, withholds a fixed-size suffix, or has to
//! see the end of input before emitting anything:
//!
//! | begin | end    | mode                                  |
//! |-------|--------|---------------------------------------|
//! | >= 0  | >= 0   | stream, finish once `end` is reached  |
//! | >= 0  | < 0    | stream, withholding the last `-end`   |
//! | < 0   | any    | buffer, emit once input is exhausted  |
//!
//! `tail n` is `slice -n:`; the optimizer performs that rewrite.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use flowline_core::element::{Element, ElementType};
use flowline_core::error::{ConstructionError, OperatorError};
use flowline_core::expr::Expression;
use flowline_core::types::EventBatch;

use crate::control::Ctrl;
use crate::generator::{Input, OperatorInput, OperatorOutput, Output};
use crate::optimize::{do_not_optimize, eliminate, EventOrder, OptimizeResult};
use crate::registry::{parse_config, to_config};
use crate::traits::{expect_input, unexpected_input, Operator};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

impl Slice {
    pub fn new(begin: Option<i64>, end: Option<i64>) -> Self {
        Self { begin, end }
    }

    pub fn from_config(config: &Value) -> Result<Box<dyn Operator>, ConstructionError> {
        let op: Slice = parse_config("slice", config)?;
        Ok(Box::new(op))
    }

    fn is_identity(&self) -> bool {
        self.begin.unwrap_or(0) == 0 && self.end.is_none()
    }
}

/// Rows `[begin, end)` of `item`, clamped.
fn sub<T: Element>(item: T, begin: u64, end: u64) -> T {
    let (head, _) = item.split_at(end);
    let (_, rest) = head.split_at(begin);
    rest
}

fn clamp(v: i64, hi: u64) -> u64 {
    (v.max(0) as u64).min(hi)
}

fn stream_range<T: Element>(mut input: Input<T>, begin: u64, end: u64) -> Output<T> {
    if end <= begin {
        return Box::new(std::iter::empty());
    }
    let mut offset = 0u64;
    Box::new(std::iter::from_fn(move || {
        if offset >= end {
            return None;
        }
        let item = input.next()?;
        let rows = item.size();
        if rows == 0 {
            return Some(Ok(T::default()));
        }
        let b = begin.saturating_sub(offset).min(rows);
        let e = end.saturating_sub(offset).min(rows);
        offset += rows;
        Some(Ok(sub(item, b, e)))
    }))
}

fn stream_withholding<T: Element>(mut input: Input<T>, begin: u64, keep: u64) -> Output<T> {
    let mut offset = 0u64;
    let mut held: VecDeque<T> = VecDeque::new();
    let mut num_held = 0u64;
    let mut ready: VecDeque<T> = VecDeque::new();
    Box::new(std::iter::from_fn(move || {
        if let Some(item) = ready.pop_front() {
            return Some(Ok(item));
        }
        let item = input.next()?;
        let rows = item.size();
        if rows == 0 {
            return Some(Ok(T::default()));
        }
        let b = begin.saturating_sub(offset).min(rows);
        offset += rows;
        let kept = sub(item, b, rows);
        if kept.size() > 0 {
            num_held += kept.size();
            held.push_back(kept);
        }
        let mut excess = num_held.saturating_sub(keep);
        while excess > 0 {
            let Some(front) = held.pop_front() else { break };
            let n = front.size();
            if n <= excess {
                excess -= n;
                num_held -= n;
                ready.push_back(front);
            } else {
                let (out, rest) = front.split_at(excess);
                num_held -= excess;
                excess = 0;
                ready.push_back(out);
                held.push_front(rest);
            }
        }
        Some(Ok(ready.pop_front().unwrap_or_default()))
    }))
}

/// Buffer input until exhausted, then emit rows `[total + begin, end)`.
///
/// Only rows that can still be part of the result are kept: the first `end`
/// rows for a non-negative `end`, otherwise the last `-begin`.
fn buffered<T: Element>(mut input: Input<T>, begin: i64, end: Option<i64>) -> Output<T> {
    let mut items: VecDeque<T> = VecDeque::new();
    let mut first = 0u64;
    let mut held = 0u64;
    let mut total = 0u64;
    let mut out: Option<VecDeque<T>> = None;
    let keep_last = begin.unsigned_abs();
    Box::new(std::iter::from_fn(move || loop {
        if let Some(out) = out.as_mut() {
            return out.pop_front().map(Ok);
        }
        match input.next() {
            Some(item) if item.size() == 0 => return Some(Ok(T::default())),
            Some(item) => {
                let rows = item.size();
                let start = total;
                total += rows;
                match end {
                    Some(e) if e >= 0 => {
                        let kept = sub(item, 0, clamp(e - start as i64, rows));
                        if kept.size() > 0 {
                            held += kept.size();
                            items.push_back(kept);
                        }
                    }
                    _ => {
                        held += rows;
                        items.push_back(item);
                        let mut excess = held.saturating_sub(keep_last);
                        while excess > 0 {
                            let Some(front) = items.pop_front() else { break };
                            let n = front.size();
                            if n <= excess {
                                excess -= n;
                                held -= n;
                                first += n;
                            } else {
                                let (_, rest) = front.split_at(excess);
                                held -= excess;
                                first += excess;
                                excess = 0;
                                items.push_front(rest);
                            }
                        }
                    }
                }
                return Some(Ok(T::default()));
            }
            None => {
                let abs_begin = clamp(total as i64 + begin, total);
                let abs_end = match end {
                    None => total,
                    Some(e) if e >= 0 => (e as u64).min(total),
                    Some(e) => clamp(total as i64 + e, total),
                };
                let mut result = VecDeque::new();
                let mut pos = first;
                for item in items.drain(..) {
                    let n = item.size();
                    let b = abs_begin.saturating_sub(pos).min(n);
                    let e = abs_end.saturating_sub(pos).min(n);
                    pos += n;
                    if b < e {
                        result.push_back(sub(item, b, e));
                    }
                }
                out = Some(result);
            }
        }
    }))
}

pub(crate) fn slice<T: Element>(input: Input<T>, begin: Option<i64>, end: Option<i64>) -> Output<T> {
    match (begin.unwrap_or(0), end) {
        (0, None) => Box::new(input.map(Ok)),
        (b, Some(e)) if b >= 0 && e >= 0 => stream_range(input, b as u64, e as u64),
        (b, e) if b >= 0 => stream_withholding(input, b as u64, e.unwrap_or(0).unsigned_abs()),
        (b, e) => buffered(input, b, e),
    }
}

impl Operator for Slice {
    fn name(&self) -> &'static str {
        "slice"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        expect_input(self.name(), input, ElementType::Events, ElementType::Events)
    }

    fn instantiate(&self, input: OperatorInput, _ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        match input {
            OperatorInput::Events(input) => {
                Ok(OperatorOutput::Events(slice(input, self.begin, self.end)))
            }
            other => Err(unexpected_input(self.name(), &other)),
        }
    }

    fn config(&self) -> Value {
        to_config(self)
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(*self)
    }

    fn optimize(&self, filter: &Expression, _order: EventOrder) -> OptimizeResult {
        if self.is_identity() {
            return eliminate(filter.clone());
        }
        do_not_optimize(self.copy())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tail {
    pub count: u64,
}

impl Tail {
    pub fn new(count: u64) -> Self {
        Self { count }
    }

    pub fn from_config(config: &Value) -> Result<Box<dyn Operator>, ConstructionError> {
        let op: Tail = parse_config("tail", config)?;
        if i64::try_from(op.count).is_err() {
            return Err(ConstructionError::invalid("tail", "count out of range"));
        }
        Ok(Box::new(op))
    }

    /// The equivalent `slice`.
    pub fn as_slice(&self) -> Slice {
        let n = i64::try_from(self.count).unwrap_or(i64::MAX);
        Slice::new(Some(-n), None)
    }
}

/// Keep everything, then emit the last `count` rows.
fn tail(mut input: Input<EventBatch>, count: u64) -> Output<EventBatch> {
    let mut all: Vec<EventBatch> = Vec::new();
    let mut last: Option<VecDeque<EventBatch>> = None;
    Box::new(std::iter::from_fn(move || {
        if let Some(last) = last.as_mut() {
            return last.pop_front().map(Ok);
        }
        match input.next() {
            Some(batch) => {
                if batch.size() > 0 {
                    all.push(batch);
                }
                Some(Ok(EventBatch::default()))
            }
            None => {
                let total: u64 = all.iter().map(Element::size).sum();
                let mut skip = total.saturating_sub(count);
                let mut kept = VecDeque::new();
                for batch in all.drain(..) {
                    let n = batch.size();
                    if skip >= n {
                        skip -= n;
                        continue;
                    }
                    kept.push_back(sub(batch, skip, n));
                    skip = 0;
                }
                let first = kept.pop_front();
                last = Some(kept);
                Some(Ok(first.unwrap_or_default()))
            }
        }
    }))
}

impl Operator for Tail {
    fn name(&self) -> &'static str {
        "tail"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        expect_input(self.name(), input, ElementType::Events, ElementType::Events)
    }

    fn instantiate(&self, input: OperatorInput, _ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        match input {
            OperatorInput::Events(input) => Ok(OperatorOutput::Events(tail(input, self.count))),
            other => Err(unexpected_input(self.name(), &other)),
        }
    }

    fn config(&self) -> Value {
        to_config(self)
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(*self)
    }

    fn optimize(&self, _filter: &Expression, _order: EventOrder) -> OptimizeResult {
        let mut res = do_not_optimize(self.copy());
        res.replacement = vec![Box::new(self.as_slice())];
        res
    }
}
