//! JSON-lines printer and parser.
//!
//! `write_json` renders one object per event; `read_json` parses one object
//! per line, infers a schema from each object's keys and value types, and
//! groups consecutive rows of the same schema into one batch.
//!
//! The first structure seen is named after the configured schema; every
//! further distinct structure gets a numbered name (`json.2`, `json.3`, ...)
//! so per-schema state downstream never mixes them.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use flowline_core::diagnostic::Diagnostic;
use flowline_core::element::{Chunk, ElementType};
use flowline_core::error::{ConstructionError, OperatorError};
use flowline_core::schema::{Field, Schema};
use flowline_core::types::{EventBatch, Scalar};

use crate::control::Ctrl;
use crate::generator::{Input, OperatorInput, OperatorOutput, Output};
use crate::registry::{parse_config, to_config};
use crate::traits::{expect_input, unexpected_input, Operator};

const DEFAULT_SCHEMA: &str = "json";

fn scalar_to_json(value: &Scalar) -> Value {
    match value {
        Scalar::Null => Value::Null,
        Scalar::Bool(b) => Value::Bool(*b),
        Scalar::I64(i) | Scalar::Time(i) => Value::Number((*i).into()),
        Scalar::F64(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        Scalar::Str(s) => Value::String(s.clone()),
        Scalar::Bin(b) => Value::Array(b.iter().map(|x| Value::Number((*x).into())).collect()),
    }
}

pub(crate) fn json_to_scalar(value: &Value) -> Scalar {
    match value {
        Value::Null => Scalar::Null,
        Value::Bool(b) => Scalar::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Scalar::I64(i),
            None => n.as_f64().map(Scalar::F64).unwrap_or(Scalar::Null),
        },
        Value::String(s) => Scalar::Str(s.clone()),
        nested => Scalar::Str(nested.to_string()),
    }
}

/// Render a batch as JSON lines.
pub fn print_batch(batch: &EventBatch) -> Result<Vec<u8>, OperatorError> {
    let mut out = Vec::new();
    for row in 0..batch.rows() {
        let mut object = Map::new();
        for column in batch.columns() {
            if let Some(value) = column.values.get(row) {
                object.insert(column.name.clone(), scalar_to_json(value));
            }
        }
        serde_json::to_writer(&mut out, &Value::Object(object))
            .map_err(|e| OperatorError::Encoding(e.to_string()))?;
        out.push(b'\n');
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteJson;

impl WriteJson {
    pub fn from_config(_config: &Value) -> Result<Box<dyn Operator>, ConstructionError> {
        Ok(Box::new(WriteJson))
    }
}

impl Operator for WriteJson {
    fn name(&self) -> &'static str {
        "write_json"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        expect_input(self.name(), input, ElementType::Events, ElementType::Bytes)
    }

    fn instantiate(&self, input: OperatorInput, _ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        match input {
            OperatorInput::Events(input) => {
                let gen = input.map(|batch| print_batch(&batch).map(Chunk::new));
                Ok(OperatorOutput::Bytes(Box::new(gen)))
            }
            other => Err(unexpected_input(self.name(), &other)),
        }
    }

    fn config(&self) -> Value {
        Value::Object(Default::default())
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(WriteJson)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadJson {
    /// Base name of the inferred schemas.
    #[serde(default = "default_schema")]
    pub schema: String,
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

impl Default for ReadJson {
    fn default() -> Self {
        Self {
            schema: default_schema(),
        }
    }
}

impl ReadJson {
    pub fn from_config(config: &Value) -> Result<Box<dyn Operator>, ConstructionError> {
        let op: ReadJson = parse_config("read_json", config)?;
        if op.schema.is_empty() {
            return Err(ConstructionError::invalid("read_json", "schema name must not be empty"));
        }
        Ok(Box::new(op))
    }
}

/// Incremental line splitter plus row grouping.
struct LineParser {
    schema_name: String,
    /// Distinct structures in order of first appearance.
    seen: Vec<Arc<Schema>>,
    partial: Vec<u8>,
    line_no: usize,
    ctrl: Ctrl,
}

impl LineParser {
    fn feed(&mut self, chunk: &[u8], out: &mut VecDeque<EventBatch>) -> Result<(), OperatorError> {
        self.partial.extend_from_slice(chunk);
        let Some(last_newline) = self.partial.iter().rposition(|b| *b == b'\n') else {
            return Ok(());
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        self.parse_lines(&complete, out)
    }

    fn flush(&mut self, out: &mut VecDeque<EventBatch>) -> Result<(), OperatorError> {
        let rest = std::mem::take(&mut self.partial);
        self.parse_lines(&rest, out)
    }

    fn parse_lines(&mut self, bytes: &[u8], out: &mut VecDeque<EventBatch>) -> Result<(), OperatorError> {
        let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
        if bytes.is_empty() {
            return Ok(());
        }
        let mut group: Option<(Arc<Schema>, Vec<Vec<Scalar>>)> = None;
        for line in bytes.split(|b| *b == b'\n') {
            self.line_no += 1;
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let object = match serde_json::from_slice::<Value>(line) {
                Ok(Value::Object(object)) => object,
                Ok(_) => {
                    self.skip("expected a JSON object");
                    continue;
                }
                Err(e) => {
                    self.skip(&e.to_string());
                    continue;
                }
            };
            let fields: Vec<Field> = object
                .iter()
                .map(|(k, v)| Field::new(k.clone(), json_to_scalar(v).data_type(), true))
                .collect();
            let row: Vec<Scalar> = object.values().map(json_to_scalar).collect();
            match group.as_mut() {
                Some((schema, rows)) if schema.fields == fields => rows.push(row),
                _ => {
                    if let Some((schema, rows)) = group.take() {
                        out.push_back(build(schema, rows)?);
                    }
                    group = Some((self.schema_for(fields), vec![row]));
                }
            }
        }
        if let Some((schema, rows)) = group {
            out.push_back(build(schema, rows)?);
        }
        Ok(())
    }

    fn schema_for(&mut self, fields: Vec<Field>) -> Arc<Schema> {
        if let Some(schema) = self.seen.iter().find(|s| s.fields == fields) {
            return Arc::clone(schema);
        }
        let name = match self.seen.len() {
            0 => self.schema_name.clone(),
            n => format!("{}.{}", self.schema_name, n + 1),
        };
        let schema = Arc::new(Schema::new(name, fields));
        self.seen.push(Arc::clone(&schema));
        schema
    }

    fn skip(&self, reason: &str) {
        self.ctrl.warn(
            Diagnostic::warning("skipped malformed JSON line")
                .note(format!("line {}: {reason}", self.line_no)),
        );
    }
}

fn build(schema: Arc<Schema>, rows: Vec<Vec<Scalar>>) -> Result<EventBatch, OperatorError> {
    EventBatch::from_rows(schema, rows).map_err(|e| OperatorError::Schema(e.to_string()))
}

fn read_json(mut input: Input<Chunk>, schema: String, ctrl: Ctrl) -> Output<EventBatch> {
    let mut parser = LineParser {
        schema_name: schema,
        seen: Vec::new(),
        partial: Vec::new(),
        line_no: 0,
        ctrl,
    };
    let mut ready: VecDeque<EventBatch> = VecDeque::new();
    let mut done = false;
    Box::new(std::iter::from_fn(move || {
        if let Some(batch) = ready.pop_front() {
            return Some(Ok(batch));
        }
        if done {
            return None;
        }
        let result = match input.next() {
            Some(chunk) => parser.feed(chunk.as_slice(), &mut ready),
            None => {
                done = true;
                parser.flush(&mut ready)
            }
        };
        if let Err(e) = result {
            return Some(Err(e));
        }
        Some(Ok(ready.pop_front().unwrap_or_default()))
    }))
}

impl Operator for ReadJson {
    fn name(&self) -> &'static str {
        "read_json"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        expect_input(self.name(), input, ElementType::Bytes, ElementType::Events)
    }

    fn instantiate(&self, input: OperatorInput, ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        match input {
            OperatorInput::Bytes(input) => Ok(OperatorOutput::Events(read_json(
                input,
                self.schema.clone(),
                ctrl,
            ))),
            other => Err(unexpected_input(self.name(), &other)),
        }
    }

    fn config(&self) -> Value {
        to_config(self)
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}
