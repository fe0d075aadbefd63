//! Element types flowing between operators.
//!
//! Design intent:
//! - `ElementType` is the runtime tag used for type checking and for picking
//!   a monomorphic implementation once, at instantiation time.
//! - `Element` is the compile-time side of the same tag; execution nodes and
//!   operator inner loops are generic over it.
//! - `Payload` is what actually crosses a link between two nodes. `Void`
//!   never does.

use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::EventBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Void,
    Bytes,
    Events,
}

impl ElementType {
    pub const ALL: [ElementType; 3] = [ElementType::Void, ElementType::Bytes, ElementType::Events];
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ElementType::Void => "void",
            ElementType::Bytes => "bytes",
            ElementType::Events => "events",
        };
        f.write_str(s)
    }
}

/// Immutable, cheaply cloneable byte chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<u8>", into = "Vec<u8>")]
pub struct Chunk {
    data: Arc<Vec<u8>>,
    range: Range<usize>,
}

impl Chunk {
    pub fn new(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            data: Arc::new(data),
            range: 0..len,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.range.clone()]
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Sub-chunk sharing the same buffer; `begin`/`end` are clamped.
    pub fn slice(&self, begin: usize, end: usize) -> Self {
        let end = end.min(self.len());
        let begin = begin.min(end);
        Self {
            data: Arc::clone(&self.data),
            range: self.range.start + begin..self.range.start + end,
        }
    }
}

impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(data: Vec<u8>) -> Self {
        Chunk::new(data)
    }
}

impl From<Chunk> for Vec<u8> {
    fn from(chunk: Chunk) -> Self {
        chunk.as_slice().to_vec()
    }
}

/// An element on the wire between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Payload {
    Bytes(Chunk),
    Events(EventBatch),
}

impl Payload {
    pub fn element_type(&self) -> ElementType {
        match self {
            Payload::Bytes(_) => ElementType::Bytes,
            Payload::Events(_) => ElementType::Events,
        }
    }
}

/// Compile-time view of an element type.
///
/// `size` is the unit demand is counted in: rows for events, bytes for
/// chunks. An element of size zero carries no data and marks a suspension
/// point.
pub trait Element: Clone + Default + Send + 'static {
    const TYPE: ElementType;

    fn size(&self) -> u64;

    fn approx_bytes(&self) -> u64;

    fn schema_name(&self) -> Option<&str> {
        None
    }

    /// Split into the first `n` units and the rest.
    fn split_at(self, n: u64) -> (Self, Self);

    fn into_payload(self) -> Option<Payload>;

    fn from_payload(payload: Payload) -> Option<Self>;
}

impl Element for () {
    const TYPE: ElementType = ElementType::Void;

    fn size(&self) -> u64 {
        0
    }

    fn approx_bytes(&self) -> u64 {
        0
    }

    fn split_at(self, _n: u64) -> (Self, Self) {
        ((), ())
    }

    fn into_payload(self) -> Option<Payload> {
        None
    }

    fn from_payload(_payload: Payload) -> Option<Self> {
        None
    }
}

impl Element for Chunk {
    const TYPE: ElementType = ElementType::Bytes;

    fn size(&self) -> u64 {
        self.len() as u64
    }

    fn approx_bytes(&self) -> u64 {
        self.len() as u64
    }

    fn split_at(self, n: u64) -> (Self, Self) {
        let n = usize::try_from(n).unwrap_or(usize::MAX).min(self.len());
        (self.slice(0, n), self.slice(n, self.len()))
    }

    fn into_payload(self) -> Option<Payload> {
        Some(Payload::Bytes(self))
    }

    fn from_payload(payload: Payload) -> Option<Self> {
        match payload {
            Payload::Bytes(chunk) => Some(chunk),
            Payload::Events(_) => None,
        }
    }
}

impl Element for EventBatch {
    const TYPE: ElementType = ElementType::Events;

    fn size(&self) -> u64 {
        self.rows() as u64
    }

    fn approx_bytes(&self) -> u64 {
        EventBatch::approx_bytes(self)
    }

    fn schema_name(&self) -> Option<&str> {
        Some(&self.schema().name)
    }

    fn split_at(self, n: u64) -> (Self, Self) {
        EventBatch::split_at(self, usize::try_from(n).unwrap_or(usize::MAX))
    }

    fn into_payload(self) -> Option<Payload> {
        Some(Payload::Events(self))
    }

    fn from_payload(payload: Payload) -> Option<Self> {
        match payload {
            Payload::Events(batch) => Some(batch),
            Payload::Bytes(_) => None,
        }
    }
}
