//! Read-only view of the schemas and concepts known to the deployment.
//!
//! The engine never asks *how* a catalog knows what it knows; it takes a
//! snapshot before a run starts and hands it to operators.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::schema::Schema;

/// Concept name → field names it maps to (e.g. `net.src.ip` → `src_ip`, `id.orig_h`).
pub type Concepts = BTreeMap<String, Vec<String>>;

pub trait Catalog: Send + Sync {
    fn schemas(&self) -> Vec<Arc<Schema>>;

    fn concepts(&self) -> Concepts;
}

/// Fixed catalog content.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    pub schemas: Vec<Arc<Schema>>,
    pub concepts: Concepts,
}

impl StaticCatalog {
    pub fn new(schemas: Vec<Arc<Schema>>, concepts: Concepts) -> Self {
        Self { schemas, concepts }
    }
}

impl Catalog for StaticCatalog {
    fn schemas(&self) -> Vec<Arc<Schema>> {
        self.schemas.clone()
    }

    fn concepts(&self) -> Concepts {
        self.concepts.clone()
    }
}
