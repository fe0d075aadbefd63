//! Run manifest: what ran, where, and how it ended.
//!
//! The executor fills one in per run and hands it back with the run report,
//! so callers can correlate diagnostics (tagged with the run id) with the
//! exact pipeline that produced them.

use serde::{Deserialize, Serialize};

use crate::hash::Hash256;
use crate::id::RunId;
use crate::location::Placement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Finished,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub placement: Placement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: RunId,

    /// Fingerprint of the pipeline as spawned (after optimization).
    pub pipeline_hash: Hash256,

    /// Engine version string for provenance.
    pub engine_version: String,

    pub operators: Vec<ManifestEntry>,

    pub state: RunState,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,
}

impl RunManifest {
    pub fn new(
        run_id: RunId,
        pipeline_hash: Hash256,
        operators: Vec<ManifestEntry>,
        started_ms: u64,
    ) -> Self {
        Self {
            run_id,
            pipeline_hash,
            engine_version: crate::VERSION.to_string(),
            operators,
            state: RunState::Running,
            started_ms,
            finished_ms: started_ms,
        }
    }

    pub fn finish(mut self, state: RunState, finished_ms: u64) -> Self {
        self.state = state;
        self.finished_ms = finished_ms;
        self
    }
}
