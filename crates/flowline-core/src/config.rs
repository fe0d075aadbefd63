//! Engine configuration that downstream crates can serialize/deserialize.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::element::ElementType;
use crate::error::{Error, Result};

/// How much input a node keeps requested from its upstream.
///
/// Sizes are in the element type's unit (rows for events, bytes for chunks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandSettings {
    /// Only ask for more once at least this much can be requested.
    pub min_elements: u64,
    /// Upper bound for buffered + outstanding input.
    pub max_elements: u64,
    /// Upper bound for the number of buffered input batches.
    pub max_batches: u64,
}

impl DemandSettings {
    pub const EVENTS: DemandSettings = DemandSettings {
        min_elements: 8 * 1024,
        max_elements: 254 * 1024,
        max_batches: 20,
    };

    pub const BYTES: DemandSettings = DemandSettings {
        min_elements: 128 * 1024,
        max_elements: 4 * 1024 * 1024,
        max_batches: 20,
    };

    fn validate(&self, what: &str) -> Result<()> {
        if self.max_elements == 0 || self.max_batches == 0 {
            return Err(Error::Config(format!("{what}: limits must be positive")));
        }
        if self.min_elements > self.max_elements {
            return Err(Error::Config(format!(
                "{what}: min_elements ({}) exceeds max_elements ({})",
                self.min_elements, self.max_elements
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub events_demand: DemandSettings,
    pub bytes_demand: DemandSettings,

    /// Backoff for sources that stall without registering a wake-up.
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_rate: f64,

    /// Period of runtime-collected operator metrics.
    pub metrics_interval_ms: u64,

    /// Run the optimizer before spawning nodes.
    pub optimize: bool,
    pub max_optimizer_passes: usize,

    /// Upgrade operator warnings to errors.
    pub strict: bool,

    /// Upper bound for the spawn barrier.
    pub start_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            events_demand: DemandSettings::EVENTS,
            bytes_demand: DemandSettings::BYTES,
            min_backoff_ms: 30,
            max_backoff_ms: 1_000,
            backoff_rate: 2.0,
            metrics_interval_ms: 1_000,
            optimize: true,
            max_optimizer_passes: 8,
            strict: false,
            start_timeout_ms: 10_000,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `FLOWLINE_EVENTS_MIN` / `FLOWLINE_EVENTS_MAX`: event demand window (rows)
    /// - `FLOWLINE_BYTES_MIN` / `FLOWLINE_BYTES_MAX`: byte demand window
    /// - `FLOWLINE_MAX_BATCHES`: buffered batch limit (both element types)
    /// - `FLOWLINE_METRICS_INTERVAL_MS`: metrics period
    /// - `FLOWLINE_OPTIMIZE`: `0`/`false` disables the optimizer
    /// - `FLOWLINE_MAX_OPTIMIZER_PASSES`: fixpoint pass bound
    /// - `FLOWLINE_STRICT`: `1`/`true` upgrades warnings to errors
    /// - `FLOWLINE_START_TIMEOUT_MS`: spawn barrier timeout
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_parse::<u64>("FLOWLINE_EVENTS_MIN") {
            cfg.events_demand.min_elements = v;
        }
        if let Some(v) = env_parse::<u64>("FLOWLINE_EVENTS_MAX") {
            cfg.events_demand.max_elements = v;
        }
        if let Some(v) = env_parse::<u64>("FLOWLINE_BYTES_MIN") {
            cfg.bytes_demand.min_elements = v;
        }
        if let Some(v) = env_parse::<u64>("FLOWLINE_BYTES_MAX") {
            cfg.bytes_demand.max_elements = v;
        }
        if let Some(v) = env_parse::<u64>("FLOWLINE_MAX_BATCHES") {
            cfg.events_demand.max_batches = v;
            cfg.bytes_demand.max_batches = v;
        }
        if let Some(v) = env_parse::<u64>("FLOWLINE_METRICS_INTERVAL_MS") {
            cfg.metrics_interval_ms = v;
        }
        if let Some(v) = env_flag("FLOWLINE_OPTIMIZE") {
            cfg.optimize = v;
        }
        if let Some(v) = env_parse::<usize>("FLOWLINE_MAX_OPTIMIZER_PASSES") {
            cfg.max_optimizer_passes = v;
        }
        if let Some(v) = env_flag("FLOWLINE_STRICT") {
            cfg.strict = v;
        }
        if let Some(v) = env_parse::<u64>("FLOWLINE_START_TIMEOUT_MS") {
            cfg.start_timeout_ms = v;
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        self.events_demand.validate("events_demand")?;
        self.bytes_demand.validate("bytes_demand")?;
        if self.min_backoff_ms > self.max_backoff_ms {
            return Err(Error::Config("min_backoff_ms exceeds max_backoff_ms".into()));
        }
        if self.backoff_rate < 1.0 {
            return Err(Error::Config("backoff_rate must be at least 1".into()));
        }
        if self.metrics_interval_ms == 0 {
            return Err(Error::Config("metrics_interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Demand window for inputs of `ty`; `None` for void.
    pub fn demand_for(&self, ty: ElementType) -> Option<DemandSettings> {
        match ty {
            ElementType::Void => None,
            ElementType::Bytes => Some(self.bytes_demand),
            ElementType::Events => Some(self.events_demand),
        }
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    /// Backoff after `idle_runs` consecutive stalls.
    pub fn backoff(&self, idle_runs: u32) -> Duration {
        let factor = self.backoff_rate.powi(idle_runs.min(32) as i32);
        let ms = (self.min_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    let s = std::env::var(key).ok()?;
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
