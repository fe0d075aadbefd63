//! The operators every registry knows about.

pub use crate::concept::MatchConcept;
pub use crate::delay::{Delay, Pass};
pub use crate::fail::FailAfter;
pub use crate::filter::Where;
pub use crate::head::{Head, Limit, LimitState};
pub use crate::json::{ReadJson, WriteJson};
pub use crate::sink::{Collect, Collector, Discard};
pub use crate::slice::{Slice, Tail};
pub use crate::source::{FromBytes, FromEvents};

use crate::registry::Registry;

pub fn register(registry: &mut Registry) {
    registry
        .register("from_events", FromEvents::from_config)
        .register("from_bytes", FromBytes::from_config)
        .register("head", Head::from_config)
        .register("limit", Limit::from_config)
        .register("slice", Slice::from_config)
        .register("tail", Tail::from_config)
        .register("where", Where::from_config)
        .register("pass", Pass::from_config)
        .register("delay", Delay::from_config)
        .register("discard", Discard::from_config)
        .register("collect", Collect::from_config)
        .register("write_json", WriteJson::from_config)
        .register("read_json", ReadJson::from_config)
        .register("fail_after", FailAfter::from_config)
        .register("match_concept", MatchConcept::from_config);
}
