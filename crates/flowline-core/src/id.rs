//! Strongly-typed identifiers used across the engine.
//!
//! Downstream crates should *not* pass raw integers around for operator
//! positions or links.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! new_id {
    ($name:ident, $label:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $label, self.0)
            }
        }
    };
}

new_id!(OperatorIndex, "op");
new_id!(LinkId, "link");

impl OperatorIndex {
    pub fn from_position(i: usize) -> Self {
        Self(i as u64)
    }

    pub fn position(self) -> usize {
        self.0 as usize
    }
}

/// Globally unique identifier of one executor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}
