//! Where operators may run, and where they were put.

use serde::{Deserialize, Serialize};

/// Affinity an operator declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    /// Must run in the client process.
    Local,
    /// Must run in the server process.
    Remote,
    /// Runs wherever its predecessor runs.
    Anywhere,
}

impl Location {
    pub fn admits(self, placement: Placement) -> bool {
        match self {
            Location::Local => placement == Placement::Client,
            Location::Remote => placement == Placement::Server,
            Location::Anywhere => true,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Location::Local => "local",
            Location::Remote => "remote",
            Location::Anywhere => "anywhere",
        })
    }
}

/// Process an execution node was actually spawned in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Client,
    Server,
}

impl std::fmt::Display for Placement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Placement::Client => "client",
            Placement::Server => "server",
        })
    }
}
