//! Stable hashing for pipeline fingerprints and run manifests.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Hash256(blake3::hash(bytes).into())
    }

    /// Hash any serde-serializable value deterministically (via JSON).
    pub fn of_serde<T: Serialize>(v: &T) -> Result<Self, crate::error::Error> {
        let bytes = serde_json::to_vec(v)?;
        Ok(Self::of_bytes(&bytes))
    }

    pub fn to_hex(&self) -> String {
        use std::fmt::Write as _;
        self.0.iter().fold(String::with_capacity(64), |mut s, b| {
            let _ = write!(&mut s, "{b:02x}");
            s
        })
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}
