//! Core types shared by every node of a block mesh.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::Error;
use crate::hashing::hash_genesis_header;

/// Participant identity within the mesh
pub type Address = String;

/// Opaque signature token a participant places on a transaction
pub type SignToken = String;

/// Hex-encoded content hash of a persisted block
pub type BlockHash = String;

/// Protocol version stamped into every block header
pub const PROTOCOL_VERSION: &str = "0.01";

/// Version string used only for the genesis sentinel
pub const GENESIS_VERSION: &str = "0.01a";

/// Name of the per-node state file inside its directory
pub const STATE_FILE: &str = "HEAD";

/// Hash of the well-known root every participant chain traces back to.
///
/// The sentinel is never persisted; index walks and chain verification stop
/// when they reach it.
pub fn genesis() -> &'static str {
    static GENESIS: OnceLock<BlockHash> = OnceLock::new();
    GENESIS.get_or_init(|| hash_genesis_header(GENESIS_VERSION))
}

/// Returns true if `hash` is the genesis sentinel
pub fn is_genesis(hash: &str) -> bool {
    hash == genesis()
}

/// Shortened hash for log output
pub fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Protocol variant, selected once per simulation.
///
/// The variant decides the admission strategy of every replica and whether
/// participants are rate-limited to one block in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// FIFO admission, one replica per submission
    Classic,
    /// Acknowledgement-counted admission with accelerated fan-out
    Modified,
}

impl Mode {
    /// Stable textual name, also used in state files
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Classic => "Classic",
            Mode::Modified => "Modified",
        }
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Classic
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Classic" | "classic" => Ok(Mode::Classic),
            "Modified" | "modified" => Ok(Mode::Modified),
            other => Err(Error::Validation(format!("unknown mode: {}", other))),
        }
    }
}
