//! Node state files.
//!
//! Each node keeps a single JSON document named [`STATE_FILE`] inside its own
//! directory, next to the block files it has persisted.
//!
//! ```text
//! replica:     { "mode", "heads": {address: hash}, "queue", "blockCount" }
//! participant: { "head", "address", "sign", "mode" }
//! ```

use blockmesh_core::{Address, BlockHash, Mode, SignToken, STATE_FILE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{MeshError, MeshResult};

/// Persisted replica state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaState {
    pub mode: Mode,
    pub heads: BTreeMap<Address, BlockHash>,
    /// Mode-specific queue snapshot
    pub queue: Value,
    #[serde(rename = "blockCount")]
    pub block_count: u64,
}

/// Persisted participant state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantState {
    pub head: BlockHash,
    pub address: Address,
    pub sign: SignToken,
    pub mode: Mode,
}

/// Path of the state file inside a node directory
pub fn state_path(dir: &Path) -> PathBuf {
    dir.join(STATE_FILE)
}

/// Write `state` into `dir`, replacing any previous state file
pub fn write_state<T: Serialize>(dir: &Path, state: &T) -> MeshResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = state_path(dir);
    fs::write(&path, serde_json::to_string_pretty(state)?)?;
    debug!(path = %path.display(), "State saved");
    Ok(path)
}

/// Read the state file from `dir`
pub fn read_state<T: DeserializeOwned>(dir: &Path) -> MeshResult<T> {
    let path = state_path(dir);
    if !path.is_file() {
        return Err(MeshError::Validation(format!(
            "no state file at {}",
            path.display()
        )));
    }
    let json = fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&json)?)
}
