//! Error types for replica and participant operations.
//!
//! Lookup outcomes are kept distinct: `NotFound` means every peer answered
//! and none holds the participant, `Inconclusive` means a peer that might
//! hold it could not be asked.

use thiserror::Error;

/// Errors that can occur in mesh operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Operation attempted on a disabled replica
    #[error("Replica {replica} is unavailable")]
    Unavailable { replica: String },

    /// Participant head disagrees with the replica group's record
    #[error("State conflict for {address}: recorded head {recorded}, supplied head {supplied}")]
    StateConflict {
        address: String,
        recorded: String,
        supplied: String,
    },

    /// No replica in the group has the participant
    #[error("Participant not found: {address}")]
    NotFound { address: String },

    /// Lookup could not complete because a peer was unavailable
    #[error("Lookup of {address} inconclusive: peer {peer} unavailable")]
    Inconclusive { address: String, peer: String },

    /// Replica is already part of a group
    #[error("Replica {replica} already joined a block mesh")]
    AlreadyJoined { replica: String },

    /// Resync found no available peer to reconcile against
    #[error("Replica {replica} has no available peer to resync from")]
    NoAvailablePeer { replica: String },

    /// Parent hash assigned by the replica does not match the participant head
    #[error("Chain integrity violation for {address}: block parent {parent}, local head {head}")]
    ChainIntegrity {
        address: String,
        parent: String,
        head: String,
    },

    /// Resync post-check mismatch; the replica is disabled again
    #[error("Replica {replica} inconsistent after resync: {detail}")]
    Inconsistent { replica: String, detail: String },

    /// Participant used before being attached to a replica
    #[error("Participant {address} is not attached to a replica")]
    Uninitialized { address: String },

    /// Bad arguments
    #[error("Validation error: {0}")]
    Validation(String),

    /// Data model errors
    #[error(transparent)]
    Core(#[from] blockmesh_core::Error),

    /// Filesystem errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// State file errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;
