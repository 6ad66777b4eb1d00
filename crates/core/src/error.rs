//! Error types for the block mesh data model.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transaction is not ready: {0}")]
    NotReady(String),

    #[error("Unknown participant: {address}")]
    UnknownParticipant { address: String },

    #[error("Participant {address} already signed")]
    AlreadySigned { address: String },

    #[error("Block {hash} is not approved and can't be persisted")]
    NotApproved { hash: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
