//! Core data model for the block mesh protocol.
//!
//! This crate provides the transaction and block types, content hashing,
//! the shared logical clock, configuration and logging bootstrap used by
//! every replica and participant.

pub mod block;
pub mod clock;
pub mod config;
pub mod error;
pub mod hashing;
pub mod logging;
pub mod transaction;
pub mod types;

pub use block::{block_path, Approval, Block, BlockHeader, BlockRecord};
pub use clock::LogicalClock;
pub use config::{ClockConfig, LoggingConfig, MeshConfig, StorageConfig};
pub use error::{Error, Result};
pub use transaction::Transaction;
pub use types::{
    genesis, is_genesis, short_hash, Address, BlockHash, Mode, SignToken, PROTOCOL_VERSION,
    STATE_FILE,
};
