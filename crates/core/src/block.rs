//! Content-addressed blocks.
//!
//! A block wraps a fully signed transaction. Its identity is the hash of
//! `{version, timestamp, parents}`; parents are assigned by the committing
//! replica, one entry per transaction participant.
//!
//! # On-disk format
//!
//! One file per block, named by its content hash:
//!
//! ```text
//! { "header": { "version", "timestamp", "parents": {address: hash} },
//!   "transaction": { "send", "participants": {address: signature|null}, "data" } }
//! ```
//!
//! Files are written once and never rewritten. Anything found on disk is
//! assumed to have been approved before it was persisted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::hashing::hash_header;
use crate::transaction::Transaction;
use crate::types::{short_hash, Address, BlockHash, PROTOCOL_VERSION};

/// Broadcast-time verdict on a candidate block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Approval {
    /// Not yet inspected
    #[default]
    Pending,
    /// Passed validation, may be persisted
    Approved,
    /// Failed validation, discarded
    Rejected,
}

/// Header portion of the on-disk record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: String,
    pub timestamp: u64,
    pub parents: BTreeMap<Address, BlockHash>,
}

/// Serialized form of a block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRecord {
    pub header: BlockHeader,
    pub transaction: Transaction,
}

/// Immutable envelope around a ready transaction
#[derive(Debug, Clone)]
pub struct Block {
    version: String,
    timestamp: u64,
    parents: BTreeMap<Address, BlockHash>,
    transaction: Transaction,
    approval: Approval,
}

impl Block {
    /// Wrap a ready transaction with no parents assigned yet
    pub fn new(transaction: Transaction, timestamp: u64) -> Result<Self> {
        Self::with_parents(transaction, timestamp, BTreeMap::new())
    }

    /// Wrap a ready transaction with an initial parent map
    pub fn with_parents(
        transaction: Transaction,
        timestamp: u64,
        parents: BTreeMap<Address, BlockHash>,
    ) -> Result<Self> {
        if !transaction.is_ready() {
            return Err(Error::NotReady(format!(
                "could not create block for unsigned {} (missing: {:?}, time: {})",
                transaction,
                transaction.unsigned(),
                timestamp
            )));
        }

        let mut block = Self {
            version: PROTOCOL_VERSION.to_string(),
            timestamp,
            parents: BTreeMap::new(),
            transaction,
            approval: Approval::Pending,
        };
        block.set_parents(parents)?;
        Ok(block)
    }

    /// Deterministic identity over `{version, timestamp, parents}`
    pub fn content_hash(&self) -> BlockHash {
        hash_header(&self.version, self.timestamp, &self.parents)
    }

    /// Merge parent entries. Every key must be a transaction participant.
    pub fn set_parents(&mut self, parents: BTreeMap<Address, BlockHash>) -> Result<()> {
        if let Some(unknown) = parents
            .keys()
            .find(|addr| !self.transaction.has_participant(addr))
        {
            return Err(Error::UnknownParticipant {
                address: unknown.clone(),
            });
        }
        self.parents.extend(parents);
        Ok(())
    }

    pub fn parents(&self) -> &BTreeMap<Address, BlockHash> {
        &self.parents
    }

    pub fn parent_of(&self, address: &str) -> Option<&BlockHash> {
        self.parents.get(address)
    }

    pub fn participants(&self) -> Vec<Address> {
        self.transaction.participants()
    }

    pub fn participant_count(&self) -> usize {
        self.transaction.participant_count()
    }

    pub fn sender(&self) -> &str {
        self.transaction.sender()
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn approval(&self) -> Approval {
        self.approval
    }

    pub fn is_approved(&self) -> bool {
        self.approval == Approval::Approved
    }

    pub fn approve(&mut self) {
        self.approval = Approval::Approved;
    }

    pub fn reject(&mut self) {
        self.approval = Approval::Rejected;
    }

    /// Reset the verdict, e.g. for a candidate restored from a queue snapshot
    pub fn clear_approval(&mut self) {
        self.approval = Approval::Pending;
    }

    pub fn to_record(&self) -> BlockRecord {
        BlockRecord {
            header: BlockHeader {
                version: self.version.clone(),
                timestamp: self.timestamp,
                parents: self.parents.clone(),
            },
            transaction: self.transaction.clone(),
        }
    }

    /// Rebuild a block from its record. The verdict starts as `Pending`.
    pub fn from_record(record: BlockRecord) -> Result<Self> {
        let BlockRecord {
            header,
            transaction,
        } = record;
        let mut block = Self::with_parents(transaction, header.timestamp, header.parents)?;
        block.version = header.version;
        Ok(block)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_record())?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let record: BlockRecord = serde_json::from_str(json)?;
        Self::from_record(record)
    }

    /// Write the block into `dir` under its content hash.
    ///
    /// Returns the hash (which is also the file name). An existing file with
    /// that name is left untouched.
    pub fn persist(&self, dir: impl AsRef<Path>) -> Result<BlockHash> {
        let hash = self.content_hash();
        if !self.is_approved() {
            return Err(Error::NotApproved { hash });
        }

        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let path = dir.join(&hash);
        if path.exists() {
            debug!(hash = %short_hash(&hash), dir = %dir.display(), "Block already persisted");
            return Ok(hash);
        }

        fs::write(&path, self.to_json()?)?;
        debug!(hash = %short_hash(&hash), dir = %dir.display(), "Block persisted");
        Ok(hash)
    }

    /// Load a persisted block. Loaded blocks are marked approved.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("could not load block: {} is not a file", path.display()),
            )));
        }

        let json = fs::read_to_string(path)?;
        let mut block = Self::from_json(&json)?;
        block.approval = Approval::Approved;
        Ok(block)
    }

    /// Load the block named `hash` from `dir`
    pub fn load_from(dir: impl AsRef<Path>, hash: &str) -> Result<Self> {
        Self::load(block_path(dir, hash))
    }
}

/// Path of the file holding block `hash` inside `dir`
pub fn block_path(dir: impl AsRef<Path>, hash: &str) -> PathBuf {
    dir.as_ref().join(hash)
}

/// Candidate identity: same version, timestamp and transaction.
///
/// Parents and verdict are deliberately ignored so a queued candidate matches
/// the copy that was committed with parents assigned.
impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.timestamp == other.timestamp
            && self.transaction == other.transaction
    }
}
