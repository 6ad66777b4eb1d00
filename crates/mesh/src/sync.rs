//! DAG index and chain walking over a node's block directory.
//!
//! All traversals are iterative: an explicit work list plus a visited set,
//! so chain length never grows the call stack.

use blockmesh_core::{genesis, is_genesis, short_hash, Block, BlockHash};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{MeshError, MeshResult};

/// Set of block hashes reachable from a head map, GENESIS included
pub type BlockIndex = BTreeSet<BlockHash>;

/// Breadth-first walk from every head back to GENESIS.
///
/// Blocks that cannot be loaded from `dir` are left out of the index (and
/// their ancestors are only reached through other paths).
pub fn build_index<'a, I>(dir: &Path, heads: I) -> BlockIndex
where
    I: IntoIterator<Item = &'a BlockHash>,
{
    let mut index = BlockIndex::new();
    index.insert(genesis().to_string());

    let mut unloadable: HashSet<BlockHash> = HashSet::new();
    let mut work: VecDeque<BlockHash> = heads.into_iter().cloned().collect();

    while let Some(hash) = work.pop_front() {
        if index.contains(&hash) || unloadable.contains(&hash) {
            continue;
        }

        match Block::load_from(dir, &hash) {
            Ok(block) => {
                for parent in block.parents().values() {
                    if !index.contains(parent) {
                        work.push_back(parent.clone());
                    }
                }
                index.insert(hash);
            }
            Err(e) => {
                warn!(
                    dir = %dir.display(),
                    hash = %short_hash(&hash),
                    error = %e,
                    "Unloadable block during index walk"
                );
                unloadable.insert(hash);
            }
        }
    }

    index
}

/// Hashes present in `peer` but absent from `own`
pub fn missing_blocks(own: &BlockIndex, peer: &BlockIndex) -> Vec<BlockHash> {
    peer.difference(own)
        .filter(|hash| !is_genesis(hash))
        .cloned()
        .collect()
}

/// Copy blocks by hash from one node directory to another.
///
/// Returns the copied blocks.
pub fn fetch_blocks(from: &Path, to: &Path, hashes: &[BlockHash]) -> MeshResult<Vec<Block>> {
    let mut fetched = Vec::with_capacity(hashes.len());
    for hash in hashes {
        let block = Block::load_from(from, hash)?;
        block.persist(to)?;
        debug!(hash = %short_hash(hash), from = %from.display(), "Fetched block");
        fetched.push(block);
    }
    Ok(fetched)
}

/// Walk the chain of `address` from `head` back to GENESIS.
///
/// Returns the number of blocks on the chain. Fails if a block is missing,
/// has no parent entry for `address`, or the walk revisits a hash.
pub fn walk_chain(dir: &Path, address: &str, head: &str) -> MeshResult<usize> {
    let mut visited: HashSet<BlockHash> = HashSet::new();
    let mut current = head.to_string();
    let mut length = 0usize;

    while !is_genesis(&current) {
        if !visited.insert(current.clone()) {
            return Err(MeshError::Validation(format!(
                "chain of {} loops at {}",
                address,
                short_hash(&current)
            )));
        }

        let block = Block::load_from(dir, &current)?;
        let parent = block.parent_of(address).ok_or_else(|| {
            MeshError::Validation(format!(
                "block {} has no parent entry for {}",
                short_hash(&current),
                address
            ))
        })?;

        current = parent.clone();
        length += 1;
    }

    Ok(length)
}
