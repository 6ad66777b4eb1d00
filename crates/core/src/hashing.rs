//! Block header hashing.
//! SECURITY: Uses BLAKE3 (256-bit).
//!
//! The content hash covers `{version, timestamp, parents}` only. The
//! transaction body is not part of the input, so two blocks with equal
//! timestamp and parent map share a hash.

use blake3::Hasher;
use std::collections::BTreeMap;

const HEADER_TAG: &[u8] = b"BLOCKMESH-HEADER-V1";
const GENESIS_TAG: &[u8] = b"BLOCKMESH-GENESIS-V1";

/// Hash a block header. Parents are fed in address order.
pub fn hash_header(version: &str, timestamp: u64, parents: &BTreeMap<String, String>) -> String {
    let mut hasher = Hasher::new();
    hasher.update(HEADER_TAG);
    update_str(&mut hasher, version);
    hasher.update(&timestamp.to_be_bytes());
    hasher.update(&(parents.len() as u64).to_be_bytes());
    for (address, parent) in parents {
        update_str(&mut hasher, address);
        update_str(&mut hasher, parent);
    }
    hex::encode(hasher.finalize().as_bytes())
}

/// Hash of the genesis sentinel header
pub fn hash_genesis_header(version: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(GENESIS_TAG);
    update_str(&mut hasher, version);
    hasher.update(&0u64.to_be_bytes());
    update_str(&mut hasher, "GENESIS");
    hex::encode(hasher.finalize().as_bytes())
}

// Length-prefixed so that ("ab", "c") and ("a", "bc") differ.
fn update_str(hasher: &mut Hasher, value: &str) {
    hasher.update(&(value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}
