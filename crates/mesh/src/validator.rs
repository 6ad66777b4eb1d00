//! Broadcast-time block validation.
//!
//! Replicas consult a [`BlockValidator`] before fanning a candidate out.
//! The default accepts everything; signature or double-spend checks plug in
//! here.

use blockmesh_core::Block;

/// Decides whether a queued candidate may be broadcast
pub trait BlockValidator: Send {
    fn validate(&self, block: &Block) -> bool;
}

/// Accepts every candidate
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl BlockValidator for AcceptAll {
    fn validate(&self, _block: &Block) -> bool {
        true
    }
}
