//! Block mesh replication engine.
//!
//! Replicas (storage nodes) and participants (user nodes) cooperating to
//! build a DAG of blocks, one causal chain per participant address.
//!
//! # Core Components
//!
//! - **Replica**: queue, broadcast and commit pipeline, resync on recovery
//! - **Admission**: Classic (FIFO) and Modified (acknowledgement-counted)
//!   candidate handling
//! - **Participant**: transaction origination, co-signing, local chain
//! - **Sync**: DAG index and chain walks over node directories
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use blockmesh_core::{LogicalClock, MeshConfig, Mode};
//! use blockmesh_mesh::{ParticipantHandle, ReplicaHandle};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MeshConfig::with_data_dir(Mode::Classic, "/tmp/blockmesh");
//! let clock = config.build_clock()?;
//!
//! let replica = ReplicaHandle::create("stg_0", &config, clock.clone())?;
//! let alice = ParticipantHandle::create(&config, "user0", "sign0")?;
//! let bob = ParticipantHandle::create(&config, "user1", "sign1")?;
//! alice.attach(&replica)?;
//! bob.attach(&replica)?;
//!
//! alice.perform(&["user1".to_string()], None)?;
//! replica.step_broadcast()?;
//! replica.step_commit()?;
//! clock.tick();
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod error;
pub mod participant;
pub mod replica;
pub mod state;
pub mod sync;
pub mod validator;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use admission::{for_mode, AdmissionStrategy, ClassicAdmission, ModifiedAdmission};
pub use error::{MeshError, MeshResult};
pub use participant::{ParticipantHandle, PerformOutcome, WeakParticipant};
pub use replica::{ReplicaHandle, WeakReplica};
pub use state::{ParticipantState, ReplicaState};
pub use sync::{build_index, walk_chain, BlockIndex};
pub use validator::{AcceptAll, BlockValidator};

/// Actor locks recover from poisoning instead of panicking
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
