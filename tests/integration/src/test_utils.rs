//! Test utilities for block mesh integration tests
//!
//! [`MeshFixture`] plays the driving harness: it owns the logical clock and
//! runs rounds in the required phase order (broadcast on every replica, then
//! commit on every replica).

use blockmesh_core::{logging, Address, LogicalClock, MeshConfig, Mode};
use blockmesh_mesh::{MeshResult, ParticipantHandle, PerformOutcome, ReplicaHandle};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Replicas, participants and a scratch directory for one simulation
pub struct MeshFixture {
    pub root: PathBuf,
    pub config: MeshConfig,
    pub clock: LogicalClock,
    pub replicas: Vec<ReplicaHandle>,
    pub participants: BTreeMap<Address, ParticipantHandle>,
}

impl MeshFixture {
    pub fn new(mode: Mode) -> Self {
        logging::try_init();

        let root = std::env::temp_dir().join(format!("blockmesh_it_{}", uuid::Uuid::new_v4()));
        let config = MeshConfig::with_data_dir(mode, &root);
        let clock = config.build_clock().expect("default clock config is valid");
        info!(root = %root.display(), mode = %mode, "Mesh fixture created");

        Self {
            root,
            config,
            clock,
            replicas: Vec::new(),
            participants: BTreeMap::new(),
        }
    }

    /// Fixture with `count` replicas named `stg_<i>`, all joined into one group
    pub fn with_group(mode: Mode, count: usize) -> Self {
        let mut fixture = Self::new(mode);
        for i in 0..count {
            fixture.add_replica(&format!("stg_{}", i));
        }
        fixture.join_all();
        fixture
    }

    pub fn add_replica(&mut self, name: &str) -> ReplicaHandle {
        let replica = ReplicaHandle::create(name, &self.config, self.clock.clone())
            .expect("Failed to create replica");
        self.replicas.push(replica.clone());
        replica
    }

    /// Create a participant and attach it to replica `index`
    pub fn add_participant(&mut self, address: &str, index: usize) -> ParticipantHandle {
        let participant =
            ParticipantHandle::create(&self.config, address, format!("sign-{}", address))
                .expect("Failed to create participant");
        participant
            .attach(&self.replicas[index])
            .expect("Failed to attach participant");
        self.participants
            .insert(address.to_string(), participant.clone());
        participant
    }

    /// Every replica after the first joins the first one's group
    pub fn join_all(&self) {
        for replica in self.replicas.iter().skip(1) {
            replica
                .join(&self.replicas[0])
                .expect("Failed to join replica group");
        }
    }

    pub fn replica(&self, index: usize) -> &ReplicaHandle {
        &self.replicas[index]
    }

    pub fn participant(&self, address: &str) -> &ParticipantHandle {
        &self.participants[address]
    }

    pub fn perform(&self, sender: &str, receivers: &[&str]) -> MeshResult<PerformOutcome> {
        self.participant(sender).perform(&addresses(receivers), None)
    }

    /// Broadcast phase on every available replica
    pub fn broadcast_all(&self) -> bool {
        let mut any = false;
        for replica in self.replicas.iter().filter(|r| r.is_available()) {
            any |= replica.step_broadcast().expect("broadcast failed");
        }
        any
    }

    /// Commit phase on every available replica; returns blocks committed
    /// by the first available one
    pub fn commit_all(&self) -> usize {
        let mut committed = None;
        for replica in self.replicas.iter().filter(|r| r.is_available()) {
            let count = replica.step_commit().expect("commit failed");
            committed.get_or_insert(count);
        }
        committed.unwrap_or(0)
    }

    /// One round: broadcast everywhere, commit everywhere, advance time.
    ///
    /// Returns false if nothing was broadcast.
    pub fn run_round(&self) -> bool {
        let broadcast = self.broadcast_all();
        let committed = self.commit_all();
        let time = self.clock.tick();
        debug!(time = time, committed = committed, broadcast = broadcast, "Round complete");
        broadcast
    }

    /// Run rounds until no replica has anything left to broadcast
    pub fn run_until_idle(&self, max_rounds: usize) -> usize {
        for round in 0..max_rounds {
            if !self.run_round() {
                return round;
            }
        }
        panic!("mesh still busy after {} rounds", max_rounds);
    }

    /// Number of block files a participant has persisted
    pub fn stored_blocks(&self, address: &str) -> usize {
        count_block_files(&self.participant(address).dir())
    }
}

impl Drop for MeshFixture {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.root).ok();
    }
}

pub fn addresses(items: &[&str]) -> Vec<Address> {
    items.iter().map(|a| a.to_string()).collect()
}

/// Block files in a node directory (the state file is skipped)
pub fn count_block_files(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|entry| entry.file_name() != blockmesh_core::STATE_FILE)
                .count()
        })
        .unwrap_or(0)
}
