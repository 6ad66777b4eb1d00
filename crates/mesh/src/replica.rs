//! Replica (storage node) consensus engine.
//!
//! A replica keeps a full copy of the block mesh: the blocks it has
//! committed, the head of every participant chain, and a candidate pipeline
//! driven in two phases per round.
//!
//! 1. [`ReplicaHandle::step_broadcast`] validates the queue front and fans
//!    it out to the shared candidate set of every available group member.
//! 2. [`ReplicaHandle::step_commit`] orders the round's candidates by
//!    timestamp, commits every candidate whose participants are still
//!    unclaimed in this pass, and notifies local participants.
//!
//! The driver must finish step 2 on every replica before step 1 of the next
//! round starts anywhere in the group.
//!
//! # Locking
//!
//! A replica never holds its own lock while locking another replica:
//! group-wide work copies what it needs, releases the guard, then visits
//! each peer in turn. A replica may lock its own participants while
//! locked. Participants never hold their own lock while calling into a
//! replica.

use blockmesh_core::{
    genesis, is_genesis, short_hash, Address, Block, BlockHash, LogicalClock, MeshConfig, Mode,
};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, error, info, warn};

use crate::admission::{for_mode, AdmissionStrategy};
use crate::error::{MeshError, MeshResult};
use crate::lock;
use crate::participant::{ParticipantHandle, WeakParticipant};
use crate::state::{read_state, write_state, ReplicaState};
use crate::sync::{build_index, fetch_blocks, missing_blocks};
use crate::validator::{AcceptAll, BlockValidator};

/// Replica state. Only reachable through a [`ReplicaHandle`].
pub(crate) struct Replica {
    name: String,
    mode: Mode,
    dir: PathBuf,
    clock: LogicalClock,
    admission: Box<dyn AdmissionStrategy>,
    validator: Box<dyn BlockValidator>,
    /// Current head of every participant chain known to the group
    heads: BTreeMap<Address, BlockHash>,
    /// Participants attached to this replica
    participants: BTreeMap<Address, WeakParticipant>,
    /// Other members of the replica group
    peers: Vec<WeakReplica>,
    /// Committed blocks, GENESIS included
    block_count: u64,
    available: bool,
}

impl Replica {
    fn ensure_available(&self) -> MeshResult<()> {
        if self.available {
            Ok(())
        } else {
            Err(MeshError::Unavailable {
                replica: self.name.clone(),
            })
        }
    }

    fn peer_handles(&self) -> Vec<ReplicaHandle> {
        self.peers.iter().filter_map(WeakReplica::upgrade).collect()
    }

    /// Local participant still attached to this replica
    fn local_participant(&self, address: &str) -> Option<ParticipantHandle> {
        self.participants
            .get(address)
            .and_then(WeakParticipant::upgrade)
            .filter(|participant| participant.is_attached_to(&self.name))
    }

    fn mark_inconsistent(&mut self, detail: String) -> MeshError {
        self.available = false;
        error!(replica = %self.name, detail = %detail, "Replica inconsistent after resync, disabled");
        MeshError::Inconsistent {
            replica: self.name.clone(),
            detail,
        }
    }
}

/// Shared handle to a replica actor
#[derive(Clone)]
pub struct ReplicaHandle(Arc<Mutex<Replica>>);

/// Non-owning reference held by group members
#[derive(Clone, Debug)]
pub struct WeakReplica(Weak<Mutex<Replica>>);

impl WeakReplica {
    pub fn upgrade(&self) -> Option<ReplicaHandle> {
        self.0.upgrade().map(ReplicaHandle)
    }
}

impl ReplicaHandle {
    /// Create a replica with the default validator.
    ///
    /// The node directory is created if missing.
    pub fn new(
        name: impl Into<String>,
        mode: Mode,
        dir: impl Into<PathBuf>,
        clock: LogicalClock,
    ) -> MeshResult<Self> {
        Self::with_validator(name, mode, dir, clock, Box::new(AcceptAll))
    }

    pub fn with_validator(
        name: impl Into<String>,
        mode: Mode,
        dir: impl Into<PathBuf>,
        clock: LogicalClock,
        validator: Box<dyn BlockValidator>,
    ) -> MeshResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(MeshError::Validation("replica name is empty".to_string()));
        }

        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        info!(replica = %name, mode = %mode, dir = %dir.display(), "Replica created");

        Ok(Self(Arc::new(Mutex::new(Replica {
            name,
            mode,
            dir,
            clock,
            admission: for_mode(mode),
            validator,
            heads: BTreeMap::new(),
            participants: BTreeMap::new(),
            peers: Vec::new(),
            block_count: 1,
            available: true,
        }))))
    }

    /// Create a replica named `name` under the configured storage root
    pub fn create(name: &str, config: &MeshConfig, clock: LogicalClock) -> MeshResult<Self> {
        config.validate()?;
        Self::new(name, config.mode, config.replica_path(name), clock)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Replica> {
        lock(&self.0)
    }

    pub fn downgrade(&self) -> WeakReplica {
        WeakReplica(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &ReplicaHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn set_validator(&self, validator: Box<dyn BlockValidator>) {
        self.lock().validator = validator;
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode
    }

    pub fn dir(&self) -> PathBuf {
        self.lock().dir.clone()
    }

    /// Current logical time
    pub fn now(&self) -> u64 {
        self.lock().clock.now()
    }

    pub fn queue_len(&self) -> usize {
        self.lock().admission.queue_len()
    }

    pub fn shared_len(&self) -> usize {
        self.lock().admission.shared_len()
    }

    pub fn block_count(&self) -> u64 {
        self.lock().block_count
    }

    /// Addresses with a recorded head anywhere in the group
    pub fn global_participants(&self) -> usize {
        self.lock().heads.len()
    }

    pub fn local_participants(&self) -> usize {
        self.lock().participants.len()
    }

    pub fn is_available(&self) -> bool {
        self.lock().available
    }

    pub fn heads(&self) -> BTreeMap<Address, BlockHash> {
        self.lock().heads.clone()
    }

    pub fn head_of(&self, address: &str) -> Option<BlockHash> {
        self.lock().heads.get(address).cloned()
    }

    /// Names of the other group members
    pub fn peer_names(&self) -> Vec<String> {
        let peers = self.lock().peer_handles();
        peers.iter().map(ReplicaHandle::name).collect()
    }

    /// Record `head` for `address` here and on every peer that lacks it
    fn seed_head(&self, address: &str, head: &str) {
        let peers = {
            let mut this = self.lock();
            this.heads
                .entry(address.to_string())
                .or_insert_with(|| head.to_string());
            this.peer_handles()
        };
        for peer in peers {
            peer.lock()
                .heads
                .entry(address.to_string())
                .or_insert_with(|| head.to_string());
        }
    }

    /// Reconcile with the first available peer.
    ///
    /// Missing block files are copied from the peer, then its heads and
    /// block count are adopted and queue entries for blocks committed in
    /// the meantime are dropped. If the rebuilt index differs from the
    /// peer's, the replica disables itself.
    fn resync(&self) -> MeshResult<()> {
        let (name, dir, own_heads, peers) = {
            let this = self.lock();
            (
                this.name.clone(),
                this.dir.clone(),
                this.heads.clone(),
                this.peer_handles(),
            )
        };

        let peer = peers
            .into_iter()
            .find(|peer| peer.is_available())
            .ok_or_else(|| MeshError::NoAvailablePeer {
                replica: name.clone(),
            })?;

        let (peer_name, peer_dir, peer_heads, peer_count) = {
            let p = peer.lock();
            (p.name.clone(), p.dir.clone(), p.heads.clone(), p.block_count)
        };

        let own = build_index(&dir, own_heads.values());
        let theirs = build_index(&peer_dir, peer_heads.values());
        if own == theirs {
            debug!(replica = %name, peer = %peer_name, "Already in sync");
            return Ok(());
        }

        let missing = missing_blocks(&own, &theirs);
        let fetched = fetch_blocks(&peer_dir, &dir, &missing);

        let mut this = self.lock();
        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => return Err(this.mark_inconsistent(format!("fetch failed: {}", e))),
        };

        this.heads = peer_heads;
        this.block_count = peer_count;

        let rebuilt = build_index(&this.dir, this.heads.values());
        if rebuilt != theirs {
            return Err(this.mark_inconsistent(format!(
                "index has {} blocks, peer {} has {}",
                rebuilt.len(),
                peer_name,
                theirs.len()
            )));
        }

        let settled: usize = fetched
            .iter()
            .map(|block| this.admission.forget(block))
            .sum();

        info!(
            replica = %this.name,
            peer = %peer_name,
            fetched = fetched.len(),
            settled = settled,
            block_count = this.block_count,
            "Resync complete"
        );
        Ok(())
    }

    /// Join the group `other` belongs to.
    ///
    /// Every member ends up peered with every other member; this replica
    /// then reconciles its DAG with the group.
    pub fn join(&self, other: &ReplicaHandle) -> MeshResult<()> {
        if self.ptr_eq(other) {
            return Err(MeshError::Validation(
                "a replica cannot join itself".to_string(),
            ));
        }

        let name = {
            let this = self.lock();
            this.ensure_available()?;
            if !this.peers.is_empty() {
                return Err(MeshError::AlreadyJoined {
                    replica: this.name.clone(),
                });
            }
            this.name.clone()
        };

        let (other_name, mut group) = {
            let o = other.lock();
            o.ensure_available()?;
            (o.name.clone(), o.peer_handles())
        };
        group.insert(0, other.clone());

        if group.iter().any(|member| member.ptr_eq(self)) {
            return Err(MeshError::AlreadyJoined { replica: name });
        }

        for member in &group {
            member.lock().peers.push(self.downgrade());
        }
        self.lock().peers = group.iter().map(ReplicaHandle::downgrade).collect();

        self.resync()?;

        // Head records only one side knows about become group-wide
        let mut known: BTreeMap<Address, BlockHash> = BTreeMap::new();
        for member in &group {
            for (address, head) in member.heads() {
                known.entry(address).or_insert(head);
            }
        }
        let (merged, orphaned) = {
            let mut this = self.lock();
            for (address, head) in known {
                this.heads.entry(address).or_insert(head);
            }
            let orphaned: Vec<Address> = this
                .participants
                .keys()
                .filter(|address| !this.heads.contains_key(*address))
                .cloned()
                .collect();
            (this.heads.clone(), orphaned)
        };
        for member in &group {
            let mut m = member.lock();
            for (address, head) in &merged {
                m.heads
                    .entry(address.clone())
                    .or_insert_with(|| head.clone());
            }
        }

        for address in orphaned {
            warn!(replica = %name, address = %address, "Local participant unknown to group, seeding genesis");
            self.seed_head(&address, genesis());
        }

        info!(
            replica = %name,
            peer = %other_name,
            group_size = group.len() + 1,
            "Joined block mesh"
        );
        Ok(())
    }

    /// Register a participant and return its authoritative head.
    ///
    /// An address the group has never seen starts at GENESIS on every
    /// member. A supplied head must match the recorded one.
    pub fn connect_participant(
        &self,
        address: &str,
        mode: Mode,
        participant: WeakParticipant,
        supplied_head: Option<&str>,
    ) -> MeshResult<BlockHash> {
        let (recorded, peers) = {
            let this = self.lock();
            this.ensure_available()?;

            if mode != this.mode {
                return Err(MeshError::Validation(format!(
                    "participant {} runs {} but replica {} runs {}",
                    address, mode, this.name, this.mode
                )));
            }
            (this.heads.get(address).cloned(), this.peer_handles())
        };

        let recorded = recorded.or_else(|| peers.iter().find_map(|peer| peer.head_of(address)));

        let head = match recorded {
            Some(recorded) => {
                if let Some(supplied) = supplied_head {
                    if supplied != recorded {
                        return Err(MeshError::StateConflict {
                            address: address.to_string(),
                            recorded,
                            supplied: supplied.to_string(),
                        });
                    }
                }
                self.lock()
                    .heads
                    .entry(address.to_string())
                    .or_insert_with(|| recorded.clone());
                recorded
            }
            None => {
                if let Some(supplied) = supplied_head.filter(|head| !is_genesis(head)) {
                    return Err(MeshError::StateConflict {
                        address: address.to_string(),
                        recorded: genesis().to_string(),
                        supplied: supplied.to_string(),
                    });
                }
                self.seed_head(address, genesis());
                genesis().to_string()
            }
        };

        let mut this = self.lock();
        this.ensure_available()?;
        this.participants.insert(address.to_string(), participant);
        info!(
            replica = %this.name,
            address = %address,
            head = %short_hash(&head),
            "Participant connected"
        );
        Ok(head)
    }

    /// Drop the local registry entry. DAG state is untouched.
    pub fn disconnect_participant(&self, address: &str) -> MeshResult<()> {
        let mut this = self.lock();
        this.ensure_available()?;
        if this.participants.remove(address).is_none() {
            return Err(MeshError::NotFound {
                address: address.to_string(),
            });
        }
        info!(replica = %this.name, address = %address, "Participant disconnected");
        Ok(())
    }

    /// Take the replica offline.
    ///
    /// Candidates shared with it this round are discarded; blocks the group
    /// commits meanwhile arrive through resync on [`enable`](Self::enable).
    pub fn disable(&self) {
        let mut this = self.lock();
        if this.available {
            this.available = false;
            let dropped = this.admission.shared_len();
            this.admission.clear_shared();
            info!(replica = %this.name, dropped = dropped, "Replica disabled");
        }
    }

    /// Make the replica available again and resync with the group.
    ///
    /// Fails `NoAvailablePeer` when the replica has peers but none of them
    /// is available; the replica stays enabled in that case.
    pub fn enable(&self) -> MeshResult<()> {
        {
            let mut this = self.lock();
            if this.available {
                return Ok(());
            }

            this.available = true;
            this.admission.clear_shared();
            info!(replica = %this.name, "Replica enabled");

            if this.peers.is_empty() {
                return Ok(());
            }
        }
        self.resync()
    }

    /// Admit a block into the queue
    pub fn submit(&self, block: Block) -> MeshResult<()> {
        let mut this = self.lock();
        this.ensure_available()?;
        debug!(
            replica = %this.name,
            sender = %block.sender(),
            timestamp = block.timestamp(),
            "Block submitted"
        );
        this.admission.submit(block);
        Ok(())
    }

    /// Validate the queue front and fan it out to the group.
    ///
    /// Rejected candidates are removed and the next one is inspected.
    /// Returns false when the queue holds nothing to broadcast.
    pub fn step_broadcast(&self) -> MeshResult<bool> {
        let (name, candidate, acks, peers) = {
            let mut this = self.lock();
            this.ensure_available()?;

            loop {
                let verdict = {
                    let Replica {
                        admission,
                        validator,
                        ..
                    } = &mut *this;
                    match admission.front_mut() {
                        None => return Ok(false),
                        Some((front, acks)) => {
                            if validator.validate(front) {
                                front.approve();
                                Some((front.clone(), acks))
                            } else {
                                front.reject();
                                None
                            }
                        }
                    }
                };

                match verdict {
                    Some((candidate, acks)) => {
                        this.admission.share(candidate.clone(), acks);
                        break (this.name.clone(), candidate, acks, this.peer_handles());
                    }
                    None => {
                        if let Some(rejected) = this.admission.pop_front() {
                            warn!(
                                replica = %this.name,
                                sender = %rejected.sender(),
                                timestamp = rejected.timestamp(),
                                "Candidate rejected"
                            );
                            if let Some(sender) = this.local_participant(rejected.sender()) {
                                sender.on_rejected(&rejected);
                            }
                        }
                    }
                }
            }
        };

        for peer in &peers {
            let mut p = peer.lock();
            if !p.available {
                debug!(replica = %name, peer = %p.name, "Skipping unavailable peer");
                continue;
            }
            p.admission.share(candidate.clone(), acks);
        }

        debug!(
            replica = %name,
            sender = %candidate.sender(),
            timestamp = candidate.timestamp(),
            acks = acks,
            "Candidate broadcast"
        );
        Ok(true)
    }

    /// Commit this round's candidates.
    ///
    /// Candidates are taken in ascending timestamp order. A candidate that
    /// shares a participant with one committed earlier in the pass is
    /// skipped. Returns the number of blocks committed.
    pub fn step_commit(&self) -> MeshResult<usize> {
        let mut this = self.lock();
        this.ensure_available()?;

        let mut candidates = this.admission.take_candidates();
        candidates.sort_by_key(Block::timestamp);

        let mut claimed: HashSet<Address> = HashSet::new();
        let mut committed = 0usize;
        let mut first_failure: Option<MeshError> = None;

        for mut block in candidates {
            let participants = block.participants();

            if let Some(address) = participants.iter().find(|a| claimed.contains(*a)) {
                debug!(
                    replica = %this.name,
                    sender = %block.sender(),
                    conflict = %address,
                    "Skipping conflicting candidate"
                );
                continue;
            }

            let mut parents = BTreeMap::new();
            let mut unknown = None;
            for address in &participants {
                match this.heads.get(address) {
                    Some(head) => {
                        parents.insert(address.clone(), head.clone());
                    }
                    None => {
                        unknown = Some(address.clone());
                        break;
                    }
                }
            }
            if let Some(address) = unknown {
                warn!(
                    replica = %this.name,
                    address = %address,
                    "Candidate references participant without a head, skipping"
                );
                continue;
            }

            claimed.extend(participants.iter().cloned());
            block.set_parents(parents)?;
            let hash = block.persist(&this.dir)?;

            for address in &participants {
                this.heads.insert(address.clone(), hash.clone());
            }
            this.block_count += 1;
            this.admission.settle(&block);
            committed += 1;

            info!(
                replica = %this.name,
                hash = %short_hash(&hash),
                sender = %block.sender(),
                block_count = this.block_count,
                "Block committed"
            );

            for address in &participants {
                let Some(participant) = this.local_participant(address) else {
                    continue;
                };
                if let Err(e) = participant.on_accepted(&block, &this.name) {
                    error!(
                        replica = %this.name,
                        address = %address,
                        error = %e,
                        "Participant refused committed block"
                    );
                    first_failure.get_or_insert(e);
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(committed),
        }
    }

    /// Find a participant on this replica or any peer.
    ///
    /// `Inconclusive` when a peer that could hold it is unavailable,
    /// `NotFound` when every peer answered.
    pub fn request_participant(&self, address: &str) -> MeshResult<ParticipantHandle> {
        let peers = {
            let this = self.lock();
            this.ensure_available()?;

            if let Some(participant) = this.local_participant(address) {
                return Ok(participant);
            }
            this.peer_handles()
        };

        let mut unreachable: Option<String> = None;
        for peer in &peers {
            let p = peer.lock();
            if !p.available {
                unreachable.get_or_insert_with(|| p.name.clone());
                continue;
            }
            if let Some(participant) = p.local_participant(address) {
                return Ok(participant);
            }
        }

        match unreachable {
            Some(peer) => Err(MeshError::Inconclusive {
                address: address.to_string(),
                peer,
            }),
            None => Err(MeshError::NotFound {
                address: address.to_string(),
            }),
        }
    }

    /// Resolve several participants; the first failing lookup is returned
    pub fn request_participants(&self, addresses: &[Address]) -> MeshResult<Vec<ParticipantHandle>> {
        if addresses.is_empty() {
            return Err(MeshError::Validation(
                "no participants requested".to_string(),
            ));
        }
        addresses
            .iter()
            .map(|address| self.request_participant(address))
            .collect()
    }

    /// Write the replica state file
    pub fn save(&self) -> MeshResult<PathBuf> {
        let this = self.lock();
        let state = ReplicaState {
            mode: this.mode,
            heads: this.heads.clone(),
            queue: this.admission.snapshot()?,
            block_count: this.block_count,
        };
        let path = write_state(&this.dir, &state)?;
        info!(replica = %this.name, path = %path.display(), "Replica saved");
        Ok(path)
    }

    /// Rebuild a replica from the state file in `dir`.
    ///
    /// The replica comes back available, with no peers and no attached
    /// participants.
    pub fn load(dir: impl AsRef<Path>, clock: LogicalClock) -> MeshResult<Self> {
        let dir = dir.as_ref();
        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                MeshError::Validation(format!("{} does not name a replica", dir.display()))
            })?;

        let state: ReplicaState = read_state(dir)?;
        let handle = Self::new(name, state.mode, dir, clock)?;
        {
            let mut this = handle.lock();
            this.admission.restore(state.queue)?;
            this.heads = state.heads;
            this.block_count = state.block_count;
            info!(
                replica = %this.name,
                block_count = this.block_count,
                queue = this.admission.queue_len(),
                "Replica loaded"
            );
        }
        Ok(handle)
    }
}

impl fmt::Debug for ReplicaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_lock() {
            Ok(this) => f
                .debug_struct("ReplicaHandle")
                .field("name", &this.name)
                .field("mode", &this.mode)
                .field("available", &this.available)
                .field("block_count", &this.block_count)
                .finish(),
            Err(_) => f.write_str("ReplicaHandle(<locked>)"),
        }
    }
}
