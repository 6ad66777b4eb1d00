//! Participant (user node) protocol.
//!
//! A participant originates transactions, co-signs the ones it receives and
//! keeps its own chain: every block it takes part in is persisted to its
//! directory once the attached replica commits it.

use blockmesh_core::{
    is_genesis, short_hash, Address, Block, BlockHash, MeshConfig, Mode, SignToken, Transaction,
};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, error, info, warn};

use crate::error::{MeshError, MeshResult};
use crate::lock;
use crate::replica::ReplicaHandle;
use crate::state::{read_state, write_state, ParticipantState};
use crate::sync::walk_chain;

/// Result of a [`ParticipantHandle::perform`] call
#[derive(Debug, Clone, PartialEq)]
pub enum PerformOutcome {
    /// The block was built and handed to the replica(s)
    Submitted(Block),
    /// The origination gate is closed; nothing was submitted
    Busy,
}

/// Origination gating, chosen from the protocol mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OriginationPolicy {
    Unrestricted,
    /// At most one originated block in flight
    Gated { generation_allowed: bool },
}

impl OriginationPolicy {
    fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Classic => Self::Unrestricted,
            Mode::Modified => Self::Gated {
                generation_allowed: true,
            },
        }
    }

    fn may_originate(&self) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Gated { generation_allowed } => *generation_allowed,
        }
    }

    fn is_gated(&self) -> bool {
        matches!(self, Self::Gated { .. })
    }

    fn set_allowed(&mut self, allowed: bool) {
        if let Self::Gated { generation_allowed } = self {
            *generation_allowed = allowed;
        }
    }
}

pub(crate) struct Participant {
    address: Address,
    sign_token: SignToken,
    mode: Mode,
    dir: PathBuf,
    replica: Option<ReplicaHandle>,
    /// Name of the attached replica, checked on notifications
    replica_name: Option<String>,
    /// None until the first attach
    head: Option<BlockHash>,
    policy: OriginationPolicy,
}

impl Participant {
    fn attached(&self) -> MeshResult<ReplicaHandle> {
        self.replica.clone().ok_or_else(|| MeshError::Uninitialized {
            address: self.address.clone(),
        })
    }
}

/// Shared handle to a participant actor
#[derive(Clone)]
pub struct ParticipantHandle(Arc<Mutex<Participant>>);

/// Non-owning reference kept in replica registries
#[derive(Clone, Debug)]
pub struct WeakParticipant(Weak<Mutex<Participant>>);

impl WeakParticipant {
    pub fn upgrade(&self) -> Option<ParticipantHandle> {
        self.0.upgrade().map(ParticipantHandle)
    }
}

impl ParticipantHandle {
    pub fn new(
        address: impl Into<Address>,
        sign_token: impl Into<SignToken>,
        mode: Mode,
        dir: impl Into<PathBuf>,
    ) -> MeshResult<Self> {
        let address = address.into();
        let sign_token = sign_token.into();
        if address.is_empty() {
            return Err(MeshError::Validation("participant address is empty".to_string()));
        }
        if sign_token.is_empty() {
            return Err(MeshError::Validation(format!(
                "participant {} has an empty sign token",
                address
            )));
        }

        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        Ok(Self(Arc::new(Mutex::new(Participant {
            address,
            sign_token,
            mode,
            dir,
            replica: None,
            replica_name: None,
            head: None,
            policy: OriginationPolicy::for_mode(mode),
        }))))
    }

    /// Participant with its directory under the configured storage root
    pub fn create(
        config: &MeshConfig,
        address: &str,
        sign_token: impl Into<SignToken>,
    ) -> MeshResult<Self> {
        config.validate()?;
        Self::new(address, sign_token, config.mode, config.participant_path(address))
    }

    fn lock(&self) -> MutexGuard<'_, Participant> {
        lock(&self.0)
    }

    pub fn downgrade(&self) -> WeakParticipant {
        WeakParticipant(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &ParticipantHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn address(&self) -> Address {
        self.lock().address.clone()
    }

    /// Local chain head; None before the first attach
    pub fn head(&self) -> Option<BlockHash> {
        self.lock().head.clone()
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode
    }

    pub fn dir(&self) -> PathBuf {
        self.lock().dir.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().replica.is_some()
    }

    /// Whether a new block may be originated right now
    pub fn generation_allowed(&self) -> bool {
        self.lock().policy.may_originate()
    }

    pub fn replica(&self) -> Option<ReplicaHandle> {
        self.lock().replica.clone()
    }

    pub(crate) fn is_attached_to(&self, replica_name: &str) -> bool {
        self.lock().replica_name.as_deref() == Some(replica_name)
    }

    /// Connect to `replica` and adopt its head for this address
    pub fn attach(&self, replica: &ReplicaHandle) -> MeshResult<BlockHash> {
        let (address, mode, supplied) = {
            let p = self.lock();
            if p.replica.is_some() {
                return Err(MeshError::Validation(format!(
                    "participant {} is already attached",
                    p.address
                )));
            }
            (p.address.clone(), p.mode, p.head.clone())
        };

        let head =
            replica.connect_participant(&address, mode, self.downgrade(), supplied.as_deref())?;
        let replica_name = replica.name();

        let mut p = self.lock();
        p.replica = Some(replica.clone());
        p.replica_name = Some(replica_name);
        p.head = Some(head.clone());
        Ok(head)
    }

    /// Move to another replica.
    ///
    /// The old replica may be disabled; its registry entry is then left
    /// behind but it will no longer notify this participant.
    pub fn switch_replica(&self, replica: &ReplicaHandle) -> MeshResult<BlockHash> {
        if !replica.is_available() {
            return Err(MeshError::Unavailable {
                replica: replica.name(),
            });
        }

        let (address, old) = {
            let p = self.lock();
            (p.address.clone(), p.replica.clone())
        };

        if let Some(old) = old {
            if old.ptr_eq(replica) {
                return self.head().ok_or(MeshError::Uninitialized { address });
            }
            match old.disconnect_participant(&address) {
                Ok(()) => {}
                Err(MeshError::Unavailable { replica: stale })
                | Err(MeshError::NotFound { address: stale }) => {
                    debug!(address = %address, stale = %stale, "Leaving stale registration behind");
                }
                Err(e) => return Err(e),
            }

            let mut p = self.lock();
            p.replica = None;
            p.replica_name = None;
        }

        let head = self.attach(replica)?;
        info!(address = %address, replica = %replica.name(), "Participant switched replica");
        Ok(head)
    }

    /// Co-sign `transaction`.
    ///
    /// Returns the current local head. It is a hint only; the replica picks
    /// the real parent at commit time.
    pub fn sign_transaction(&self, transaction: &mut Transaction) -> MeshResult<BlockHash> {
        let p = self.lock();
        p.attached()?;
        transaction.sign(&p.address, p.sign_token.clone())?;
        p.head.clone().ok_or_else(|| MeshError::Uninitialized {
            address: p.address.clone(),
        })
    }

    /// Originate a transaction to `receivers`.
    ///
    /// Every receiver is resolved and has signed before anything is
    /// submitted. Classic mode submits to the attached replica; Modified
    /// mode also submits to every receiver's replica and closes the
    /// origination gate until the block comes back accepted.
    pub fn perform(&self, receivers: &[Address], data: Option<Value>) -> MeshResult<PerformOutcome> {
        let (address, sign_token, replica, policy) = {
            let p = self.lock();
            (p.address.clone(), p.sign_token.clone(), p.attached()?, p.policy)
        };

        if !policy.may_originate() {
            debug!(address = %address, "Origination gate closed");
            return Ok(PerformOutcome::Busy);
        }
        if receivers.is_empty() {
            return Err(MeshError::Validation(format!(
                "{} performed a transaction without receivers",
                address
            )));
        }
        if !replica.is_available() {
            return Err(MeshError::Unavailable {
                replica: replica.name(),
            });
        }

        let mut transaction = Transaction::new(address.as_str(), sign_token, receivers, data)?;
        let counterparts = replica.request_participants(receivers)?;

        let mut targets = vec![replica.clone()];
        if policy.is_gated() {
            for counterpart in &counterparts {
                let target = counterpart.replica().ok_or_else(|| MeshError::Uninitialized {
                    address: counterpart.address(),
                })?;
                if !target.is_available() {
                    return Err(MeshError::Unavailable {
                        replica: target.name(),
                    });
                }
                targets.push(target);
            }
        }

        for counterpart in &counterparts {
            counterpart.sign_transaction(&mut transaction)?;
        }

        let block = Block::new(transaction, replica.now())?;
        for target in &targets {
            target.submit(block.clone())?;
        }

        if policy.is_gated() {
            self.lock().policy.set_allowed(false);
        }

        info!(
            address = %address,
            receivers = receivers.len(),
            timestamp = block.timestamp(),
            submissions = targets.len(),
            "Transaction performed"
        );
        Ok(PerformOutcome::Submitted(block))
    }

    /// Apply a block committed by `replica_name`.
    ///
    /// Returns Ok(false) when the notification is ignored (not attached to
    /// that replica) or the local chain cannot be verified; the head then
    /// stays where it was. A parent that is not the local head is fatal.
    pub fn on_accepted(&self, block: &Block, replica_name: &str) -> MeshResult<bool> {
        let mut p = self.lock();
        if p.replica_name.as_deref() != Some(replica_name) {
            debug!(address = %p.address, replica = %replica_name, "Ignoring block from foreign replica");
            return Ok(false);
        }

        let head = p.head.clone().ok_or_else(|| MeshError::Uninitialized {
            address: p.address.clone(),
        })?;
        let parent = block.parent_of(&p.address).cloned().unwrap_or_default();
        if parent != head {
            error!(
                address = %p.address,
                parent = %short_hash(&parent),
                head = %short_hash(&head),
                "Chain integrity violation"
            );
            return Err(MeshError::ChainIntegrity {
                address: p.address.clone(),
                parent,
                head,
            });
        }

        if !is_genesis(&head) {
            if let Err(e) = walk_chain(&p.dir, &p.address, &head) {
                warn!(address = %p.address, error = %e, "Chain verification failed, block not applied");
                return Ok(false);
            }
        }

        let hash = block.persist(&p.dir)?;
        p.head = Some(hash.clone());

        if block.sender() == p.address {
            p.policy.set_allowed(true);
        }

        debug!(address = %p.address, hash = %short_hash(&hash), "Block accepted");
        Ok(true)
    }

    /// The replica discarded a block this participant sent
    pub fn on_rejected(&self, block: &Block) {
        let mut p = self.lock();
        if block.sender() == p.address {
            p.policy.set_allowed(true);
        }
        warn!(
            address = %p.address,
            timestamp = block.timestamp(),
            "Block rejected by replica, discarded"
        );
    }

    /// Number of blocks on this participant's chain
    pub fn chain_length(&self) -> MeshResult<usize> {
        let p = self.lock();
        let head = p.head.clone().ok_or_else(|| MeshError::Uninitialized {
            address: p.address.clone(),
        })?;
        walk_chain(&p.dir, &p.address, &head)
    }

    /// Write the participant state file
    pub fn save(&self) -> MeshResult<PathBuf> {
        let p = self.lock();
        p.attached()?;
        let state = ParticipantState {
            head: p.head.clone().ok_or_else(|| MeshError::Uninitialized {
                address: p.address.clone(),
            })?,
            address: p.address.clone(),
            sign: p.sign_token.clone(),
            mode: p.mode,
        };
        let path = write_state(&p.dir, &state)?;
        info!(address = %p.address, path = %path.display(), "Participant saved");
        Ok(path)
    }

    /// Restore a participant from `dir` and attach it to `replica`.
    ///
    /// The saved head must match the replica's record.
    pub fn load(dir: impl AsRef<Path>, replica: &ReplicaHandle) -> MeshResult<Self> {
        let dir = dir.as_ref();
        let state: ParticipantState = read_state(dir)?;

        let handle = Self::new(state.address, state.sign, state.mode, dir)?;
        handle.lock().head = Some(state.head);
        handle.attach(replica)?;
        Ok(handle)
    }
}

impl fmt::Debug for ParticipantHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_lock() {
            Ok(p) => f
                .debug_struct("ParticipantHandle")
                .field("address", &p.address)
                .field("mode", &p.mode)
                .field("replica", &p.replica_name)
                .field("head", &p.head.as_deref().map(short_hash))
                .finish(),
            Err(_) => f.write_str("ParticipantHandle(<locked>)"),
        }
    }
}
