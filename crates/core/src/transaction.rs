//! Multi-party transactions.
//!
//! A transaction names every participant up front and collects exactly one
//! signature per participant. Signing is the only mutation allowed, and it
//! stops being possible once every slot is filled.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::types::{Address, SignToken};

/// Multi-party payload collecting one signature per participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Originating participant
    #[serde(rename = "send")]
    sender: Address,
    /// Signature slot per participant, `None` while unsigned
    participants: BTreeMap<Address, Option<SignToken>>,
    /// Opaque payload
    #[serde(default = "empty_payload")]
    data: Value,
}

fn empty_payload() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Transaction {
    /// Build a transaction from a sender and its receivers.
    ///
    /// The sender's slot is pre-filled with `sender_sign`; every receiver
    /// starts unsigned. `data` defaults to an empty object.
    pub fn new(
        sender: impl Into<Address>,
        sender_sign: impl Into<SignToken>,
        receivers: &[Address],
        data: Option<Value>,
    ) -> Result<Self> {
        let sender = sender.into();
        if sender.is_empty() {
            return Err(Error::Validation("sender address is empty".to_string()));
        }

        let mut participants = BTreeMap::new();
        participants.insert(sender.clone(), Some(sender_sign.into()));

        let mut seen = BTreeSet::new();
        for receiver in receivers {
            if receiver.is_empty() {
                return Err(Error::Validation("receiver address is empty".to_string()));
            }
            if *receiver == sender {
                return Err(Error::Validation(format!(
                    "sender {} listed as its own receiver",
                    sender
                )));
            }
            if !seen.insert(receiver.as_str()) {
                return Err(Error::Validation(format!(
                    "receiver {} listed more than once",
                    receiver
                )));
            }
            participants.insert(receiver.clone(), None);
        }

        Ok(Self {
            sender,
            participants,
            data: data.unwrap_or_else(empty_payload),
        })
    }

    /// Build a transaction from an explicit participant map
    pub fn from_participants(
        sender: impl Into<Address>,
        participants: BTreeMap<Address, Option<SignToken>>,
        data: Option<Value>,
    ) -> Result<Self> {
        let sender = sender.into();
        if !participants.contains_key(&sender) {
            return Err(Error::Validation(format!(
                "sender {} is not a participant",
                sender
            )));
        }

        Ok(Self {
            sender,
            participants,
            data: data.unwrap_or_else(empty_payload),
        })
    }

    /// Place `signature` into the slot of `address`
    pub fn sign(&mut self, address: &str, signature: impl Into<SignToken>) -> Result<()> {
        let slot = self
            .participants
            .get_mut(address)
            .ok_or_else(|| Error::UnknownParticipant {
                address: address.to_string(),
            })?;

        if slot.is_some() {
            return Err(Error::AlreadySigned {
                address: address.to_string(),
            });
        }

        *slot = Some(signature.into());
        Ok(())
    }

    /// True once every participant has signed
    pub fn is_ready(&self) -> bool {
        !self.participants.is_empty()
            && self.participants.contains_key(&self.sender)
            && self.participants.values().all(Option::is_some)
    }

    /// Participant addresses in stable (lexicographic) order
    pub fn participants(&self) -> Vec<Address> {
        self.participants.keys().cloned().collect()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn has_participant(&self, address: &str) -> bool {
        self.participants.contains_key(address)
    }

    pub fn signature_of(&self, address: &str) -> Option<&SignToken> {
        self.participants.get(address).and_then(Option::as_ref)
    }

    pub fn unsigned(&self) -> Vec<Address> {
        self.participants
            .iter()
            .filter(|(_, sig)| sig.is_none())
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let tx: Transaction = serde_json::from_str(json)?;
        if !tx.participants.contains_key(&tx.sender) {
            return Err(Error::Validation(format!(
                "sender {} is not a participant",
                tx.sender
            )));
        }
        Ok(tx)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[TX from {} to {:?}]",
            self.sender,
            self.participants
                .keys()
                .filter(|addr| **addr != self.sender)
                .collect::<Vec<_>>()
        )
    }
}
