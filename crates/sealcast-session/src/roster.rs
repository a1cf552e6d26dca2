//! Participant bookkeeping for one session.
//!
//! The roster holds display metadata and key status only; key material
//! lives in the sender-key manager and the two are paired by id.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use sealcast_protocol::{KeyGeneration, ParticipantId};

use crate::error::SessionError;

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    #[default]
    Guest,
}

/// Key exchange progress for one remote participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyStatus {
    /// No key received yet.
    #[default]
    Pending,
    /// A usable key is installed.
    Active,
    /// The last key import failed; media from this peer will not decrypt.
    Failed,
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: Option<String>,
    pub role: Role,
    pub key_status: KeyStatus,
    pub current_generation: Option<KeyGeneration>,
    pub joined_at_ms: u64,
}

impl Participant {
    pub fn has_key(&self) -> bool {
        self.key_status == KeyStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterEvent {
    ParticipantAdded { participant_id: ParticipantId },
    ParticipantRemoved { participant_id: ParticipantId },
    ParticipantKeyUpdated {
        participant_id: ParticipantId,
        generation: KeyGeneration,
    },
}

/// The set of remote participants, capped at `max_participants`.
///
/// The local participant is never a member.
pub struct Roster {
    local_id: ParticipantId,
    max_participants: usize,
    participants: HashMap<ParticipantId, Participant>,
    join_order: Vec<ParticipantId>,
    events: Option<UnboundedSender<RosterEvent>>,
}

impl Roster {
    pub fn new(local_id: ParticipantId, max_participants: usize) -> Self {
        Self {
            local_id,
            max_participants,
            participants: HashMap::new(),
            join_order: Vec::new(),
            events: None,
        }
    }

    pub fn set_event_sink(&mut self, sink: UnboundedSender<RosterEvent>) {
        self.events = Some(sink);
    }

    fn emit(&self, event: RosterEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Add a participant on a join signal. Re-joining an existing id just
    /// refreshes its display name. Returns whether the entry is new.
    pub fn add(
        &mut self,
        id: ParticipantId,
        display_name: Option<String>,
    ) -> Result<bool, SessionError> {
        if id == self.local_id {
            return Err(SessionError::LocalParticipantInRoster);
        }
        if let Some(existing) = self.participants.get_mut(&id) {
            if display_name.is_some() {
                existing.display_name = display_name;
            }
            return Ok(false);
        }
        if self.participants.len() >= self.max_participants {
            return Err(SessionError::RosterFull {
                max: self.max_participants,
            });
        }
        self.participants.insert(
            id.clone(),
            Participant {
                id: id.clone(),
                display_name,
                role: Role::default(),
                key_status: KeyStatus::default(),
                current_generation: None,
                joined_at_ms: unix_millis(),
            },
        );
        self.join_order.push(id.clone());
        self.emit(RosterEvent::ParticipantAdded { participant_id: id });
        Ok(true)
    }

    pub fn remove(&mut self, id: &ParticipantId) -> Result<Participant, SessionError> {
        let removed = self
            .participants
            .remove(id)
            .ok_or_else(|| SessionError::ParticipantNotFound { id: id.clone() })?;
        self.join_order.retain(|p| p != id);
        self.emit(RosterEvent::ParticipantRemoved {
            participant_id: id.clone(),
        });
        Ok(removed)
    }

    /// Record a successful key import for a participant.
    pub fn set_key_active(
        &mut self,
        id: &ParticipantId,
        generation: KeyGeneration,
    ) -> Result<(), SessionError> {
        let participant = self
            .participants
            .get_mut(id)
            .ok_or_else(|| SessionError::ParticipantNotFound { id: id.clone() })?;
        participant.key_status = KeyStatus::Active;
        participant.current_generation = Some(generation);
        self.emit(RosterEvent::ParticipantKeyUpdated {
            participant_id: id.clone(),
            generation,
        });
        Ok(())
    }

    /// Record a failed key import; media from this peer stays opaque
    /// until a good key arrives.
    pub fn mark_key_failed(&mut self, id: &ParticipantId) {
        if let Some(participant) = self.participants.get_mut(id) {
            participant.key_status = KeyStatus::Failed;
        }
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.participants.len()
    }

    /// Participants in join order.
    pub fn list(&self) -> Vec<&Participant> {
        self.join_order
            .iter()
            .filter_map(|id| self.participants.get(id))
            .collect()
    }

    pub fn peer_ids(&self) -> Vec<ParticipantId> {
        self.join_order.clone()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
        self.join_order.clear();
    }
}
