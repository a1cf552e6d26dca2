//! Session coordination: signaling dispatch and key distribution.
//!
//! The coordinator is the top of the object graph for one call. It owns
//! the local identity, the sender-key manager, the roster, and the
//! topology policy, and it is the only component that talks to the
//! signaling channel. Media transforms get a cloned key-manager handle
//! and otherwise run independently.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

use sealcast_crypto::{KeyEvent, SenderKeyManager, SerializedSenderKey};
use sealcast_protocol::{
    decode_key_material, encode_key_material, KeyGeneration, ParticipantId, SignalMessage,
};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::roster::{Participant, Roster, RosterEvent};
use crate::topology::{KeyDistribution, TopologyConfig};

/// Outbound half of the signaling channel, installed by the embedding
/// application. Delivery is the transport's problem; the coordinator only
/// defines what is sent.
#[async_trait]
pub trait SignalingSink: Send + Sync {
    async fn send(&self, message: SignalMessage) -> anyhow::Result<()>;
}

struct Shared {
    config: SessionConfig,
    topology: TopologyConfig,
    keys: SenderKeyManager,
    roster: Mutex<Roster>,
    signaling: Arc<dyn SignalingSink>,
    /// Pending debounced rotation, aborted and respawned on every leave.
    rotation_timer: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn local_id(&self) -> &ParticipantId {
        &self.config.local_participant_id
    }
}

pub struct SessionCoordinator {
    shared: Arc<Shared>,
}

impl SessionCoordinator {
    pub fn new(
        config: SessionConfig,
        signaling: Arc<dyn SignalingSink>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let topology = TopologyConfig::new(config.topology);
        topology.validate()?;

        let keys = SenderKeyManager::new(
            config.local_participant_id.clone(),
            config.key_manager_config(),
        );
        let roster = Roster::new(config.local_participant_id.clone(), config.max_participants);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                topology,
                keys,
                roster: Mutex::new(roster),
                signaling,
                rotation_timer: Mutex::new(None),
            }),
        })
    }

    pub fn local_id(&self) -> &ParticipantId {
        self.shared.local_id()
    }

    pub fn topology(&self) -> &TopologyConfig {
        &self.shared.topology
    }

    /// Cloned key-manager handle for wiring up media transforms.
    pub fn keys(&self) -> SenderKeyManager {
        self.shared.keys.clone()
    }

    pub fn set_key_event_sink(&self, sink: UnboundedSender<KeyEvent>) {
        self.shared.keys.set_event_sink(sink);
    }

    pub fn set_roster_event_sink(&self, sink: UnboundedSender<RosterEvent>) {
        self.shared.roster.lock().unwrap().set_event_sink(sink);
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.shared
            .roster
            .lock()
            .unwrap()
            .list()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn participant_count(&self) -> usize {
        self.shared.roster.lock().unwrap().count()
    }

    /// Generate the local sender key and announce ourselves.
    pub async fn connect(&self, display_name: Option<String>) -> anyhow::Result<()> {
        self.shared.keys.ensure_local_key()?;
        self.shared
            .signaling
            .send(SignalMessage::Join {
                from: self.shared.local_id().clone(),
                name: display_name,
            })
            .await
    }

    /// Route one inbound signaling message.
    pub async fn handle_message(&self, message: SignalMessage) -> anyhow::Result<()> {
        match message {
            SignalMessage::Joined { participants } => {
                {
                    let mut roster = self.shared.roster.lock().unwrap();
                    for info in participants {
                        if info.id == *self.shared.local_id() {
                            continue;
                        }
                        if let Err(err) = roster.add(info.id.clone(), info.name) {
                            tracing::warn!(participant = %info.id, %err, "cannot add participant");
                        }
                    }
                }
                self.send_local_key(None).await
            }

            SignalMessage::ParticipantJoined { participant_id, name } => {
                if participant_id == *self.shared.local_id() {
                    return Ok(());
                }
                self.shared
                    .roster
                    .lock()
                    .unwrap()
                    .add(participant_id.clone(), name)?;
                // The newcomer needs our key regardless of topology.
                self.send_local_key(Some(participant_id)).await
            }

            SignalMessage::ParticipantLeft { participant_id } => {
                {
                    let mut roster = self.shared.roster.lock().unwrap();
                    if roster.remove(&participant_id).is_err() {
                        tracing::debug!(participant = %participant_id, "left without joining");
                    }
                }
                self.shared.keys.remove_participant(&participant_id);
                // Forward secrecy: rotate once the departures settle.
                self.schedule_debounced_rotation();
                Ok(())
            }

            SignalMessage::E2eeKey { from, to, key, generation } => {
                if from == *self.shared.local_id() {
                    // Reflected copy of our own broadcast.
                    return Ok(());
                }
                if let Some(to) = &to {
                    if to != self.shared.local_id() {
                        return Ok(());
                    }
                }
                self.import_key(from, &key, generation).await
            }

            SignalMessage::E2eeKeyRequest { from, to } => {
                if to == *self.shared.local_id() {
                    self.send_local_key(Some(from)).await
                } else {
                    Ok(())
                }
            }

            SignalMessage::Error { code } => {
                tracing::warn!(?code, "signaling server reported an error");
                Ok(())
            }

            // Server-bound and WebRTC carrier messages are not ours to
            // interpret.
            SignalMessage::Join { .. }
            | SignalMessage::TrackPublished { .. }
            | SignalMessage::Offer { .. }
            | SignalMessage::Answer { .. }
            | SignalMessage::IceCandidate { .. } => Ok(()),
        }
    }

    async fn import_key(
        &self,
        from: ParticipantId,
        key: &str,
        generation: KeyGeneration,
    ) -> anyhow::Result<()> {
        let material = match decode_key_material(key) {
            Ok(material) => Zeroizing::new(material),
            Err(err) => {
                self.shared.roster.lock().unwrap().mark_key_failed(&from);
                return Err(err.into());
            }
        };
        if let Err(err) = self
            .shared
            .keys
            .import_remote(&from, material.as_slice(), generation)
        {
            self.shared.roster.lock().unwrap().mark_key_failed(&from);
            return Err(err.into());
        }

        let mut roster = self.shared.roster.lock().unwrap();
        if !roster.contains(&from) {
            // Key can arrive ahead of the join signal.
            if let Err(err) = roster.add(from.clone(), None) {
                tracing::warn!(participant = %from, %err, "cannot track key sender");
                return Ok(());
            }
        }
        roster.set_key_active(&from, generation)?;
        Ok(())
    }

    /// Ask a peer to re-send its current key, e.g. after frames arrived
    /// for a generation outside our history.
    pub async fn request_key(&self, peer: ParticipantId) -> anyhow::Result<()> {
        self.shared
            .signaling
            .send(SignalMessage::E2eeKeyRequest {
                from: self.shared.local_id().clone(),
                to: peer,
            })
            .await
    }

    /// Rotate immediately and distribute the new key. Supersedes any
    /// pending debounced rotation.
    pub async fn rotate_now(&self) -> anyhow::Result<KeyGeneration> {
        self.cancel_rotation_timer();
        rotate_and_broadcast(&self.shared).await
    }

    /// Rotate if the ratchet hint says it is time. Returns whether a
    /// rotation happened.
    pub async fn maybe_ratchet(&self) -> anyhow::Result<bool> {
        if !self.shared.keys.should_ratchet() {
            return Ok(false);
        }
        self.rotate_now().await?;
        Ok(true)
    }

    /// Send the current local key: to one peer, or per topology policy
    /// when `to` is `None`.
    async fn send_local_key(&self, to: Option<ParticipantId>) -> anyhow::Result<()> {
        self.shared.keys.ensure_local_key()?;
        let exported = self
            .shared
            .keys
            .export_local()
            .ok_or_else(|| anyhow::anyhow!("no local key to distribute"))?;
        for message in self.key_messages(&exported, to) {
            self.shared.signaling.send(message).await?;
        }
        Ok(())
    }

    fn key_messages(
        &self,
        exported: &SerializedSenderKey,
        to: Option<ParticipantId>,
    ) -> Vec<SignalMessage> {
        let peers = self.shared.roster.lock().unwrap().peer_ids();
        key_messages(&self.shared.topology, exported, to, &peers)
    }

    fn schedule_debounced_rotation(&self) {
        let shared = self.shared.clone();
        let delay = Duration::from_millis(self.shared.config.rotation_debounce_ms);
        let mut timer = self.shared.rotation_timer.lock().unwrap();
        if let Some(pending) = timer.take() {
            pending.abort();
        }
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match rotate_and_broadcast(&shared).await {
                Ok(generation) => {
                    tracing::debug!(generation, "rotated sender key after departures")
                }
                Err(err) => tracing::warn!(%err, "debounced key rotation failed"),
            }
        }));
    }

    fn cancel_rotation_timer(&self) {
        if let Some(pending) = self.shared.rotation_timer.lock().unwrap().take() {
            pending.abort();
        }
    }

    /// End the session: cancel the pending rotation, empty the roster,
    /// zeroize and drop all keys, close event sinks.
    pub fn shutdown(&self) {
        self.cancel_rotation_timer();
        self.shared.roster.lock().unwrap().clear();
        self.shared.keys.clear();
    }
}

fn key_messages(
    topology: &TopologyConfig,
    exported: &SerializedSenderKey,
    to: Option<ParticipantId>,
    peers: &[ParticipantId],
) -> Vec<SignalMessage> {
    let key = encode_key_material(&exported.key_material);
    let make = |to: Option<ParticipantId>| SignalMessage::E2eeKey {
        from: exported.participant_id.clone(),
        to,
        key: key.clone(),
        generation: exported.generation,
    };
    match to {
        Some(peer) => vec![make(Some(peer))],
        None => match topology.key_distribution() {
            // The relay fans a single message out to everyone.
            KeyDistribution::ServerRelayed => vec![make(None)],
            KeyDistribution::DirectBroadcast => topology
                .distribution_targets(&exported.participant_id, peers)
                .into_iter()
                .map(|peer| make(Some(peer)))
                .collect(),
        },
    }
}

async fn rotate_and_broadcast(shared: &Arc<Shared>) -> anyhow::Result<KeyGeneration> {
    let generation = shared.keys.rotate_local()?;
    let exported = shared
        .keys
        .export_local()
        .ok_or_else(|| anyhow::anyhow!("no local key after rotation"))?;
    let peers = shared.roster.lock().unwrap().peer_ids();
    for message in key_messages(&shared.topology, &exported, None, &peers) {
        shared.signaling.send(message).await?;
    }
    Ok(generation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologyKind;
    use sealcast_protocol::ParticipantInfo;

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::new(s).unwrap()
    }

    struct RecordingSink {
        sent: Mutex<Vec<SignalMessage>>,
    }

    #[async_trait]
    impl SignalingSink for RecordingSink {
        async fn send(&self, message: SignalMessage) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn messages(&self) -> Vec<SignalMessage> {
            self.sent.lock().unwrap().clone()
        }

        fn key_messages(&self) -> Vec<(Option<ParticipantId>, KeyGeneration)> {
            self.messages()
                .into_iter()
                .filter_map(|m| match m {
                    SignalMessage::E2eeKey { to, generation, .. } => Some((to, generation)),
                    _ => None,
                })
                .collect()
        }
    }

    fn coordinator(topology: TopologyKind, sink: Arc<RecordingSink>) -> SessionCoordinator {
        let mut config = SessionConfig::new(pid("alice"));
        config.topology = topology;
        SessionCoordinator::new(config, sink).unwrap()
    }

    fn joined(names: &[&str]) -> SignalMessage {
        SignalMessage::Joined {
            participants: names
                .iter()
                .map(|n| ParticipantInfo {
                    id: pid(n),
                    name: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn connect_generates_key_and_joins() {
        let sink = RecordingSink::new();
        let c = coordinator(TopologyKind::Sfu, sink.clone());
        c.connect(Some("Alice".into())).await.unwrap();

        assert_eq!(c.keys().current_generation(), Some(0));
        match &sink.messages()[0] {
            SignalMessage::Join { from, name } => {
                assert_eq!(from, &pid("alice"));
                assert_eq!(name.as_deref(), Some("Alice"));
            }
            other => panic!("wrong message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn joined_populates_roster_and_broadcasts_once_via_relay() {
        let sink = RecordingSink::new();
        let c = coordinator(TopologyKind::Sfu, sink.clone());
        c.connect(None).await.unwrap();
        c.handle_message(joined(&["bob", "carol"])).await.unwrap();

        assert_eq!(c.participant_count(), 2);
        // Relayed topology: a single broadcast with no addressee.
        assert_eq!(sink.key_messages(), vec![(None, 0)]);
    }

    #[tokio::test]
    async fn joined_broadcast_is_per_peer_for_mesh() {
        let sink = RecordingSink::new();
        let c = coordinator(TopologyKind::Mesh, sink.clone());
        c.connect(None).await.unwrap();
        c.handle_message(joined(&["bob", "carol"])).await.unwrap();

        assert_eq!(
            sink.key_messages(),
            vec![(Some(pid("bob")), 0), (Some(pid("carol")), 0)]
        );
    }

    #[tokio::test]
    async fn joined_roster_skips_own_id() {
        let sink = RecordingSink::new();
        let c = coordinator(TopologyKind::Sfu, sink.clone());
        c.handle_message(joined(&["alice", "bob"])).await.unwrap();
        assert_eq!(c.participant_count(), 1);
    }

    #[tokio::test]
    async fn newcomer_gets_targeted_key() {
        let sink = RecordingSink::new();
        let c = coordinator(TopologyKind::Sfu, sink.clone());
        c.connect(None).await.unwrap();
        c.handle_message(SignalMessage::ParticipantJoined {
            participant_id: pid("bob"),
            name: Some("Bob".into()),
        })
        .await
        .unwrap();

        assert_eq!(c.participant_count(), 1);
        assert_eq!(sink.key_messages(), vec![(Some(pid("bob")), 0)]);
    }

    #[tokio::test]
    async fn roster_cap_surfaces_on_join() {
        let sink = RecordingSink::new();
        let mut config = SessionConfig::new(pid("alice"));
        config.max_participants = 1;
        let c = SessionCoordinator::new(config, sink).unwrap();

        c.handle_message(SignalMessage::ParticipantJoined {
            participant_id: pid("bob"),
            name: None,
        })
        .await
        .unwrap();
        let err = c
            .handle_message(SignalMessage::ParticipantJoined {
                participant_id: pid("carol"),
                name: None,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("full"));
    }

    #[tokio::test]
    async fn inbound_key_is_imported_and_tracked() {
        let sink = RecordingSink::new();
        let c = coordinator(TopologyKind::Sfu, sink);
        c.handle_message(SignalMessage::E2eeKey {
            from: pid("bob"),
            to: None,
            key: encode_key_material(&[9u8; 32]),
            generation: 4,
        })
        .await
        .unwrap();

        assert!(c
            .keys()
            .with_decryption_key(&pid("bob"), 4, |_| ())
            .is_some());
        let participants = c.participants();
        assert_eq!(participants.len(), 1);
        assert!(participants[0].has_key());
        assert_eq!(participants[0].current_generation, Some(4));
    }

    #[tokio::test]
    async fn key_addressed_elsewhere_is_ignored() {
        let sink = RecordingSink::new();
        let c = coordinator(TopologyKind::Sfu, sink);
        c.handle_message(SignalMessage::E2eeKey {
            from: pid("bob"),
            to: Some(pid("carol")),
            key: encode_key_material(&[9u8; 32]),
            generation: 0,
        })
        .await
        .unwrap();
        assert!(c.keys().with_decryption_key(&pid("bob"), 0, |_| ()).is_none());
        assert_eq!(c.participant_count(), 0);
    }

    #[tokio::test]
    async fn reflected_own_key_is_ignored() {
        let sink = RecordingSink::new();
        let c = coordinator(TopologyKind::Sfu, sink);
        c.connect(None).await.unwrap();
        c.handle_message(SignalMessage::E2eeKey {
            from: pid("alice"),
            to: None,
            key: encode_key_material(&[1u8; 32]),
            generation: 0,
        })
        .await
        .unwrap();
        assert_eq!(c.participant_count(), 0);
    }

    #[tokio::test]
    async fn bad_key_material_marks_participant_failed() {
        let sink = RecordingSink::new();
        let c = coordinator(TopologyKind::Sfu, sink);
        c.handle_message(SignalMessage::ParticipantJoined {
            participant_id: pid("bob"),
            name: None,
        })
        .await
        .unwrap();

        let result = c
            .handle_message(SignalMessage::E2eeKey {
                from: pid("bob"),
                to: None,
                key: "AAAA".into(), // decodes to 3 bytes
                generation: 0,
            })
            .await;
        assert!(result.is_err());
        assert!(!c.participants()[0].has_key());
    }

    #[tokio::test]
    async fn key_request_resends_current_key() {
        let sink = RecordingSink::new();
        let c = coordinator(TopologyKind::Sfu, sink.clone());
        c.connect(None).await.unwrap();

        c.handle_message(SignalMessage::E2eeKeyRequest {
            from: pid("bob"),
            to: pid("alice"),
        })
        .await
        .unwrap();
        assert_eq!(sink.key_messages(), vec![(Some(pid("bob")), 0)]);

        // Requests addressed to other participants are not ours.
        c.handle_message(SignalMessage::E2eeKeyRequest {
            from: pid("bob"),
            to: pid("carol"),
        })
        .await
        .unwrap();
        assert_eq!(sink.key_messages().len(), 1);
    }

    #[tokio::test]
    async fn departure_removes_keys_and_roster_entry() {
        let sink = RecordingSink::new();
        let c = coordinator(TopologyKind::Sfu, sink);
        c.handle_message(SignalMessage::E2eeKey {
            from: pid("bob"),
            to: None,
            key: encode_key_material(&[9u8; 32]),
            generation: 0,
        })
        .await
        .unwrap();

        c.handle_message(SignalMessage::ParticipantLeft {
            participant_id: pid("bob"),
        })
        .await
        .unwrap();

        assert_eq!(c.participant_count(), 0);
        assert!(c.keys().with_decryption_key(&pid("bob"), 0, |_| ()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn departures_collapse_into_one_debounced_rotation() {
        let sink = RecordingSink::new();
        let c = coordinator(TopologyKind::Sfu, sink.clone());
        c.connect(None).await.unwrap();

        for peer in ["bob", "carol", "dave"] {
            c.handle_message(SignalMessage::ParticipantJoined {
                participant_id: pid(peer),
                name: None,
            })
            .await
            .unwrap();
        }
        let keys_before_leaves = sink.key_messages().len();

        // Three departures one second apart.
        for peer in ["bob", "carol"] {
            c.handle_message(SignalMessage::ParticipantLeft {
                participant_id: pid(peer),
            })
            .await
            .unwrap();
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        c.handle_message(SignalMessage::ParticipantLeft {
            participant_id: pid("dave"),
        })
        .await
        .unwrap();

        // Just before the quiescence period ends: nothing yet.
        tokio::time::advance(Duration::from_millis(4999)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(sink.key_messages().len(), keys_before_leaves);

        // Cross the deadline: exactly one rotation, 5 s after the last
        // departure.
        tokio::time::advance(Duration::from_millis(2)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let rotations: Vec<_> = sink
            .key_messages()
            .into_iter()
            .skip(keys_before_leaves)
            .collect();
        assert_eq!(rotations, vec![(None, 1)]);
        assert_eq!(c.keys().current_generation(), Some(1));

        // And it stays at one; the earlier timers were cancelled.
        tokio::time::advance(Duration::from_secs(10)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(sink.key_messages().len(), keys_before_leaves + 1);
    }

    #[tokio::test]
    async fn rotate_now_bumps_generation_and_broadcasts() {
        let sink = RecordingSink::new();
        let c = coordinator(TopologyKind::Sfu, sink.clone());
        c.connect(None).await.unwrap();

        let generation = c.rotate_now().await.unwrap();
        assert_eq!(generation, 1);
        assert_eq!(sink.key_messages(), vec![(None, 1)]);
    }

    #[tokio::test]
    async fn maybe_ratchet_follows_the_hint() {
        let sink = RecordingSink::new();
        let mut config = SessionConfig::new(pid("alice"));
        config.ratchet_interval = 2;
        let c = SessionCoordinator::new(config, sink).unwrap();
        c.connect(None).await.unwrap();

        assert!(!c.maybe_ratchet().await.unwrap());
        c.keys().note_frame_sent();
        c.keys().note_frame_sent();
        assert!(c.maybe_ratchet().await.unwrap());
        assert_eq!(c.keys().current_generation(), Some(1));
        // Counter reset by the rotation.
        assert!(!c.maybe_ratchet().await.unwrap());
    }

    #[tokio::test]
    async fn request_key_names_both_ends() {
        let sink = RecordingSink::new();
        let c = coordinator(TopologyKind::Sfu, sink.clone());
        c.request_key(pid("bob")).await.unwrap();
        match &sink.messages()[0] {
            SignalMessage::E2eeKeyRequest { from, to } => {
                assert_eq!(from, &pid("alice"));
                assert_eq!(to, &pid("bob"));
            }
            other => panic!("wrong message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_clears_all_state() {
        let sink = RecordingSink::new();
        let c = coordinator(TopologyKind::Sfu, sink);
        c.connect(None).await.unwrap();
        c.handle_message(SignalMessage::E2eeKey {
            from: pid("bob"),
            to: None,
            key: encode_key_material(&[9u8; 32]),
            generation: 0,
        })
        .await
        .unwrap();

        c.shutdown();
        assert_eq!(c.participant_count(), 0);
        assert!(!c.keys().has_local_key());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_rotation() {
        let sink = RecordingSink::new();
        let c = coordinator(TopologyKind::Sfu, sink.clone());
        c.connect(None).await.unwrap();

        c.handle_message(SignalMessage::ParticipantLeft {
            participant_id: pid("bob"),
        })
        .await
        .unwrap();
        c.shutdown();

        tokio::time::advance(Duration::from_secs(10)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(sink.key_messages().is_empty());
    }
}
