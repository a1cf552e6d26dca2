//! Topology policy: how sender keys flow between participants.
//!
//! The policy never touches key material; it only decides who a key
//! message is addressed to and guarantees the server is never a key
//! holder.

use serde::{Deserialize, Serialize};

use sealcast_protocol::ParticipantId;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    /// Two participants, direct connection.
    P2p,
    /// Full mesh; every peer connects to every other.
    Mesh,
    /// Central server relays media; keys still travel end-to-end.
    Star,
    /// Selective forwarding unit relays media.
    #[default]
    Sfu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDistribution {
    /// The sender addresses each peer directly.
    DirectBroadcast,
    /// The sender emits one message and the server fans it out without
    /// being able to read the material inside.
    ServerRelayed,
}

impl TopologyKind {
    /// Fixed mapping; p2p and mesh share direct-broadcast semantics.
    pub fn key_distribution(self) -> KeyDistribution {
        match self {
            TopologyKind::P2p | TopologyKind::Mesh => KeyDistribution::DirectBroadcast,
            TopologyKind::Star | TopologyKind::Sfu => KeyDistribution::ServerRelayed,
        }
    }
}

/// Immutable wiring policy for one session.
#[derive(Debug, Clone, Deserialize)]
pub struct TopologyConfig {
    pub kind: TopologyKind,
    /// Constant false; deserialized configurations claiming otherwise
    /// fail validation.
    #[serde(default)]
    server_can_access_keys: bool,
    /// Signaling hops a key message may take to reach a peer.
    #[serde(default = "default_max_hops")]
    pub max_hops: u8,
}

fn default_max_hops() -> u8 {
    2
}

impl TopologyConfig {
    pub fn new(kind: TopologyKind) -> Self {
        let max_hops = match kind.key_distribution() {
            KeyDistribution::DirectBroadcast => 1,
            KeyDistribution::ServerRelayed => 2,
        };
        Self {
            kind,
            server_can_access_keys: false,
            max_hops,
        }
    }

    pub fn key_distribution(&self) -> KeyDistribution {
        self.kind.key_distribution()
    }

    pub fn server_can_access_keys(&self) -> bool {
        self.server_can_access_keys
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.server_can_access_keys {
            return Err(SessionError::ServerKeyAccess);
        }
        let needed = match self.key_distribution() {
            KeyDistribution::DirectBroadcast => 1,
            KeyDistribution::ServerRelayed => 2,
        };
        if self.max_hops < needed {
            return Err(SessionError::InvalidConfig {
                reason: format!(
                    "max_hops {} leaves peers without a key path under {:?}",
                    self.max_hops, self.kind
                ),
            });
        }
        Ok(())
    }

    /// Who an outbound key from `from` must be addressed to. Empty for
    /// server-relayed kinds: the single broadcast message fans out there.
    pub fn distribution_targets(
        &self,
        from: &ParticipantId,
        peers: &[ParticipantId],
    ) -> Vec<ParticipantId> {
        match self.key_distribution() {
            KeyDistribution::DirectBroadcast => {
                peers.iter().filter(|p| *p != from).cloned().collect()
            }
            KeyDistribution::ServerRelayed => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::new(s).unwrap()
    }

    #[test]
    fn wire_names_are_lowercase() {
        assert_eq!(serde_json::to_string(&TopologyKind::P2p).unwrap(), "\"p2p\"");
        assert_eq!(serde_json::to_string(&TopologyKind::Mesh).unwrap(), "\"mesh\"");
        assert_eq!(serde_json::to_string(&TopologyKind::Star).unwrap(), "\"star\"");
        assert_eq!(serde_json::to_string(&TopologyKind::Sfu).unwrap(), "\"sfu\"");
    }

    #[test]
    fn distribution_mapping_is_fixed() {
        assert_eq!(
            TopologyKind::P2p.key_distribution(),
            KeyDistribution::DirectBroadcast
        );
        assert_eq!(
            TopologyKind::Mesh.key_distribution(),
            KeyDistribution::DirectBroadcast
        );
        assert_eq!(
            TopologyKind::Star.key_distribution(),
            KeyDistribution::ServerRelayed
        );
        assert_eq!(
            TopologyKind::Sfu.key_distribution(),
            KeyDistribution::ServerRelayed
        );
    }

    #[test]
    fn server_never_gets_key_access() {
        for kind in [
            TopologyKind::P2p,
            TopologyKind::Mesh,
            TopologyKind::Star,
            TopologyKind::Sfu,
        ] {
            let config = TopologyConfig::new(kind);
            assert!(!config.server_can_access_keys());
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn deserialized_server_access_fails_validation() {
        let json = r#"{"kind":"sfu","server_can_access_keys":true}"#;
        let config: TopologyConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(
            config.validate(),
            Err(SessionError::ServerKeyAccess)
        ));
    }

    #[test]
    fn insufficient_hops_fail_validation() {
        let json = r#"{"kind":"sfu","max_hops":1}"#;
        let config: TopologyConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(
            config.validate(),
            Err(SessionError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn broadcast_targets_every_peer_but_self() {
        let config = TopologyConfig::new(TopologyKind::Mesh);
        let peers = [pid("a"), pid("b"), pid("c")];
        let targets = config.distribution_targets(&pid("b"), &peers);
        assert_eq!(targets, vec![pid("a"), pid("c")]);
    }

    #[test]
    fn relayed_kinds_have_no_direct_targets() {
        let config = TopologyConfig::new(TopologyKind::Sfu);
        let peers = [pid("a"), pid("b")];
        assert!(config.distribution_targets(&pid("a"), &peers).is_empty());
    }
}
