//! Session layer of the sealcast E2EE core.
//!
//! Wires the crypto engine to a call: per-session configuration, the
//! participant roster, the topology policy deciding how keys flow, and
//! the coordinator that dispatches signaling messages and rotates keys.
//!
//! A process may host any number of coordinators side by side; there is
//! no global state.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod roster;
pub mod topology;

pub use config::SessionConfig;
pub use coordinator::{SessionCoordinator, SignalingSink};
pub use error::SessionError;
pub use roster::{KeyStatus, Participant, Role, Roster, RosterEvent};
pub use topology::{KeyDistribution, TopologyConfig, TopologyKind};
