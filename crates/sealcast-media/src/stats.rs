/// Counters for the send-side transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncryptStats {
    pub frames_encrypted: u64,
    /// Frames forwarded unchanged because no local key was set yet.
    pub pass_through: u64,
}

/// Counters for the receive-side transform. Dropped frames land in
/// exactly one of the rejection buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecryptStats {
    pub frames_decrypted: u64,
    /// Frames too short to carry a header, forwarded unchanged.
    pub pass_through: u64,
    pub auth_failures: u64,
    pub unknown_generation: u64,
    pub replays_rejected: u64,
    pub too_old_rejected: u64,
}

impl DecryptStats {
    pub fn frames_dropped(&self) -> u64 {
        self.auth_failures + self.unknown_generation + self.replays_rejected + self.too_old_rejected
    }
}
