//! Sliding-window replay protection over 32-bit sequence numbers.
//!
//! One window per remote sender. The bitmap covers the `W` sequence
//! numbers ending at `highest_seen`: bit 0 is `highest_seen` itself, bit
//! `i` is `highest_seen - i`. Checks run after the AEAD verifies, so a
//! forged packet cannot burn window slots.

use std::collections::HashMap;

use thiserror::Error;

use sealcast_protocol::ParticipantId;

/// Smallest allowed window, in bits.
pub const MIN_WINDOW_BITS: usize = 64;

/// Largest allowed window, in bits.
pub const MAX_WINDOW_BITS: usize = 4096;

/// Default window, in bits.
pub const DEFAULT_WINDOW_BITS: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("window size must be a power of two in {MIN_WINDOW_BITS}..={MAX_WINDOW_BITS} bits, got {got}")]
pub struct InvalidWindowSize {
    pub got: usize,
}

/// Outcome of a single sequence-number check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// First sighting; the window has been updated.
    Accepted,
    /// Already seen inside the window.
    Replay,
    /// Below the window; cannot distinguish from a replay.
    TooOld,
}

impl Verdict {
    pub fn is_accepted(self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// Per-window counters. Every submission lands in exactly one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub frames_accepted: u64,
    pub replays_detected: u64,
    pub too_old_rejected: u64,
}

impl ReplayStats {
    pub fn total_submissions(&self) -> u64 {
        self.frames_accepted + self.replays_detected + self.too_old_rejected
    }
}

/// Sliding bitmap window for one sender.
pub struct ReplayWindow {
    window_bits: usize,
    wrap_allowed: bool,
    highest_seen: Option<u32>,
    bitmap: Vec<u64>,
    stats: ReplayStats,
}

impl ReplayWindow {
    pub fn new(window_bits: usize, allow_wrap_around: bool) -> Result<Self, InvalidWindowSize> {
        if !window_bits.is_power_of_two()
            || !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&window_bits)
        {
            return Err(InvalidWindowSize { got: window_bits });
        }
        Ok(Self {
            window_bits,
            wrap_allowed: allow_wrap_around,
            highest_seen: None,
            bitmap: vec![0u64; window_bits / 64],
            stats: ReplayStats::default(),
        })
    }

    pub fn window_bits(&self) -> usize {
        self.window_bits
    }

    pub fn highest_seen(&self) -> Option<u32> {
        self.highest_seen
    }

    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    /// Check one sequence number, updating the window on acceptance.
    pub fn check(&mut self, seq: u32) -> Verdict {
        let Some(highest) = self.highest_seen else {
            self.highest_seen = Some(seq);
            self.set_bit(0);
            self.stats.frames_accepted += 1;
            return Verdict::Accepted;
        };

        if seq == highest {
            self.stats.replays_detected += 1;
            return Verdict::Replay;
        }

        let ahead = if self.wrap_allowed {
            // Signed-distance comparator modulo 2^32.
            seq.wrapping_sub(highest) < 0x8000_0000
        } else {
            seq > highest
        };

        if ahead {
            let advance = seq.wrapping_sub(highest);
            self.shift(advance);
            self.highest_seen = Some(seq);
            self.set_bit(0);
            self.stats.frames_accepted += 1;
            return Verdict::Accepted;
        }

        // Behind the highest accepted sequence number. Without wrap
        // tolerance an apparent wrap lands here and the distance is huge,
        // so it rejects as too old; callers rotate keys before 2^32 frames.
        let offset = highest.wrapping_sub(seq);
        if offset as u64 >= self.window_bits as u64 {
            self.stats.too_old_rejected += 1;
            return Verdict::TooOld;
        }

        if self.test_bit(offset as usize) {
            self.stats.replays_detected += 1;
            Verdict::Replay
        } else {
            self.set_bit(offset as usize);
            self.stats.frames_accepted += 1;
            Verdict::Accepted
        }
    }

    fn test_bit(&self, offset: usize) -> bool {
        self.bitmap[offset / 64] & (1u64 << (offset % 64)) != 0
    }

    fn set_bit(&mut self, offset: usize) {
        self.bitmap[offset / 64] |= 1u64 << (offset % 64);
    }

    /// Slide the window forward by `advance` positions: every recorded bit
    /// moves to a higher offset and bits past the window edge fall off.
    fn shift(&mut self, advance: u32) {
        if advance as u64 >= self.window_bits as u64 {
            self.bitmap.fill(0);
            return;
        }
        let word_shift = (advance / 64) as usize;
        let bit_shift = advance % 64;
        let words = self.bitmap.len();
        for i in (0..words).rev() {
            let mut w = if i >= word_shift {
                self.bitmap[i - word_shift]
            } else {
                0
            };
            if bit_shift != 0 {
                w <<= bit_shift;
                if i > word_shift {
                    w |= self.bitmap[i - word_shift - 1] >> (64 - bit_shift);
                }
            }
            self.bitmap[i] = w;
        }
    }
}

/// Windows for every active remote sender, created lazily on first frame.
///
/// Memory per sender is `window_bits / 8` bytes plus bookkeeping.
pub struct ReplayManager {
    window_bits: usize,
    allow_wrap_around: bool,
    windows: HashMap<ParticipantId, ReplayWindow>,
}

impl ReplayManager {
    pub fn new(window_bits: usize, allow_wrap_around: bool) -> Result<Self, InvalidWindowSize> {
        // Validate once up front so per-sender creation cannot fail later.
        ReplayWindow::new(window_bits, allow_wrap_around)?;
        Ok(Self {
            window_bits,
            allow_wrap_around,
            windows: HashMap::new(),
        })
    }

    pub fn check(&mut self, sender: &ParticipantId, seq: u32) -> Verdict {
        if !self.windows.contains_key(sender) {
            let window = ReplayWindow::new(self.window_bits, self.allow_wrap_around)
                .expect("validated in constructor");
            self.windows.insert(sender.clone(), window);
        }
        self.windows
            .get_mut(sender)
            .expect("inserted above")
            .check(seq)
    }

    /// Drop the window for a departed sender. Returns whether one existed.
    pub fn remove_sender(&mut self, sender: &ParticipantId) -> bool {
        self.windows.remove(sender).is_some()
    }

    pub fn sender_count(&self) -> usize {
        self.windows.len()
    }

    pub fn stats(&self, sender: &ParticipantId) -> Option<ReplayStats> {
        self.windows.get(sender).map(|w| w.stats())
    }
}

impl Default for ReplayManager {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_BITS, false).expect("default window size is valid")
    }
}
