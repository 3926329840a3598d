//! Deterministic Random Number Generator
//!
//! Xorshift-family PRNG seeded through SplitMix64. Every random decision the
//! arena makes (crate placement, power-up drops) is drawn from a generator
//! whose seed is derived from shared room data, so any replica that makes the
//! same decision draws the same outcome.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

/// Deterministic PRNG.
///
/// # Example
///
/// ```
/// use blast_arena::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state so that sequential
    /// seeds still produce unrelated streams.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // State must never be all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create an RNG dedicated to one event of a room.
    ///
    /// Two replicas resolving the same bomb get the same stream, which makes
    /// duplicate resolution converge on identical crate drops.
    pub fn for_event(room_seed: u64, event_key: &[u8]) -> Self {
        Self::new(derive_seed(b"BLAST_ARENA_EVENT_V1", room_seed, event_key))
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random u32.
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        (self.next_u64() % max as u64) as u32
    }

    /// Generate a float in [0, 1).
    #[inline]
    pub fn next_f32(&mut self) -> f32 {
        // 24 mantissa bits
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Return true with the given percent probability (0..=100).
    #[inline]
    pub fn percent(&mut self, chance: u32) -> bool {
        self.next_int(100) < chance
    }

    /// Pick an item from a weighted table.
    ///
    /// Returns `None` for an empty table or when every weight is zero.
    pub fn weighted<T: Copy>(&mut self, table: &[(T, u32)]) -> Option<T> {
        let total: u32 = table.iter().map(|(_, w)| *w).sum();
        if total == 0 {
            return None;
        }
        let mut roll = self.next_int(total);
        for (item, weight) in table {
            if roll < *weight {
                return Some(*item);
            }
            roll -= weight;
        }
        None
    }
}

/// SplitMix64 for seed initialization.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a 64-bit seed from a domain, a base seed and a key.
pub fn derive_seed(domain: &[u8], base_seed: u64, key: &[u8]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(base_seed.to_le_bytes());
    hasher.update(key);
    let hash = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(seed)
}

/// Derive the grid seed for a room from its id.
pub fn derive_room_seed(room_id: &[u8; 16]) -> u64 {
    derive_seed(b"BLAST_ARENA_ROOM_V1", 0, room_id)
}

// =============================================================================
// TESTS
// =============================================================================
