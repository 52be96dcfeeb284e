//! Deterministic random streams for loot and names.
//!
//! RULE: Game rules never touch a platform RNG.
//! Every roll comes from a stream derived from (guild seed, stream index),
//! so replaying the same commands against the same save rolls the same loot.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

pub struct GuildRng {
    inner: Pcg64Mcg,
}

impl GuildRng {
    /// The index must be stable for the thing it rolls for
    /// (e.g. the mission sequence number).
    pub fn new(seed: u64, stream: u64) -> Self {
        let derived = seed ^ stream.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self { inner: Pcg64Mcg::seed_from_u64(derived) }
    }

    /// Uniform roll in `[min, max]`. Swapped bounds are tolerated.
    pub fn roll_between(&mut self, min: u64, max: u64) -> u64 {
        let (low, high) = if min <= max { (min, max) } else { (max, min) };
        self.inner.gen_range(low..=high)
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        items.get(self.inner.gen_range(0..items.len()))
    }
}
