//! Deterministic random number generation.
//!
//! RULE: Nothing in a phase's process() may call any platform RNG.
//! All randomness flows through a GameRng seeded from the seed stamped
//! into the Action being processed.
//!
//! The host derives each action's seed from (master_seed, sequence),
//! so a client that knows the master seed and the sequence slot its
//! action will occupy can predict the same draws.

use crate::types::Sequence;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};

/// What a draw represents. Values are always in `1..=sides` for dice,
/// `0..n` for `Below`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "n", rename_all = "snake_case")]
pub enum DrawKind {
    D6,
    D3,
    Below(u32),
}

/// One recorded call to `GameRng::draw`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngDraw {
    pub kind:   DrawKind,
    pub values: Vec<u32>,
}

/// A seeded generator that records every draw it makes.
pub struct GameRng {
    seed:  u64,
    inner: Pcg64Mcg,
    draws: Vec<RngDraw>,
}

impl GameRng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            inner: Pcg64Mcg::seed_from_u64(seed),
            draws: Vec::new(),
        }
    }

    /// Self-seed from the platform entropy source.
    /// Only for single-peer runs; networked sessions always pass a seed.
    pub fn from_entropy() -> Self {
        Self::new(rand::thread_rng().gen())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Draw `n` values of `kind`, recording them.
    pub fn draw(&mut self, kind: DrawKind, n: usize) -> Vec<u32> {
        let values: Vec<u32> = (0..n).map(|_| self.one(kind)).collect();
        self.draws.push(RngDraw { kind, values: values.clone() });
        values
    }

    pub fn draws(&self) -> &[RngDraw] {
        &self.draws
    }

    pub fn into_draws(self) -> Vec<RngDraw> {
        self.draws
    }

    fn one(&mut self, kind: DrawKind) -> u32 {
        match kind {
            DrawKind::D6 => 1 + self.below(6),
            DrawKind::D3 => 1 + self.below(3),
            DrawKind::Below(n) => self.below(n.max(1)),
        }
    }

    /// Uniform in [0, n) without modulo bias.
    fn below(&mut self, n: u32) -> u32 {
        self.inner.gen_range(0..n)
    }
}

/// Derives per-action seeds from the session master seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RngBank {
    master_seed: u64,
}

impl RngBank {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Seed for the action occupying global slot `sequence`.
    /// NEVER change this derivation: stored logs replay through it.
    pub fn seed_for(&self, sequence: Sequence) -> u64 {
        self.master_seed ^ sequence.wrapping_mul(0x9e37_79b9_7f4a_7c15)
    }

    pub fn rng_for(&self, sequence: Sequence) -> GameRng {
        GameRng::new(self.seed_for(sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = GameRng::new(42);
        let mut b = GameRng::new(42);
        assert_eq!(a.draw(DrawKind::D6, 20), b.draw(DrawKind::D6, 20));
        assert_eq!(a.draw(DrawKind::Below(100), 5), b.draw(DrawKind::Below(100), 5));
        assert_eq!(a.draws(), b.draws());
    }

    #[test]
    fn dice_stay_in_range() {
        let mut rng = GameRng::new(7);
        assert!(rng.draw(DrawKind::D6, 500).iter().all(|v| (1..=6).contains(v)));
        assert!(rng.draw(DrawKind::D3, 500).iter().all(|v| (1..=3).contains(v)));
        assert_eq!(rng.draws().len(), 2);
    }

    #[test]
    fn bank_slots_differ() {
        let bank = RngBank::new(42);
        assert_ne!(bank.seed_for(1), bank.seed_for(2));
        assert_eq!(bank.seed_for(3), RngBank::new(42).seed_for(3));
    }
}
