//! Uniform random numbers for draws and auto-picked tickets.
//!
//! All sampling goes through an [`EntropySource`], so the OS generator can be
//! swapped for a seeded one when a run has to be reproduced.

use crate::error::{LotteryError, Result};
use crate::types::{LOTTO_MAX_NUMBER, LOTTO_MIN_NUMBER, LOTTO_SELECTION_SIZE};
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use std::collections::BTreeSet;
use std::sync::Arc;

const SALT_LENGTH: usize = 8;

pub trait EntropySource: Send + Sync {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()>;
}

/// Operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| LotteryError::entropy(e.to_string()))
    }
}

/// Deterministic entropy for replays and tests. Not for live draws.
pub struct SeededEntropy {
    rng: Mutex<StdRng>,
}

impl SeededEntropy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl EntropySource for SeededEntropy {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()> {
        self.rng.lock().fill_bytes(dest);
        Ok(())
    }
}

#[derive(Clone)]
pub struct RandomSource {
    entropy: Arc<dyn EntropySource>,
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::new(Arc::new(OsEntropy))
    }
}

impl std::fmt::Debug for RandomSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomSource").finish_non_exhaustive()
    }
}

impl RandomSource {
    pub fn new(entropy: Arc<dyn EntropySource>) -> Self {
        Self { entropy }
    }

    fn random_u32(&self) -> Result<u32> {
        let mut buffer = [0u8; 4];
        self.entropy.fill_bytes(&mut buffer)?;
        Ok(u32::from_le_bytes(buffer))
    }

    /// Uniform integer in `[min, max]`.
    ///
    /// Candidates at or above the largest multiple of the range that fits in
    /// 32 bits are rejected, so the final modulo carries no bias.
    pub fn random_uniform_int(&self, min: u32, max: u32) -> Result<u32> {
        if max < min {
            return Err(LotteryError::RangeTooSmall {
                needed: 1,
                available: 0,
            });
        }

        let range = u64::from(max - min) + 1;
        let space = 1u64 << 32;
        let limit = space - space % range;

        loop {
            let candidate = u64::from(self.random_u32()?);
            if candidate < limit {
                // candidate % range < range <= 2^32, fits back into u32
                return Ok(min + (candidate % range) as u32);
            }
        }
    }

    /// `count` distinct values in `[min, max]` outside `exclude`, ascending.
    pub fn unique_numbers(&self, count: usize, min: u8, max: u8, exclude: &[u8]) -> Result<Vec<u8>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let excluded: BTreeSet<u8> = exclude.iter().copied().collect();
        let available = if max < min {
            0
        } else {
            (min..=max).filter(|n| !excluded.contains(n)).count()
        };

        if available < count {
            return Err(LotteryError::RangeTooSmall {
                needed: count,
                available,
            });
        }

        let mut results = BTreeSet::new();
        while results.len() < count {
            let candidate = self.random_uniform_int(u32::from(min), u32::from(max))? as u8;
            if !excluded.contains(&candidate) {
                results.insert(candidate);
            }
        }

        Ok(results.into_iter().collect())
    }

    /// Opaque seed for audit and display: timestamp plus random salt.
    pub fn draw_seed(&self) -> Result<String> {
        let mut salt = [0u8; SALT_LENGTH];
        self.entropy.fill_bytes(&mut salt)?;

        Ok(format!(
            "{}-{}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            hex::encode(salt)
        ))
    }

    /// One lotto number not already in `existing`.
    pub fn next_draw_number(&self, existing: &[u8]) -> Result<u8> {
        let taken: BTreeSet<u8> = existing
            .iter()
            .copied()
            .filter(|n| (LOTTO_MIN_NUMBER..=LOTTO_MAX_NUMBER).contains(n))
            .collect();

        if taken.len() >= usize::from(LOTTO_MAX_NUMBER - LOTTO_MIN_NUMBER + 1) {
            return Err(LotteryError::RangeExhausted);
        }

        loop {
            let candidate = self
                .random_uniform_int(u32::from(LOTTO_MIN_NUMBER), u32::from(LOTTO_MAX_NUMBER))?
                as u8;
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
        }
    }

    /// Fills a partial pick up to `target` numbers, keeping the caller's choices.
    pub fn complete_selection(&self, base: &[u8], target: usize) -> Result<Vec<u8>> {
        let unique: BTreeSet<u8> = base
            .iter()
            .copied()
            .filter(|n| (LOTTO_MIN_NUMBER..=LOTTO_MAX_NUMBER).contains(n))
            .collect();

        if unique.len() > target {
            return Err(LotteryError::InvalidSelection {
                expected: target,
                actual: unique.len(),
            });
        }

        let kept: Vec<u8> = unique.iter().copied().collect();
        let generated = self.unique_numbers(
            target - kept.len(),
            LOTTO_MIN_NUMBER,
            LOTTO_MAX_NUMBER,
            &kept,
        )?;

        let mut completed: BTreeSet<u8> = unique;
        completed.extend(generated);
        Ok(completed.into_iter().collect())
    }

    /// A full ticket's worth of numbers.
    pub fn quick_pick(&self) -> Result<Vec<u8>> {
        self.complete_selection(&[], LOTTO_SELECTION_SIZE)
    }
}
