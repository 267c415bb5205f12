//! Software random sources: the OS entropy pool and a deterministic,
//! seedable generator for reproducible runs.

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use crate::source::{bits_to_bytes, mask_trailing_bits, RandomSource};
use crate::RngError;

/// Pass-through to the operating system's entropy source.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRng;

impl SystemRng {
    pub fn new() -> Self {
        Self
    }
}

impl RandomSource for SystemRng {
    fn read_bits(&mut self, bits: usize) -> Result<Vec<u8>, RngError> {
        let mut buf = vec![0u8; bits_to_bytes(bits)?];
        getrandom::fill(&mut buf)
            .map_err(|e| RngError::Transfer(format!("OS entropy source failed: {e}")))?;
        mask_trailing_bits(&mut buf, bits);
        Ok(buf)
    }
}

/// Deterministic generator for reproducible streams. Not suitable as an
/// entropy source; it exists so collection runs can be replayed.
pub struct SeededRng {
    rng: SmallRng,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        Self { rng: SmallRng::seed_from_u64(seed) }
    }

    /// Draw the seed from the OS entropy pool.
    pub fn from_os_entropy() -> Result<Self, RngError> {
        let mut seed = [0u8; 8];
        getrandom::fill(&mut seed)
            .map_err(|e| RngError::Transfer(format!("OS entropy source failed: {e}")))?;
        Ok(Self::new(u64::from_le_bytes(seed)))
    }
}

impl RandomSource for SeededRng {
    fn read_bits(&mut self, bits: usize) -> Result<Vec<u8>, RngError> {
        let mut buf = vec![0u8; bits_to_bytes(bits)?];
        self.rng.fill_bytes(&mut buf);
        mask_trailing_bits(&mut buf, bits);
        Ok(buf)
    }
}
