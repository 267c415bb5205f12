//! The random source capability shared by every backend.
//!
//! Hardware USB, hardware serial and software generators all implement
//! [`RandomSource`], so the collector is written once against the trait.

use std::time::Duration;

use crate::collector::{CancelToken, Collector};
use crate::types::ReadResult;
use crate::RngError;

/// A producer of random bits.
pub trait RandomSource {
    /// Read `bits` random bits.
    ///
    /// Returns exactly `ceil(bits / 8)` bytes; when `bits` is not a
    /// multiple of 8, the low-order unused bits of the final byte are zero.
    /// A zero bit count fails with `InvalidArgument` before any I/O.
    fn read_bits(&mut self, bits: usize) -> Result<Vec<u8>, RngError>;

    /// Read `bits` every `period`, handing each batch to `on_batch`, until
    /// cancelled (returns `Ok`) or a read fails (returns the error).
    fn collect_at_interval(
        &mut self,
        bits: usize,
        period: Duration,
        cancel: &CancelToken,
        on_batch: &mut dyn FnMut(ReadResult),
    ) -> Result<(), RngError> {
        Collector::new(bits, period)?.run(self, cancel, on_batch)
    }
}

/// Validate a requested bit count and convert it to whole bytes.
pub(crate) fn bits_to_bytes(bits: usize) -> Result<usize, RngError> {
    if bits == 0 {
        return Err(RngError::InvalidArgument(
            "bit count must be greater than zero".into(),
        ));
    }
    Ok(bits.div_ceil(8))
}

/// Zero the unused low-order bits of the final byte so the buffer carries
/// exactly `bits` bits, MSB-first.
pub(crate) fn mask_trailing_bits(buf: &mut [u8], bits: usize) {
    let rem = bits % 8;
    if rem != 0 {
        if let Some(last) = buf.last_mut() {
            *last &= 0xFF << (8 - rem);
        }
    }
}
