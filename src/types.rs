use std::time::SystemTime;

/// A device found during enumeration. Every field is best effort — a
/// descriptor with nothing but a working open path is still usable.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    /// Platform location, e.g. `bus 001 device 004 port 1.2`.
    pub device_path: String,
    /// Raw identifier strings the filter matched on, e.g. `0403:7840`.
    pub hardware_ids: Vec<String>,
    /// Product string, when the descriptor could be read.
    pub friendly_name: Option<String>,
}

/// One delivered batch of random bits.
///
/// `data` holds `ceil(bits_requested / 8)` bytes; when `bits_requested` is
/// not a multiple of 8 the low-order unused bits of the last byte are zero.
#[derive(Debug, Clone)]
pub struct ReadResult {
    /// When the read completed.
    pub timestamp: SystemTime,
    /// Number of bits the collector asked for.
    pub bits_requested: usize,
    /// The batch, trimmed to the requested bit count.
    pub data: Vec<u8>,
}

/// BitBabbler tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct BabblerConfig {
    /// Desired bit clock in Hz. Zero selects the conservative default.
    pub bitrate: u32,
    /// FTDI latency timer in milliseconds (1-255); how long the chip
    /// buffers bytes before flushing a USB packet. Zero selects the default.
    pub latency_ms: u8,
}

/// Vendor default bit clock.
pub const DEFAULT_BITRATE: u32 = 2_500_000;
/// Vendor default latency timer.
pub const DEFAULT_LATENCY_MS: u8 = 1;

impl Default for BabblerConfig {
    fn default() -> Self {
        Self { bitrate: DEFAULT_BITRATE, latency_ms: DEFAULT_LATENCY_MS }
    }
}

impl BabblerConfig {
    pub(crate) fn effective_bitrate(&self) -> u32 {
        if self.bitrate == 0 {
            DEFAULT_BITRATE
        } else {
            self.bitrate
        }
    }

    pub(crate) fn effective_latency_ms(&self) -> u8 {
        if self.latency_ms == 0 {
            DEFAULT_LATENCY_MS
        } else {
            self.latency_ms
        }
    }
}
