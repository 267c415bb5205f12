//! # rngkit
//!
//! Drivers for hardware true random number generators — the BitBabbler
//! (an FTDI chip in MPSSE bit-bang mode, spoken to over raw USB) and the
//! TrueRNG serial device — plus software fallbacks, behind one
//! [`RandomSource`] capability with a fixed-interval collection loop.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use rngkit::{BabblerConfig, BitBabbler, CancelToken, RandomSource};
//!
//! let mut trng = BitBabbler::open(&BabblerConfig::default())?;
//!
//! // One batch: 2048 bits, returned as 256 bytes.
//! let bytes = trng.read_bits(2048)?;
//! println!("{:02x?}", &bytes[..8]);
//!
//! // Or collect a batch every second until cancelled.
//! let cancel = CancelToken::new();
//! trng.collect_at_interval(2048, Duration::from_secs(1), &cancel, &mut |batch| {
//!     println!("{} bits at {:?}", batch.bits_requested, batch.timestamp);
//! })?;
//! # Ok::<(), rngkit::RngError>(())
//! ```

pub mod collector;
pub mod device;
pub mod protocol;
pub mod serial;
pub mod software;
pub mod source;
pub mod types;
pub mod usb;

pub use collector::{CancelToken, Collector, CollectorState};
pub use device::{BitBabbler, DeviceSession, BITBABBLER_PID, BITBABBLER_VID};
pub use serial::{find_ports, TrueRng};
pub use software::{SeededRng, SystemRng};
pub use source::RandomSource;
pub use types::{BabblerConfig, DiscoveredDevice, ReadResult};
pub use usb::{list_devices, RusbTransport, UsbTransport};

/// Errors returned by the rngkit drivers and collector.
#[derive(Debug, thiserror::Error)]
pub enum RngError {
    /// No matching device present at open time.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Device present but it does not expose the expected bulk endpoint pair.
    #[error("endpoint resolution failed: {0}")]
    EndpointResolution(String),

    /// MPSSE command/response channel could not be aligned, retry included.
    #[error("MPSSE synchronization failed")]
    SyncFailed,

    /// Control, bulk, or serial I/O failure.
    #[error("transfer error: {0}")]
    Transfer(String),

    /// Caller contract violation (non-positive bit count or period).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
