//! BitBabbler MPSSE device driver.
//!
//! Brings a freshly opened FTDI chip into MPSSE mode through the vendor
//! initialization handshake, verifies command/response alignment, and
//! extracts random bytes from status-framed bulk reads.

use std::io;
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::protocol;
use crate::source::{bits_to_bytes, mask_trailing_bits, RandomSource};
use crate::types::{BabblerConfig, DiscoveredDevice};
use crate::usb::{list_devices, RusbTransport, UsbTransport};
use crate::RngError;

/// FTDI vendor ID.
pub const BITBABBLER_VID: u16 = 0x0403;
/// Product ID assigned to the BitBabbler.
pub const BITBABBLER_PID: u16 = 0x7840;

const MODE_SETTLE: Duration = Duration::from_millis(50);
const SETUP_SETTLE: Duration = Duration::from_millis(30);
const PURGE_ATTEMPTS: usize = 10;
const SYNC_READ_ATTEMPTS: usize = 10;
const PURGE_BUF_LEN: usize = 8192;
const SYNC_BUF_LEN: usize = 512;

/// An initialized MPSSE session over a claimed USB device.
///
/// Construction runs the full init handshake; on any failure the transport
/// is dropped, releasing interface, configuration, handle and context — a
/// partially initialized session is never returned. Generic over
/// [`UsbTransport`] so tests can drive it with a scripted chip.
pub struct DeviceSession<T: UsbTransport> {
    transport: T,
    max_packet: usize,
}

impl<T: UsbTransport> std::fmt::Debug for DeviceSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("max_packet", &self.max_packet)
            .finish_non_exhaustive()
    }
}

impl DeviceSession<RusbTransport> {
    /// Open the first connected BitBabbler and initialize it.
    pub fn open(config: &BabblerConfig) -> Result<Self, RngError> {
        let transport = RusbTransport::open(BITBABBLER_VID, BITBABBLER_PID)?;
        Self::with_transport(transport, config)
    }
}

impl<T: UsbTransport> DeviceSession<T> {
    /// Initialize the chip behind an already-open transport.
    ///
    /// The sequence is strict: reset, purge, special chars off, latency
    /// timer, RTS/CTS flow control, bitmode reset then MPSSE with a settle
    /// delay, the two-stage sync check, and finally the combined operating
    /// parameter write. Each step's failure aborts the whole open.
    pub fn with_transport(mut transport: T, config: &BabblerConfig) -> Result<Self, RngError> {
        let bitrate = config.effective_bitrate();
        let latency = config.effective_latency_ms();

        transport.control_out(
            protocol::SIO_RESET,
            protocol::SIO_RESET_SIO,
            protocol::FTDI_INTERFACE_A,
            &[],
        )?;
        purge_read(&mut transport);
        transport.control_out(protocol::SIO_SET_EVENT_CHAR, 0, protocol::FTDI_INTERFACE_A, &[])?;
        transport.control_out(protocol::SIO_SET_ERROR_CHAR, 0, protocol::FTDI_INTERFACE_A, &[])?;
        transport.control_out(
            protocol::SIO_SET_LATENCY_TIMER,
            latency as u16,
            protocol::FTDI_INTERFACE_A,
            &[],
        )?;
        transport.control_out(
            protocol::SIO_SET_FLOW_CTRL,
            0,
            protocol::FLOW_RTS_CTS | protocol::FTDI_INTERFACE_A,
            &[],
        )?;
        transport.control_out(
            protocol::SIO_SET_BITMODE,
            protocol::BITMODE_RESET,
            protocol::FTDI_INTERFACE_A,
            &[],
        )?;
        transport.control_out(
            protocol::SIO_SET_BITMODE,
            protocol::BITMODE_MPSSE,
            protocol::FTDI_INTERFACE_A,
            &[],
        )?;
        // The chip needs quiescence to switch modes cleanly.
        thread::sleep(MODE_SETTLE);

        // A previous session may have left stale bytes in the pipeline.
        // Both probe echoes must come back in step; the whole two-stage
        // sequence is retried once before giving up.
        let mut synced = check_sync(&mut transport, protocol::SYNC_PROBE_A)
            && check_sync(&mut transport, protocol::SYNC_PROBE_B);
        if !synced {
            warn!("MPSSE sync check failed, retrying");
            synced = check_sync(&mut transport, protocol::SYNC_PROBE_A)
                && check_sync(&mut transport, protocol::SYNC_PROBE_B);
        }
        if !synced {
            return Err(RngError::SyncFailed);
        }

        transport.bulk_write(&protocol::build_setup(bitrate))?;
        thread::sleep(SETUP_SETTLE);
        purge_read(&mut transport);

        let max_packet = transport.max_packet_size();
        debug!("MPSSE session ready: {bitrate} Hz bit clock, {latency} ms latency, {max_packet} byte packets");
        Ok(Self { transport, max_packet })
    }

    /// Fill `buf` with random bytes in one MPSSE exchange.
    ///
    /// Loops on the IN endpoint until the requested payload has been
    /// accumulated, discarding the 2-byte status header at every max-packet
    /// stride. I/O errors are surfaced as-is; the driver does not retry.
    pub fn read_random(&mut self, buf: &mut [u8]) -> Result<usize, RngError> {
        if buf.is_empty() {
            return Ok(0);
        }
        if buf.len() > protocol::MAX_READ_LEN {
            return Err(RngError::InvalidArgument(format!(
                "read of {} bytes exceeds the {}-byte MPSSE exchange limit",
                buf.len(),
                protocol::MAX_READ_LEN
            )));
        }
        self.transport.bulk_write(&protocol::build_read_request(buf.len()))?;

        let mut chunk =
            vec![0u8; protocol::round_up_to_packet(buf.len(), self.max_packet) + self.max_packet];
        let mut got = 0;
        while got < buf.len() {
            let n = self.transport.bulk_read(&mut chunk)?;
            if n <= protocol::STATUS_HEADER_LEN {
                continue;
            }
            got = protocol::extract_payload(&chunk[..n], self.max_packet, buf, got);
        }
        trace!("read {got} random bytes");
        Ok(got)
    }

    /// Fill a buffer of any size, chunking across MPSSE exchanges.
    pub fn fill(&mut self, buf: &mut [u8]) -> Result<(), RngError> {
        let mut offset = 0;
        while offset < buf.len() {
            let end = (offset + protocol::MAX_READ_LEN).min(buf.len());
            offset += self.read_random(&mut buf[offset..end])?;
        }
        Ok(())
    }

    /// Max packet size of the bulk IN endpoint.
    pub fn max_packet_size(&self) -> usize {
        self.max_packet
    }

    /// Release the device. Dropping the session does the same.
    pub fn close(self) {
        drop(self);
    }
}

/// Drain residual bytes from the read path. Bounded by attempt count, not
/// time: a packet of status alone means the pipeline is empty.
fn purge_read<T: UsbTransport>(transport: &mut T) {
    let mut scratch = vec![0u8; PURGE_BUF_LEN];
    for _ in 0..PURGE_ATTEMPTS {
        match transport.bulk_read(&mut scratch) {
            Ok(n) if n <= protocol::STATUS_HEADER_LEN => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
}

/// Send one bogus opcode and look for its bad-command echo within a bounded
/// number of reads.
fn check_sync<T: UsbTransport>(transport: &mut T, probe: u8) -> bool {
    if transport.bulk_write(&protocol::build_sync_probe(probe)).is_err() {
        return false;
    }
    let mut buf = [0u8; SYNC_BUF_LEN];
    for _ in 0..SYNC_READ_ATTEMPTS {
        if let Ok(n) = transport.bulk_read(&mut buf) {
            if protocol::is_sync_echo(&buf[..n], probe) {
                return true;
            }
        }
    }
    false
}

/// BitBabbler as a [`RandomSource`]: one device session opened up front,
/// batches trimmed to the exact requested bit count.
pub struct BitBabbler<T: UsbTransport = RusbTransport> {
    session: DeviceSession<T>,
}

impl BitBabbler<RusbTransport> {
    /// Open the first connected BitBabbler.
    pub fn open(config: &BabblerConfig) -> Result<Self, RngError> {
        Ok(Self { session: DeviceSession::open(config)? })
    }

    /// Enumerate connected BitBabblers without opening a session.
    pub fn detect() -> Result<Vec<DiscoveredDevice>, RngError> {
        list_devices(BITBABBLER_VID, BITBABBLER_PID)
    }

    /// One-shot convenience: open the device, read `bits`, close.
    pub fn read_bits_once(bits: usize, config: &BabblerConfig) -> Result<Vec<u8>, RngError> {
        // Validate before touching the hardware.
        bits_to_bytes(bits)?;
        let mut babbler = Self::open(config)?;
        babbler.read_bits(bits)
    }
}

impl<T: UsbTransport> BitBabbler<T> {
    /// Wrap an already-initialized session.
    pub fn from_session(session: DeviceSession<T>) -> Self {
        Self { session }
    }

    /// Release the device.
    pub fn close(self) {
        self.session.close();
    }
}

impl<T: UsbTransport> RandomSource for BitBabbler<T> {
    fn read_bits(&mut self, bits: usize) -> Result<Vec<u8>, RngError> {
        let mut buf = vec![0u8; bits_to_bytes(bits)?];
        self.session.fill(&mut buf)?;
        mask_trailing_bits(&mut buf, bits);
        Ok(buf)
    }
}

impl<T: UsbTransport> io::Read for BitBabbler<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.session.fill(buf).map_err(io::Error::other)?;
        Ok(buf.len())
    }
}
