//! TrueRNG serial random source.
//!
//! The TrueRNG streams raw entropy over a USB CDC serial port: no command
//! protocol, just open the port, assert DTR, and read. Reads run under a
//! fixed overall deadline rather than per-call timeouts alone.

use std::io::{self, Read};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use serialport::{SerialPort, SerialPortType};

use crate::source::{bits_to_bytes, mask_trailing_bits, RandomSource};
use crate::RngError;

/// Product/serial string prefix that identifies a TrueRNG port.
pub const TRUERNG_PRODUCT_PREFIX: &str = "TrueRNG";

/// Known TrueRNG vendor/product pairs, covering the V1-V3 and Pro models.
const TRUERNG_IDS: [(u16, u16); 3] = [(0x16D0, 0x0AA0), (0x16D0, 0x0AA2), (0x16D0, 0x0AA4)];

const TRUERNG_BAUD: u32 = 3_000_000;
const PORT_TIMEOUT: Duration = Duration::from_secs(1);
const READ_DEADLINE: Duration = Duration::from_secs(10);
const IDLE_BACKOFF: Duration = Duration::from_millis(5);

/// Serial ports that look like a TrueRNG, sorted.
pub fn find_ports() -> Vec<String> {
    let mut ports: Vec<String> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .filter(|p| match &p.port_type {
            SerialPortType::UsbPort(usb) => matches_truerng(
                usb.product.as_deref(),
                usb.serial_number.as_deref(),
                usb.vid,
                usb.pid,
            ),
            _ => false,
        })
        .map(|p| p.port_name)
        .collect();
    ports.sort();
    ports
}

fn matches_truerng(product: Option<&str>, serial: Option<&str>, vid: u16, pid: u16) -> bool {
    if product.is_some_and(|p| p.starts_with(TRUERNG_PRODUCT_PREFIX)) {
        return true;
    }
    if serial.is_some_and(|s| s.starts_with(TRUERNG_PRODUCT_PREFIX)) {
        return true;
    }
    TRUERNG_IDS.contains(&(vid, pid))
}

/// An open TrueRNG serial device.
pub struct TrueRng {
    port: Box<dyn SerialPort>,
}

impl TrueRng {
    /// Open the first detected TrueRNG.
    pub fn open() -> Result<Self, RngError> {
        let port = find_ports()
            .into_iter()
            .next()
            .ok_or_else(|| RngError::DeviceNotFound("no TrueRNG serial device".into()))?;
        Self::open_port(&port)
    }

    /// Open a specific serial port as a TrueRNG.
    pub fn open_port(port_name: &str) -> Result<Self, RngError> {
        let mut port = serialport::new(port_name, TRUERNG_BAUD)
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(|e| RngError::Transfer(format!("failed to open {port_name}: {e}")))?;

        // The device only streams with DTR asserted; anything buffered
        // before that is stale.
        port.write_data_terminal_ready(true)
            .map_err(|e| RngError::Transfer(format!("setting DTR on {port_name}: {e}")))?;
        port.clear(serialport::ClearBuffer::Input)
            .map_err(|e| RngError::Transfer(format!("clearing input on {port_name}: {e}")))?;

        debug!("TrueRNG open on {port_name}");
        Ok(Self { port })
    }

    fn read_exact_deadline(&mut self, buf: &mut [u8]) -> Result<(), RngError> {
        let deadline = Instant::now() + READ_DEADLINE;
        let mut total = 0;
        while total < buf.len() {
            if Instant::now() >= deadline {
                return Err(RngError::Transfer(format!(
                    "serial read timed out: got {total}/{} bytes",
                    buf.len()
                )));
            }
            match self.port.read(&mut buf[total..]) {
                Ok(0) => thread::sleep(IDLE_BACKOFF),
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => return Err(RngError::Transfer(format!("serial read failed: {e}"))),
            }
        }
        Ok(())
    }
}

impl RandomSource for TrueRng {
    fn read_bits(&mut self, bits: usize) -> Result<Vec<u8>, RngError> {
        let mut buf = vec![0u8; bits_to_bytes(bits)?];
        self.read_exact_deadline(&mut buf)?;
        mask_trailing_bits(&mut buf, bits);
        Ok(buf)
    }
}
