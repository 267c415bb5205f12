//! FTDI MPSSE wire protocol: control requests, command builders, packet framing.
//!
//! Pure functions with no I/O — reusable with any transport.

// --- FTDI vendor control requests (SIO) ---
pub const SIO_RESET: u8 = 0x00;
pub const SIO_SET_FLOW_CTRL: u8 = 0x02;
pub const SIO_SET_EVENT_CHAR: u8 = 0x06;
pub const SIO_SET_ERROR_CHAR: u8 = 0x07;
pub const SIO_SET_LATENCY_TIMER: u8 = 0x09;
pub const SIO_SET_BITMODE: u8 = 0x0B;

// --- Control request values ---
pub const SIO_RESET_SIO: u16 = 0;
pub const FLOW_RTS_CTS: u16 = 0x0100;
pub const BITMODE_RESET: u16 = 0x0000;
pub const BITMODE_MPSSE: u16 = 0x0200;

/// wIndex for every SIO request: port A of the chip.
pub const FTDI_INTERFACE_A: u16 = 1;

// --- MPSSE opcodes ---
pub const MPSSE_NO_CLK_DIV5: u8 = 0x8A;
pub const MPSSE_NO_ADAPTIVE_CLK: u8 = 0x97;
pub const MPSSE_NO_3PHASE_CLK: u8 = 0x8D;
pub const MPSSE_SET_DATA_LOW: u8 = 0x80;
pub const MPSSE_SET_DATA_HIGH: u8 = 0x82;
pub const MPSSE_SET_CLK_DIVISOR: u8 = 0x86;
pub const MPSSE_SEND_IMMEDIATE: u8 = 0x87;
pub const MPSSE_NO_LOOPBACK: u8 = 0x85;

/// Clock data bytes in, MSB first, sample on positive edge.
pub const MPSSE_DATA_BYTE_IN_POS_MSB: u8 = 0x20;

/// Bogus opcodes used to probe command/response alignment. The chip answers
/// an unknown opcode with `0xFA` followed by the offending byte.
pub const SYNC_PROBE_A: u8 = 0xAA;
pub const SYNC_PROBE_B: u8 = 0xAB;
pub const BAD_COMMAND_ECHO: u8 = 0xFA;

/// Base clock the divisor is derived from (div/5 disabled).
pub const MPSSE_BASE_CLOCK: u32 = 30_000_000;

/// Every USB packet the chip returns starts with two modem-status bytes.
pub const STATUS_HEADER_LEN: usize = 2;

/// The read command's length field is `n - 1` in a u16, so one exchange
/// moves at most 65536 bytes.
pub const MAX_READ_LEN: usize = 1 << 16;

/// Low GPIO bank direction mask: clock, data-out and chip-select driven,
/// everything else an input.
pub const LOW_PIN_DIRECTION: u8 = 0x0B;

/// Divisor for the bit clock: `round(base / bitrate) - 1`.
pub fn clock_divisor(bitrate: u32) -> u16 {
    let rounded = (MPSSE_BASE_CLOCK + bitrate / 2) / bitrate;
    (rounded.max(1) - 1).min(u16::MAX as u32) as u16
}

/// Operating-parameter buffer sent as one write after sync: plain clocking,
/// pin banks, divisor, loopback off. Combined to minimize USB round-trips.
pub fn build_setup(bitrate: u32) -> [u8; 13] {
    let div = clock_divisor(bitrate);
    [
        MPSSE_NO_CLK_DIV5,
        MPSSE_NO_ADAPTIVE_CLK,
        MPSSE_NO_3PHASE_CLK,
        MPSSE_SET_DATA_LOW,
        0x00, // low bank output levels
        LOW_PIN_DIRECTION,
        MPSSE_SET_DATA_HIGH,
        0x00, // high bank levels low
        0x00, // high bank all inputs
        MPSSE_SET_CLK_DIVISOR,
        (div & 0xFF) as u8,
        (div >> 8) as u8,
        MPSSE_NO_LOOPBACK,
    ]
}

/// Sync probe frame: one bogus opcode plus an immediate flush.
pub fn build_sync_probe(probe: u8) -> [u8; 2] {
    [probe, MPSSE_SEND_IMMEDIATE]
}

/// Recognize the echo of a sync probe: a 4-byte packet whose payload (after
/// the status header) is `0xFA` followed by the probe byte.
pub fn is_sync_echo(reply: &[u8], probe: u8) -> bool {
    reply.len() == 4 && reply[2] == BAD_COMMAND_ECHO && reply[3] == probe
}

/// Read request for `len` random bytes. The length field is 0-indexed.
pub fn build_read_request(len: usize) -> [u8; 4] {
    debug_assert!(len >= 1 && len <= MAX_READ_LEN);
    let count = (len - 1) as u16;
    [
        MPSSE_DATA_BYTE_IN_POS_MSB,
        (count & 0xFF) as u8,
        (count >> 8) as u8,
        MPSSE_SEND_IMMEDIATE,
    ]
}

/// Copy payload bytes out of a raw bulk-in chunk into `dst[got..]`.
///
/// The status header repeats at every max-packet boundary, not just at the
/// start of a logical transfer, so the chunk is walked in `max_packet`
/// strides with the first two bytes of each stride discarded. Returns the
/// updated payload count. Strides of status alone contribute nothing.
pub fn extract_payload(raw: &[u8], max_packet: usize, dst: &mut [u8], mut got: usize) -> usize {
    debug_assert!(max_packet > STATUS_HEADER_LEN);
    let mut offset = 0;
    while offset < raw.len() && got < dst.len() {
        let remain = raw.len() - offset;
        if remain <= STATUS_HEADER_LEN {
            break;
        }
        let take = remain.min(max_packet);
        let usable = (take - STATUS_HEADER_LEN).min(dst.len() - got);
        let start = offset + STATUS_HEADER_LEN;
        dst[got..got + usable].copy_from_slice(&raw[start..start + usable]);
        got += usable;
        offset += take;
    }
    got
}

/// Round `n` up to a whole number of max-packet strides.
pub fn round_up_to_packet(n: usize, max_packet: usize) -> usize {
    if max_packet == 0 || n % max_packet == 0 {
        return n;
    }
    (n / max_packet + 1) * max_packet
}
