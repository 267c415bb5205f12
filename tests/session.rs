//! Driver tests against a scripted transport — no hardware required.
//!
//! The mock behaves like the chip: sync probes are answered with their
//! bad-command echo, read commands produce status-framed packets, and
//! injected failures let us check abort and release behavior.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rngkit::protocol::{
    BITMODE_MPSSE, BITMODE_RESET, FLOW_RTS_CTS, FTDI_INTERFACE_A, MPSSE_DATA_BYTE_IN_POS_MSB,
    MPSSE_SEND_IMMEDIATE, SIO_RESET, SIO_RESET_SIO, SIO_SET_BITMODE, SIO_SET_ERROR_CHAR,
    SIO_SET_EVENT_CHAR, SIO_SET_FLOW_CTRL, SIO_SET_LATENCY_TIMER, STATUS_HEADER_LEN,
    SYNC_PROBE_A, SYNC_PROBE_B,
};
use rngkit::source::RandomSource;
use rngkit::{BabblerConfig, BitBabbler, DeviceSession, RngError, UsbTransport};

const STATUS: [u8; 2] = [0x32, 0x60];

#[derive(Default)]
struct ChipState {
    control_log: Vec<(u8, u16, u16)>,
    writes: Vec<Vec<u8>>,
    reads: VecDeque<Vec<u8>>,
    /// Swallow this many sync probes (no echo queued).
    sync_failures: usize,
    /// Swallow the next probe of this opcode once.
    fail_probe_once: Option<u8>,
    /// Fail the nth control request (0-indexed).
    fail_control_at: Option<usize>,
    controls_seen: usize,
    /// Bytes the chip serves for read commands, cycled as needed.
    payload: Vec<u8>,
    max_packet: usize,
}

struct MockTransport {
    state: Arc<Mutex<ChipState>>,
    releases: Arc<AtomicUsize>,
}

impl MockTransport {
    fn new(state: ChipState) -> (Self, Arc<Mutex<ChipState>>, Arc<AtomicUsize>) {
        let state = Arc::new(Mutex::new(state));
        let releases = Arc::new(AtomicUsize::new(0));
        (
            Self { state: Arc::clone(&state), releases: Arc::clone(&releases) },
            state,
            releases,
        )
    }
}

impl UsbTransport for MockTransport {
    fn control_out(&mut self, request: u8, value: u16, index: u16, _data: &[u8])
        -> Result<(), RngError>
    {
        let mut chip = self.state.lock().unwrap();
        let seen = chip.controls_seen;
        chip.controls_seen += 1;
        if chip.fail_control_at == Some(seen) {
            return Err(RngError::Transfer("injected control failure".into()));
        }
        chip.control_log.push((request, value, index));
        Ok(())
    }

    fn control_in(&mut self, _request: u8, _value: u16, _index: u16, _buf: &mut [u8])
        -> Result<usize, RngError>
    {
        Ok(0)
    }

    fn bulk_write(&mut self, data: &[u8]) -> Result<usize, RngError> {
        let mut chip = self.state.lock().unwrap();
        chip.writes.push(data.to_vec());

        if data.len() == 2
            && data[1] == MPSSE_SEND_IMMEDIATE
            && (data[0] == SYNC_PROBE_A || data[0] == SYNC_PROBE_B)
        {
            let swallowed = if chip.fail_probe_once == Some(data[0]) {
                chip.fail_probe_once = None;
                true
            } else if chip.sync_failures > 0 {
                chip.sync_failures -= 1;
                true
            } else {
                false
            };
            if swallowed {
                // Stale junk instead of the echo.
                chip.reads.push_back(STATUS.to_vec());
            } else {
                chip.reads.push_back(vec![STATUS[0], STATUS[1], 0xFA, data[0]]);
            }
        } else if data.len() == 4
            && data[0] == MPSSE_DATA_BYTE_IN_POS_MSB
            && data[3] == MPSSE_SEND_IMMEDIATE
        {
            let n = u16::from_le_bytes([data[1], data[2]]) as usize + 1;
            let served: Vec<u8> = chip.payload.iter().cycle().take(n).copied().collect();
            let room = chip.max_packet - STATUS_HEADER_LEN;
            for piece in served.chunks(room) {
                let mut packet = STATUS.to_vec();
                packet.extend_from_slice(piece);
                chip.reads.push_back(packet);
            }
        }
        Ok(data.len())
    }

    fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize, RngError> {
        let mut chip = self.state.lock().unwrap();
        match chip.reads.pop_front() {
            Some(packet) => {
                let n = packet.len().min(buf.len());
                buf[..n].copy_from_slice(&packet[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn max_packet_size(&self) -> usize {
        self.state.lock().unwrap().max_packet
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

fn chip(max_packet: usize) -> ChipState {
    ChipState { max_packet, payload: (0u8..=255).collect(), ..ChipState::default() }
}

#[test]
fn init_runs_control_steps_in_order() {
    let (transport, state, _) = MockTransport::new(chip(64));
    let session = DeviceSession::with_transport(transport, &BabblerConfig::default()).unwrap();

    let chip = state.lock().unwrap();
    assert_eq!(
        chip.control_log,
        vec![
            (SIO_RESET, SIO_RESET_SIO, FTDI_INTERFACE_A),
            (SIO_SET_EVENT_CHAR, 0, FTDI_INTERFACE_A),
            (SIO_SET_ERROR_CHAR, 0, FTDI_INTERFACE_A),
            (SIO_SET_LATENCY_TIMER, 1, FTDI_INTERFACE_A),
            (SIO_SET_FLOW_CTRL, 0, FLOW_RTS_CTS | FTDI_INTERFACE_A),
            (SIO_SET_BITMODE, BITMODE_RESET, FTDI_INTERFACE_A),
            (SIO_SET_BITMODE, BITMODE_MPSSE, FTDI_INTERFACE_A),
        ]
    );
    // Sync probes first, then the combined setup buffer.
    assert_eq!(chip.writes[0], vec![SYNC_PROBE_A, MPSSE_SEND_IMMEDIATE]);
    assert_eq!(chip.writes[1], vec![SYNC_PROBE_B, MPSSE_SEND_IMMEDIATE]);
    assert_eq!(chip.writes[2].len(), 13);
    assert_eq!(chip.writes[2][0], 0x8A);
    drop(chip);

    session.close();
}

#[test]
fn init_failure_stops_the_sequence_and_releases_once() {
    // Fail the 5th control request: the flow-control step.
    let mut state = chip(64);
    state.fail_control_at = Some(4);
    let (transport, state, releases) = MockTransport::new(state);

    let err = DeviceSession::with_transport(transport, &BabblerConfig::default()).unwrap_err();
    assert!(matches!(err, RngError::Transfer(_)));

    let chip = state.lock().unwrap();
    // Everything before the failing step ran, nothing after it.
    assert_eq!(chip.control_log.len(), 4);
    assert_eq!(chip.control_log[3].0, SIO_SET_LATENCY_TIMER);
    assert!(chip.writes.is_empty(), "no MPSSE traffic after an aborted init");
    drop(chip);

    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn sync_recovers_on_the_single_retry() {
    // First 0xAA probe is swallowed; the retry must rerun both stages.
    let mut state = chip(64);
    state.sync_failures = 1;
    let (transport, state, _) = MockTransport::new(state);

    let session = DeviceSession::with_transport(transport, &BabblerConfig::default()).unwrap();
    let probes: Vec<u8> = state
        .lock()
        .unwrap()
        .writes
        .iter()
        .filter(|w| w.len() == 2 && (w[0] == SYNC_PROBE_A || w[0] == SYNC_PROBE_B))
        .map(|w| w[0])
        .collect();
    assert_eq!(probes, vec![SYNC_PROBE_A, SYNC_PROBE_A, SYNC_PROBE_B]);
    session.close();
}

#[test]
fn second_stage_failure_reruns_both_stages() {
    let mut state = chip(64);
    state.fail_probe_once = Some(SYNC_PROBE_B);
    let (transport, state, _) = MockTransport::new(state);

    let session = DeviceSession::with_transport(transport, &BabblerConfig::default()).unwrap();
    let probes: Vec<u8> = state
        .lock()
        .unwrap()
        .writes
        .iter()
        .filter(|w| w.len() == 2 && (w[0] == SYNC_PROBE_A || w[0] == SYNC_PROBE_B))
        .map(|w| w[0])
        .collect();
    assert_eq!(
        probes,
        vec![SYNC_PROBE_A, SYNC_PROBE_B, SYNC_PROBE_A, SYNC_PROBE_B]
    );
    session.close();
}

#[test]
fn sync_failure_after_retry_is_fatal_and_releases() {
    let mut state = chip(64);
    state.sync_failures = 4; // both attempts exhausted
    let (transport, _, releases) = MockTransport::new(state);

    let err = DeviceSession::with_transport(transport, &BabblerConfig::default()).unwrap_err();
    assert!(matches!(err, RngError::SyncFailed));
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn read_random_strips_headers_across_packets() {
    // 100 bytes at max packet 64: the chip answers with a full packet and a
    // partial one, each led by the 2-byte status header.
    let (transport, _, _) = MockTransport::new(chip(64));
    let mut session = DeviceSession::with_transport(transport, &BabblerConfig::default()).unwrap();

    let mut buf = [0u8; 100];
    let n = session.read_random(&mut buf).unwrap();
    assert_eq!(n, 100);

    let expected: Vec<u8> = (0u8..=255).cycle().take(100).collect();
    assert_eq!(&buf[..], &expected[..]);
}

#[test]
fn read_random_reassembles_three_packet_transfers() {
    let (transport, state, _) = MockTransport::new(chip(64));
    let mut session = DeviceSession::with_transport(transport, &BabblerConfig::default()).unwrap();

    let mut buf = [0u8; 130];
    let n = session.read_random(&mut buf).unwrap();
    assert_eq!(n, 130);
    let expected: Vec<u8> = (0u8..=255).cycle().take(130).collect();
    assert_eq!(&buf[..], &expected[..]);

    // 130 payload bytes fit 62 + 62 + 6: three packets went over the wire.
    let chip = state.lock().unwrap();
    let read_cmd = chip.writes.iter().rfind(|w| w.len() == 4).unwrap();
    assert_eq!(u16::from_le_bytes([read_cmd[1], read_cmd[2]]), 129);
}

#[test]
fn read_random_skips_status_only_packets() {
    let (transport, state, _) = MockTransport::new(chip(64));
    let mut session = DeviceSession::with_transport(transport, &BabblerConfig::default()).unwrap();

    // A stray status-only packet sits in front of the real data.
    state.lock().unwrap().reads.push_back(STATUS.to_vec());

    let mut buf = [0u8; 16];
    assert_eq!(session.read_random(&mut buf).unwrap(), 16);
    let expected: Vec<u8> = (0u8..16).collect();
    assert_eq!(&buf[..], &expected[..]);
}

#[test]
fn read_random_of_nothing_is_a_no_op() {
    let (transport, state, _) = MockTransport::new(chip(64));
    let mut session = DeviceSession::with_transport(transport, &BabblerConfig::default()).unwrap();

    let writes_before = state.lock().unwrap().writes.len();
    assert_eq!(session.read_random(&mut []).unwrap(), 0);
    assert_eq!(state.lock().unwrap().writes.len(), writes_before);
}

#[test]
fn babbler_read_bits_trims_the_final_byte() {
    let mut state = chip(64);
    state.payload = vec![0xFF; 64];
    let (transport, _, _) = MockTransport::new(state);
    let session = DeviceSession::with_transport(transport, &BabblerConfig::default()).unwrap();
    let mut babbler = BitBabbler::from_session(session);

    let buf = babbler.read_bits(12).unwrap();
    assert_eq!(buf, vec![0xFF, 0xF0]);

    let buf = babbler.read_bits(16).unwrap();
    assert_eq!(buf, vec![0xFF, 0xFF]);
}

#[test]
fn babbler_read_bits_rejects_zero_before_io() {
    let (transport, state, _) = MockTransport::new(chip(64));
    let session = DeviceSession::with_transport(transport, &BabblerConfig::default()).unwrap();
    let mut babbler = BitBabbler::from_session(session);

    let writes_before = state.lock().unwrap().writes.len();
    assert!(matches!(babbler.read_bits(0), Err(RngError::InvalidArgument(_))));
    assert_eq!(state.lock().unwrap().writes.len(), writes_before);
}

#[test]
fn purge_is_bounded_and_drains_residue() {
    let mut state = chip(64);
    // Residue from a previous session: two fat packets before the clean one.
    state.reads.push_back(vec![0xAB; 64]);
    state.reads.push_back(vec![0xCD; 64]);
    let (transport, state, _) = MockTransport::new(state);

    let session = DeviceSession::with_transport(transport, &BabblerConfig::default()).unwrap();
    // Residue consumed before the sync probes saw the wire.
    assert!(state.lock().unwrap().reads.is_empty());
    session.close();
}
