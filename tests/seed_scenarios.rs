//! End-to-end seed scenarios (spec §8's "seeds" S3 and S4), run against a
//! scripted in-memory fake meter built on the same `SerialHandle`/`Clock`
//! traits the production code depends on. S1/S2/S5/S6 are covered as unit
//! tests colocated with the modules they exercise; these two need a
//! multi-session or multi-read wire script, so they live here instead.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use mass_meter_core::config::{ConnectionKind, OperationConfig};
use mass_meter_core::error::MeterError;
use mass_meter_core::events::{NullSink, RecordingSink};
use mass_meter_core::frame::{self, control, CommandKind, Frame};
use mass_meter_core::link::{SerialFactory, SerialHandle};
use mass_meter_core::orchestrator;

const IDENTIFICATION: &[u8] = b"/MKS5<2>ADM(M550.2251)\r\n";

fn data_block(payload: &str) -> Vec<u8> {
    let mut block = vec![control::STX];
    block.extend_from_slice(payload.as_bytes());
    block.push(control::ETX);
    let bcc = frame::calculate_bcc(&block[1..]);
    block.push(bcc);
    block
}

/// One scripted wire, one byte at a time, matching how a real serial port
/// delivers bytes across more than one poll.
struct ScriptedHandle {
    inbox: Mutex<VecDeque<u8>>,
    outbox: Mutex<Vec<u8>>,
}

impl ScriptedHandle {
    fn new(replies: &[u8]) -> Self {
        Self { inbox: Mutex::new(replies.iter().copied().collect()), outbox: Mutex::new(Vec::new()) }
    }
}

impl SerialHandle for ScriptedHandle {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.outbox.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inbox = self.inbox.lock().unwrap();
        match inbox.pop_front() {
            Some(b) if !buf.is_empty() => {
                buf[0] = b;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn set_baud_rate(&mut self, _baud: u32) -> io::Result<()> {
        Ok(())
    }
}

/// Hands out one scripted reply stream per `open()` call, in order — needed
/// for orchestrator operations (like `read_load_profile`) that reconnect
/// from initial baud between sub-operations (spec §4.5).
struct SequencedFactory {
    scripts: Mutex<VecDeque<Vec<u8>>>,
}

impl SequencedFactory {
    fn new(scripts: Vec<Vec<u8>>) -> Self {
        Self { scripts: Mutex::new(scripts.into_iter().collect()) }
    }
}

impl SerialFactory for SequencedFactory {
    fn open(&self, _port: &str, _baud: u32, _timeout_ms: u64) -> mass_meter_core::error::Result<Box<dyn SerialHandle>> {
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::new(ScriptedHandle::new(&script)))
    }
}

fn base_config() -> OperationConfig {
    OperationConfig { initial_baud: 300, connection_kind: ConnectionKind::DirectRs485, ..OperationConfig::new("COM1") }
}

/// S3 — load profile range read: profile 1, column set `{1.8.0*kWh}` at a
/// 15-minute period over one day, should yield 96 records in strict
/// chronological order.
#[test]
fn s3_load_profile_range_read_yields_96_records_in_order() {
    let mut columns_session = IDENTIFICATION.to_vec();
    columns_session.extend(data_block("97.1.0(1.8.0*kWh)\r\n!\r\n"));

    let mut records_payload = String::new();
    for slot in 0..96u32 {
        let hh = slot / 4;
        let mm = (slot % 4) * 15;
        records_payload.push_str(&format!("P.01(24-01-01,{hh:02}:{mm:02})({:.3})\r\n", slot as f64 * 0.1));
    }
    records_payload.push_str("!\r\n");

    let mut programming_session = IDENTIFICATION.to_vec();
    programming_session.extend(data_block(&records_payload));

    let factory = SequencedFactory::new(vec![columns_session, programming_session]);
    let config = base_config();

    let reading = orchestrator::read_load_profile(
        &factory,
        Arc::new(mass_meter_core::clock::MockClock::new()),
        Arc::new(NullSink),
        config,
        1,
        Some(("24-01-01,00:00".to_string(), "24-01-02,00:00".to_string())),
    )
    .unwrap();

    let profile = reading.load_profile.unwrap();
    assert_eq!(profile.columns.len(), 1);
    assert_eq!(profile.columns[0].obis, "1.8.0");
    assert_eq!(profile.records.len(), 96);
    for pair in profile.records.windows(2) {
        assert!(pair[1].timestamp > pair[0].timestamp, "records must be in strict chronological order");
    }
    assert_eq!(profile.records[0].values, vec![0.0]);
    assert_eq!(profile.records[95].values, vec![9.5]);
}

/// S4 — BCC mismatch retry: the first data block is corrupted, the core
/// detects it, re-issues the request, and the clean second response
/// completes the operation with exactly one warning logged.
#[test]
fn s4_bcc_mismatch_triggers_exactly_one_retry() {
    let mut good_block = data_block("1.8.0(123456.789*kWh)\r\n!\r\n");
    let mut corrupted_block = good_block.clone();
    *corrupted_block.last_mut().unwrap() ^= 0xFF; // flip the BCC byte

    let mut wire = IDENTIFICATION.to_vec();
    wire.extend_from_slice(&corrupted_block);
    wire.append(&mut good_block);

    let factory = SequencedFactory::new(vec![wire]);
    let sink = Arc::new(RecordingSink::default());
    let config = base_config();

    let reading = orchestrator::read_short(
        &factory,
        Arc::new(mass_meter_core::clock::MockClock::new()),
        sink.clone(),
        config,
    )
    .unwrap();

    assert_eq!(reading.energy[0].magnitude.value, 123456.789);
    assert_eq!(sink.warn_count(), 1, "exactly one BCC-mismatch retry should be logged");

    let last_tx = sink.tx_frames().last().cloned().unwrap();
    assert_eq!(last_tx, frame::encode(&Frame::Command { kind: CommandKind::B0, obis: None, value: None }));
}

/// S2 (end-to-end, orchestrator-level view) — wrong password lockout guard:
/// exactly three `P1` frames are sent, the session reports
/// `LockoutImminent`, and it still ends with `B0` at initial baud.
#[test]
fn s2_authenticate_and_write_surfaces_lockout_after_three_rejects() {
    let mut wire = IDENTIFICATION.to_vec();
    wire.extend(std::iter::repeat_n(control::NAK, 3));

    let factory = SequencedFactory::new(vec![wire]);
    let sink = Arc::new(RecordingSink::default());
    let config = base_config();

    let err = orchestrator::authenticate_and_write(
        &factory,
        Arc::new(mass_meter_core::clock::MockClock::new()),
        sink.clone(),
        config,
        "00000000",
        &[],
    )
    .unwrap_err();
    assert!(matches!(err, MeterError::LockoutImminent));

    let p1_count = sink
        .tx_frames()
        .iter()
        .filter(|bytes| bytes.len() >= 3 && bytes[0] == control::SOH && &bytes[1..3] == b"P1")
        .count();
    assert_eq!(p1_count, 3, "no fourth P1 attempt should be made");

    let last_tx = sink.tx_frames().last().cloned().unwrap();
    assert_eq!(last_tx, frame::encode(&Frame::Command { kind: CommandKind::B0, obis: None, value: None }));
}
