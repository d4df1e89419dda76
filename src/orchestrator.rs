//! Operation Orchestrator — composes sessions into the named operations
//! callers actually invoke (spec §4.5).
//!
//! Grounded on the Tauri command handlers in the teacher's `commands/mod.rs`
//! (`connect`, `read_short`, `read_full`, `read_load_profile`, `authenticate`,
//! `write_value`, `execute_command`, `disconnect`), each of which opened a
//! link, drove it through the protocol, and tore it down again. Here those
//! handlers become plain functions over the injected `SerialFactory` /
//! `Clock` / `EventSink` capabilities instead of Tauri commands reaching into
//! a global `CONNECTION_STATE`.
//!
//! `list_ports()` is deliberately absent: spec §4.5 marks it a boundary
//! collaborator (the OS port-enumeration service), not part of this core.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::OperationConfig;
use crate::error::{MeterError, Result};
use crate::events::EventSink;
use crate::link::SerialFactory;
use crate::obis::{self, reading::Reading};
use crate::session::{new_cancellation_token, CancellationToken, Identity, Session};

/// `(code, value)` pair applied with `W2` inside an authenticated
/// programming session.
pub struct WriteOp {
    pub code: String,
    pub value: String,
}

/// `identify(port, params)` — *SendRequest → AwaitIdentification*, closes the
/// link on return.
pub fn identify(
    factory: &dyn SerialFactory,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    config: OperationConfig,
) -> Result<Identity> {
    log::info!("identifying meter on port: {}", config.port);
    let cancel = new_cancellation_token();
    sink.progress("identify", 0, 1, "handshake", clock.now_ms());
    let (session, identity) = Session::connect(factory, clock.clone(), sink.clone(), config, cancel)?;
    session.close();
    log::info!("identified meter: {identity:?}");
    sink.progress("identify", 1, 1, "done", clock.now_ms());
    Ok(identity)
}

/// `read_short(port, params)` — full handshake at mode `'6'`; returns a
/// `Reading` populated from the MASS short-read packet. Always ends in
/// Break, always leaves the link at initial baud.
pub fn read_short(
    factory: &dyn SerialFactory,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    config: OperationConfig,
) -> Result<Reading> {
    read_one_mode(factory, clock, sink, config, '6', "read_short")
}

fn read_one_mode(
    factory: &dyn SerialFactory,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    config: OperationConfig,
    mode_char: char,
    op_name: &str,
) -> Result<Reading> {
    log::info!("starting {op_name} operation on port: {}", config.port);
    let cancel = new_cancellation_token();
    sink.progress(op_name, 0, 3, "handshake", clock.now_ms());
    let (mut session, identity) = Session::connect(factory, clock.clone(), sink.clone(), config, cancel)?;

    sink.progress(op_name, 1, 3, "selecting mode", clock.now_ms());
    let result = (|| -> Result<Reading> {
        session.select_mode(&identity, mode_char)?;
        sink.progress(op_name, 2, 3, "reading payload", clock.now_ms());
        let payload = session.read_data_block()?;
        obis::decode_reading(&payload)
    })();

    session.close();
    sink.progress(op_name, 3, 3, "done", clock.now_ms());
    result
}

/// `read_full(port, params)` — the "readout" composition: mode `'0'` (whole
/// table) merged with whichever of `'7','8','9','5'` the meter advertises.
/// Re-handshakes between sub-modes because each sub-operation leaves the
/// meter at an elevated baud; this is required behavior, not an
/// optimization (spec §4.5, Design Notes §9).
pub fn read_full(
    factory: &dyn SerialFactory,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    config: OperationConfig,
    extra_modes: &[char],
) -> Result<Reading> {
    log::info!("starting read_full operation on port: {} (extra modes: {extra_modes:?})", config.port);
    let mut reading = Reading::new();
    let modes: Vec<char> = std::iter::once('0').chain(extra_modes.iter().copied()).collect();
    let total = modes.len() as u32;

    for (i, mode_char) in modes.iter().enumerate() {
        sink.progress("read_full", i as u32, total, &format!("sub-mode '{mode_char}'"), clock.now_ms());
        let cancel = new_cancellation_token();
        let (mut session, identity) = Session::connect(factory, clock.clone(), sink.clone(), config.clone(), cancel)?;

        let outcome = (|| -> Result<()> {
            session.select_mode(&identity, *mode_char)?;
            let payload = session.read_data_block()?;
            obis::merge_into(&mut reading, &payload)
        })();

        session.close();
        outcome?;
    }

    sink.progress("read_full", total, total, "done", clock.now_ms());
    Ok(reading)
}

/// `read_load_profile(port, params, profile, range)` — handshake at mode
/// `'0'` for column definitions, disconnect, re-handshake into programming
/// mode, authenticate if a password was supplied, `R2 P.0P(range)`, decode
/// the streamed data block(s), Break, disconnect.
pub fn read_load_profile(
    factory: &dyn SerialFactory,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    config: OperationConfig,
    profile: u8,
    range: Option<(String, String)>,
) -> Result<Reading> {
    if !(1..=3).contains(&profile) {
        return Err(MeterError::ObisParse(format!("load profile number {profile} out of range 1..3")));
    }

    log::info!("reading load profile {profile} on port: {}", config.port);
    sink.progress("read_load_profile", 0, 4, "reading column definitions", clock.now_ms());
    let columns_reading = read_one_mode(factory, clock.clone(), sink.clone(), config.clone(), '0', "read_load_profile:columns")?;

    sink.progress("read_load_profile", 1, 4, "entering programming mode", clock.now_ms());
    let cancel = new_cancellation_token();
    let (mut session, identity) = Session::connect(factory, clock.clone(), sink.clone(), config.clone(), cancel)?;

    let outcome = (|| -> Result<Reading> {
        session.select_mode(&identity, '1')?;

        if let Some(password) = &config.password {
            sink.progress("read_load_profile", 2, 4, "authenticating", clock.now_ms());
            authenticate_until_lockout(&mut session, password)?;
        }

        let arg = match &range {
            Some((start, end)) => format!("{start};{end}"),
            None => ";".to_string(),
        };
        let code = format!("P.0{profile}");
        sink.progress("read_load_profile", 3, 4, "streaming records", clock.now_ms());
        let payload = session.read_obis(&format!("{code}({arg})"))?;

        let mut reading = columns_reading;
        obis::merge_into(&mut reading, &payload)?;
        Ok(reading)
    })();

    session.close();
    sink.progress("read_load_profile", 4, 4, "done", clock.now_ms());
    outcome
}

/// Drives `Session::authenticate` with one fixed password until the meter
/// ACKs or the session's own lockout guard fires. `AuthRejected` is not a
/// frame-level retry (spec §4.3 explicitly excludes it from that policy) —
/// this loop models the caller re-presenting the same credential against the
/// meter's 3-strikes counter, which is tracked by the session across calls,
/// not a generic backoff.
fn authenticate_until_lockout(session: &mut Session, password: &str) -> Result<()> {
    loop {
        match session.authenticate(password) {
            Ok(()) => return Ok(()),
            Err(MeterError::AuthRejected) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// `authenticate_and_write(port, params, password, ops)` — acquires a
/// programming session, applies each `(code, value)` via `W2`, emitting
/// progress per step. Break on the first failure (the Session's `close`
/// always fires; no partial-write rollback beyond that, matching spec §4.5).
pub fn authenticate_and_write(
    factory: &dyn SerialFactory,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    config: OperationConfig,
    password: &str,
    ops: &[WriteOp],
) -> Result<()> {
    log::info!("authenticating and writing {} OBIS value(s) on port: {}", ops.len(), config.port);
    let total = ops.len() as u32 + 1;
    sink.progress("authenticate_and_write", 0, total, "handshake", clock.now_ms());
    let cancel = new_cancellation_token();
    let (mut session, identity) = Session::connect(factory, clock.clone(), sink.clone(), config, cancel)?;

    let outcome = (|| -> Result<()> {
        session.select_mode(&identity, '1')?;
        sink.progress("authenticate_and_write", 0, total, "authenticating", clock.now_ms());
        authenticate_until_lockout(&mut session, password)?;

        for (i, op) in ops.iter().enumerate() {
            sink.progress("authenticate_and_write", i as u32 + 1, total, &format!("writing {}", op.code), clock.now_ms());
            session.write_obis(&op.code, &op.value)?;
        }
        Ok(())
    })();

    session.close();
    sink.progress("authenticate_and_write", total, total, "done", clock.now_ms());
    outcome
}

/// `execute(port, params, password, code)` — `E2 <code>()` inside a
/// programming session (used for demand reset).
pub fn execute(
    factory: &dyn SerialFactory,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    config: OperationConfig,
    password: &str,
    code: &str,
) -> Result<()> {
    log::info!("executing OBIS code {code} on port: {}", config.port);
    sink.progress("execute", 0, 2, "handshake", clock.now_ms());
    let cancel = new_cancellation_token();
    let (mut session, identity) = Session::connect(factory, clock.clone(), sink.clone(), config, cancel)?;

    let outcome = (|| -> Result<()> {
        session.select_mode(&identity, '1')?;
        authenticate_until_lockout(&mut session, password)?;
        sink.progress("execute", 1, 2, &format!("executing {code}"), clock.now_ms());
        session.execute(code)
    })();

    session.close();
    sink.progress("execute", 2, 2, "done", clock.now_ms());
    outcome
}

/// `end_session(session)` — explicit Break + reset; idempotent because
/// `Session::close` consumes its receiver, so a second call is a type error
/// rather than a double-Break at runtime.
pub fn end_session(session: Session) {
    session.close();
}

/// A pre-built cancellation token for callers that want to cancel an
/// in-flight operation from another thread before it starts, or trip it
/// mid-flight. `identify`/`read_short`/etc. above build a fresh one
/// internally; use [`cancellable`] plus the lower-level `Session` API
/// directly when the caller needs to hold the token.
pub fn cancellable() -> CancellationToken {
    new_cancellation_token()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::events::RecordingSink;
    use crate::frame::{self, control, CommandKind, Frame};
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;

    struct ScriptedHandle {
        inbox: Mutex<VecDeque<u8>>,
        baud: Mutex<u32>,
    }

    impl ScriptedHandle {
        fn new(replies: &[u8]) -> Self {
            Self { inbox: Mutex::new(replies.iter().copied().collect()), baud: Mutex::new(0) }
        }
    }

    impl crate::link::SerialHandle for ScriptedHandle {
        fn write(&mut self, _bytes: &[u8]) -> io::Result<()> {
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
        fn set_baud_rate(&mut self, baud: u32) -> io::Result<()> {
            *self.baud.lock().unwrap() = baud;
            Ok(())
        }
    }

    struct ScriptedFactory(Vec<u8>);

    impl SerialFactory for ScriptedFactory {
        fn open(&self, _port: &str, _baud: u32, _timeout_ms: u64) -> Result<Box<dyn crate::link::SerialHandle>> {
            Ok(Box::new(ScriptedHandle::new(&self.0)))
        }
    }

    fn data_block(payload: &str) -> Vec<u8> {
        let mut block = vec![control::STX];
        block.extend_from_slice(payload.as_bytes());
        block.push(control::ETX);
        let bcc = frame::calculate_bcc(&block[1..]);
        block.push(bcc);
        block
    }

    #[test]
    fn identify_ends_session_with_break() {
        let wire = b"/MKS5<2>ADM(M550.2251)\r\n".to_vec();
        let factory = ScriptedFactory(wire);
        let sink = Arc::new(RecordingSink::default());
        let config = OperationConfig { initial_baud: 300, ..OperationConfig::new("COM1") };
        let identity = identify(&factory, Arc::new(MockClock::new()), sink.clone(), config).unwrap();
        assert_eq!(identity.model, "M550.2251");

        let last_tx = sink.tx_frames().last().cloned().unwrap();
        assert_eq!(last_tx, frame::encode(&Frame::Command { kind: CommandKind::B0, obis: None, value: None }));
    }

    #[test]
    fn read_short_yields_decoded_reading() {
        let mut wire = b"/MKS5<2>ADM(M550.2251)\r\n".to_vec();
        wire.extend(data_block("1.8.0(123456.789*kWh)\r\n32.7.0(220.5*V)\r\n!\r\n"));
        let factory = ScriptedFactory(wire);
        let config = OperationConfig { initial_baud: 300, ..OperationConfig::new("COM1") };
        let reading = read_short(&factory, Arc::new(MockClock::new()), Arc::new(crate::events::NullSink), config).unwrap();
        assert_eq!(reading.energy[0].magnitude.value, 123456.789);
        assert_eq!(reading.instantaneous.unwrap().voltage_l1.unwrap().value, 220.5);
    }

    #[test]
    fn load_profile_out_of_range_is_rejected_without_touching_the_wire() {
        let factory = ScriptedFactory(vec![]);
        let config = OperationConfig { initial_baud: 300, ..OperationConfig::new("COM1") };
        let err = read_load_profile(&factory, Arc::new(MockClock::new()), Arc::new(crate::events::NullSink), config, 9, None).unwrap_err();
        assert!(matches!(err, MeterError::ObisParse(_)));
    }
}
