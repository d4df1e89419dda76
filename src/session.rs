//! Session State Machine — drives one exchange from cold link to Break.
//!
//! Grounded on the teacher app's `connect`/`disconnect` flow in
//! `commands/mod.rs` (the baud-retry loop, the handshake-then-option-select
//! sequence, the turnaround sleep before reconfiguring the port) and on
//! `ProtocolMode` in `serial::iec62056`. Reworked per spec §4.3: the state
//! table is now explicit in the method sequence below rather than scattered
//! across one long `connect` function, the Event Sink and Clock are held by
//! reference/Arc instead of reached through a global `Lazy<Mutex<...>>`, and
//! `close` consumes `self` so a spent Link can't be read or written again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::OperationConfig;
use crate::error::{MeterError, Result};
use crate::events::{EventSink, LogLevel};
use crate::frame::{self, CommandKind, Frame};
use crate::link::{Link, ReadUntil, SerialFactory};

/// A cooperative stop signal shared with the caller. Checked between frame
/// exchanges and before turnaround sleeps (spec §5's suspension points).
pub type CancellationToken = Arc<AtomicBool>;

pub fn new_cancellation_token() -> CancellationToken {
    Arc::new(AtomicBool::new(false))
}

/// Result of the Mode-C handshake (spec §3). Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub flag: String,
    pub baud_char: char,
    pub generation: Option<String>,
    pub edas: String,
    pub model: String,
}

/// One run of the state machine, holding exclusive ownership of its `Link`.
pub struct Session {
    link: Link,
    config: OperationConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
    p1_rejects: u32,
}

impl Session {
    /// *Idle → SendRequest → AwaitIdentification*. Tries each baud from
    /// `config.resolve_initial_bauds()` in turn (the teacher's `connect`
    /// loop), opening a fresh link at each candidate and abandoning it if no
    /// identification arrives before the per-byte deadline.
    pub fn connect(
        factory: &dyn SerialFactory,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
        config: OperationConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, Identity)> {
        let (candidate_bauds, optical_override) = config.resolve_initial_bauds();
        if optical_override {
            sink.log(
                LogLevel::Warn,
                "connection_kind=optical forces initial_baud=300; caller's baud ignored",
                clock.now_ms(),
            );
        }

        let mut last_err = None;
        for baud in candidate_bauds {
            if cancel.load(Ordering::SeqCst) {
                return Err(MeterError::Cancelled);
            }
            match Self::try_connect_at(factory, clock.clone(), sink.clone(), &config, baud) {
                Ok((link, identity)) => {
                    return Ok((
                        Self { link, config, clock, sink, cancel, p1_rejects: 0 },
                        identity,
                    ))
                }
                Err(e) => {
                    sink.log(LogLevel::Warn, &format!("no identification @ {baud} baud: {e}"), clock.now_ms());
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| MeterError::Handshake("no candidate baud rates".into())))
    }

    fn try_connect_at(
        factory: &dyn SerialFactory,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
        config: &OperationConfig,
        baud: u32,
    ) -> Result<(Link, Identity)> {
        let mut link = Link::open(factory, clock, sink, &config.port, baud, config.timeout_ms, config.turnaround_ms)?;

        let request = Frame::Request { address: config.meter_address.clone() };
        link.write_frame(&request)?;

        let deadline = link.deadline();
        let bytes = link.read_until(ReadUntil::Crlf, deadline)?;
        match frame::decode(&bytes)? {
            Frame::Identification { flag, baud_char, generation, edas, model } => {
                Ok((link, Identity { flag, baud_char, generation, edas, model }))
            }
            _ => Err(MeterError::Handshake("response was not an identification line".into())),
        }
    }

    /// *SelectMode → SwitchBaud*. `mode_char` is `'0'` whole-table readout,
    /// `'1'` programming, or one of the MASS packet selectors
    /// (`'5'..'9'`). The negotiated baud is `min(cap_baud, meter_proposed)`.
    pub fn select_mode(&mut self, identity: &Identity, mode_char: char) -> Result<()> {
        self.check_cancelled()?;
        let proposed = frame::baud_from_char(identity.baud_char)?;
        let target_baud = self.config.resolve_target_baud(proposed);
        let baud_char = frame::char_from_baud(target_baud)
            .ok_or_else(|| MeterError::Handshake(format!("no baud char for {target_baud}")))?;

        let select = Frame::OptionSelect { baud_char, mode_char };
        self.link.write_frame(&select)?;
        self.link.set_baud(target_baud)?;
        Ok(())
    }

    /// *Readout*: accumulate the single `DataBlock` response for the
    /// currently selected mode, retrying timeouts/NAKs/BCC mismatches up to
    /// `config.retries` times by sending a NAK and re-reading (spec §4.3's
    /// retry policy).
    pub fn read_data_block(&mut self) -> Result<String> {
        let mut attempt = 0;
        loop {
            self.check_cancelled()?;
            match self.try_read_data_block() {
                Ok(payload) => return Ok(payload),
                Err(e) if attempt < self.config.retries && is_retryable(&e) => {
                    attempt += 1;
                    self.sink.log(LogLevel::Warn, &format!("retry {attempt}/{}: {e}", self.config.retries), self.clock.now_ms());
                    self.clock.sleep(Duration::from_millis(100));
                    let _ = self.link.write_frame(&Frame::ShortNak);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_read_data_block(&mut self) -> Result<String> {
        let deadline = self.link.deadline();
        let bytes = self.link.read_until(ReadUntil::DataBlockOrNak, deadline)?;
        match frame::decode(&bytes)? {
            Frame::DataBlock { payload } => Ok(payload),
            Frame::ShortNak => Err(MeterError::Handshake("meter rejected readout request".into())),
            _ => Err(MeterError::Handshake("unexpected reply to readout request".into())),
        }
    }

    /// *AuthPassword*. Sends `P1(password)`, expecting `ShortAck`. A
    /// `ShortNak` counts toward the 3-attempt lockout guard; the 4th attempt
    /// is refused client-side without touching the wire (spec §4.3, §8
    /// property 4).
    pub fn authenticate(&mut self, password: &str) -> Result<()> {
        self.check_cancelled()?;
        if self.p1_rejects >= 3 {
            return Err(MeterError::LockoutImminent);
        }

        let frame = Frame::Command { kind: CommandKind::P1, obis: None, value: Some(password.to_string()) };
        self.link.write_frame(&frame)?;

        let deadline = self.link.deadline();
        let bytes = self.link.read_until(ReadUntil::AckOrNak, deadline)?;
        match frame::decode(&bytes)? {
            Frame::ShortAck => {
                self.p1_rejects = 0;
                Ok(())
            }
            Frame::ShortNak => {
                self.p1_rejects += 1;
                if self.p1_rejects >= 3 {
                    Err(MeterError::LockoutImminent)
                } else {
                    Err(MeterError::AuthRejected)
                }
            }
            _ => Err(MeterError::Handshake("unexpected reply to P1".into())),
        }
    }

    /// *ReadOBIS*: `R2 <code>()`, expecting one `DataBlock` with exactly one
    /// OBIS line. Retried per the same policy as `read_data_block`.
    pub fn read_obis(&mut self, code: &str) -> Result<String> {
        self.exchange_with_retry(Frame::Command { kind: CommandKind::R2, obis: Some(code.to_string()), value: Some(String::new()) }, true)
            .map(|reply| reply.unwrap_or_default())
    }

    /// *WriteOBIS*: `W2 <code>(value)`, expecting `ShortAck`.
    pub fn write_obis(&mut self, code: &str, value: &str) -> Result<()> {
        self.exchange_with_retry(
            Frame::Command { kind: CommandKind::W2, obis: Some(code.to_string()), value: Some(value.to_string()) },
            false,
        )
        .map(|_| ())
    }

    /// `E2 <code>()`, expecting `ShortAck` (used for demand reset).
    pub fn execute(&mut self, code: &str) -> Result<()> {
        self.exchange_with_retry(Frame::Command { kind: CommandKind::E2, obis: Some(code.to_string()), value: Some(String::new()) }, false)
            .map(|_| ())
    }

    fn exchange_with_retry(&mut self, frame: Frame, expect_data: bool) -> Result<Option<String>> {
        let mut attempt = 0;
        loop {
            self.check_cancelled()?;
            match self.try_exchange(&frame, expect_data) {
                Ok(reply) => return Ok(reply),
                Err(e) if attempt < self.config.retries && is_retryable(&e) => {
                    attempt += 1;
                    self.sink.log(LogLevel::Warn, &format!("retry {attempt}/{}: {e}", self.config.retries), self.clock.now_ms());
                    self.clock.sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_exchange(&mut self, frame: &Frame, expect_data: bool) -> Result<Option<String>> {
        self.link.write_frame(frame)?;
        let deadline = self.link.deadline();
        if expect_data {
            let bytes = self.link.read_until(ReadUntil::DataBlockOrNak, deadline)?;
            match frame::decode(&bytes)? {
                Frame::DataBlock { payload } => Ok(Some(payload)),
                Frame::ShortNak => Err(MeterError::WriteRefused("meter NAKed read request".into())),
                _ => Err(MeterError::Handshake("unexpected reply".into())),
            }
        } else {
            let bytes = self.link.read_until(ReadUntil::AckOrNak, deadline)?;
            match frame::decode(&bytes)? {
                Frame::ShortAck => Ok(None),
                Frame::ShortNak => Err(MeterError::WriteRefused("meter NAKed write/execute request".into())),
                _ => Err(MeterError::Handshake("unexpected reply".into())),
            }
        }
    }

    /// *ClosingBreak → Completed*. Always attempts Break and resets the link
    /// to initial baud; failures here are logged, never propagated (spec
    /// §4.3, §8 property 2 — this is the invariant that makes the *next*
    /// operation's handshake reliable).
    pub fn close(self) {
        self.link.close();
    }

    pub fn port(&self) -> &str {
        self.link.port()
    }

    pub fn current_baud(&self) -> u32 {
        self.link.current_baud()
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(MeterError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn is_retryable(err: &MeterError) -> bool {
    matches!(err, MeterError::Timeout(_) | MeterError::BccMismatch { .. } | MeterError::Handshake(_))
}
