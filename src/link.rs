//! Line Driver — owns the serial handle, exposes timed reads, raw writes,
//! baud switching, and Break.
//!
//! Grounded on `serial::iec62056::open_port` (7 data bits / even parity / 1
//! stop bit) and `commands::io::{read_until_etx, send_break_command}` in the
//! teacher app, generalized behind a `SerialHandle`/`SerialFactory` trait
//! pair so a test harness can substitute a scripted fake meter instead of a
//! real `serialport::SerialPort`.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use serialport::{DataBits, Parity, SerialPort, StopBits};

use crate::clock::Clock;
use crate::error::{MeterError, Result};
use crate::events::{EventSink, LogLevel};
use crate::frame::{self, control, CommandKind, Frame};

/// Minimal surface the Line Driver needs from a serial port. Implemented for
/// `Box<dyn serialport::SerialPort>` in production, and by hand in tests.
pub trait SerialHandle: Send {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()>;
}

impl SerialHandle for Box<dyn SerialPort> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        use io::Write;
        self.write_all(bytes)?;
        self.flush()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match <Self as io::Read>::read(self, buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()> {
        serialport::SerialPort::set_baud_rate(self.as_mut(), baud)
            .map_err(|e| io::Error::other(e.to_string()))
    }
}

/// Opens serial handles at 7-E-1 framing, the fixed Mode-C wire format.
pub trait SerialFactory: Send + Sync {
    fn open(&self, port: &str, baud: u32, timeout_ms: u64) -> Result<Box<dyn SerialHandle>>;
}

/// Production factory backed by the `serialport` crate.
pub struct RealSerialFactory;

impl SerialFactory for RealSerialFactory {
    fn open(&self, port: &str, baud: u32, timeout_ms: u64) -> Result<Box<dyn SerialHandle>> {
        let handle = serialport::new(port, baud)
            .data_bits(DataBits::Seven)
            .parity(Parity::Even)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(timeout_ms))
            .open()
            .map_err(|e| MeterError::LinkIo(format!("open {}: {}", port, e)))?;
        Ok(Box::new(handle))
    }
}

/// Byte-accumulation stop condition for `Link::read_until`.
pub enum ReadUntil {
    /// Stop once the buffer ends in `\r\n`.
    Crlf,
    /// Stop on a bare ACK or bare NAK (reply to `P1`, `W2`, `E2`).
    AckOrNak,
    /// Stop on either a complete data block or a bare NAK rejecting the read.
    DataBlockOrNak,
}

impl ReadUntil {
    fn satisfied(&self, buf: &[u8]) -> bool {
        match self {
            ReadUntil::Crlf => buf.len() >= 2 && buf[buf.len() - 2] == control::CR && buf[buf.len() - 1] == control::LF,
            ReadUntil::AckOrNak => buf.len() == 1 && (buf[0] == control::ACK || buf[0] == control::NAK),
            ReadUntil::DataBlockOrNak => {
                (buf.len() == 1 && buf[0] == control::NAK)
                    || match buf.iter().position(|&b| b == control::ETX) {
                        Some(etx_pos) => buf.len() > etx_pos + 1,
                        None => false,
                    }
            }
        }
    }
}

/// A physical serial connection, owned exclusively by one Session at a time.
pub struct Link {
    handle: Box<dyn SerialHandle>,
    port: String,
    current_baud: u32,
    initial_baud: u32,
    timeout_ms: u64,
    turnaround_ms: u64,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
}

impl Link {
    /// Opens the link at `initial_baud`, 7-E-1 framing.
    pub fn open(
        factory: &dyn SerialFactory,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
        port: &str,
        initial_baud: u32,
        timeout_ms: u64,
        turnaround_ms: u64,
    ) -> Result<Self> {
        let handle = factory.open(port, initial_baud, timeout_ms)?;
        Ok(Self {
            handle,
            port: port.to_string(),
            current_baud: initial_baud,
            initial_baud,
            timeout_ms,
            turnaround_ms,
            clock,
            sink,
        })
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn current_baud(&self) -> u32 {
        self.current_baud
    }

    pub fn initial_baud(&self) -> u32 {
        self.initial_baud
    }

    /// Writes the encoded frame, duplicating the bytes into the event sink
    /// as a TX log entry (spec §4.1: "every write... must duplicate the
    /// bytes into the event sink").
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame::encode(frame);
        self.sink.log_bytes(LogLevel::Tx, &frame::format_bytes_for_display(&bytes), &bytes, self.clock.now_ms());
        self.handle.write(&bytes).map_err(|e| MeterError::LinkIo(e.to_string()))
    }

    /// Reads bytes until `until` is satisfied or `deadline_ms` (absolute,
    /// from `clock.now_ms()`) passes. Every chunk read is duplicated into the
    /// event sink as RX, including framing garbage between messages — reads
    /// never silently discard bytes (spec §4.1).
    pub fn read_until(&mut self, until: ReadUntil, deadline_ms: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 512];
        loop {
            let n = self.handle.read(&mut chunk).map_err(|e| MeterError::LinkIo(e.to_string()))?;
            if n > 0 {
                buf.extend_from_slice(&chunk[..n]);
                self.sink.log_bytes(
                    LogLevel::Rx,
                    &frame::format_bytes_for_display(&chunk[..n]),
                    &chunk[..n],
                    self.clock.now_ms(),
                );
                if until.satisfied(&buf) {
                    return Ok(buf);
                }
            } else {
                self.clock.sleep(Duration::from_millis(5));
            }
            if self.clock.is_past(deadline_ms) {
                return Err(MeterError::Timeout(format!(
                    "waiting for response on {} @ {} baud",
                    self.port, self.current_baud
                )));
            }
        }
    }

    pub fn deadline(&self) -> u64 {
        self.clock.now_ms() + self.timeout_ms
    }

    /// Drains the transmit buffer, waits the turnaround delay, then
    /// reconfigures the port at the new baud. Both ends must already have
    /// agreed to switch before this is called.
    pub fn set_baud(&mut self, new_baud: u32) -> Result<()> {
        self.clock.sleep(Duration::from_millis(self.turnaround_ms));
        self.handle.set_baud_rate(new_baud).map_err(|e| MeterError::LinkIo(e.to_string()))?;
        self.current_baud = new_baud;
        Ok(())
    }

    /// Emits `SOH B0 ETX BCC`, drains, then resets to initial baud. Per spec
    /// §4.3 this is the single most important invariant: skipping it leaves
    /// the meter at an elevated baud and the *next* operation silently fails.
    pub fn send_break(&mut self) -> Result<()> {
        let frame = Frame::Command { kind: CommandKind::B0, obis: None, value: None };
        self.write_frame(&frame)?;
        self.set_baud(self.initial_baud)
    }

    /// Consumes the link, best-effort Break + reset to initial baud. Break
    /// failures are logged, not propagated (spec §4.3: "Break failures are
    /// logged, not propagated").
    pub fn close(mut self) {
        if let Err(e) = self.send_break() {
            self.sink.log(LogLevel::Warn, &format!("break on close failed: {e}"), self.clock.now_ms());
        }
    }
}
