//! Error taxonomy for the meter protocol core.

use thiserror::Error;

/// Failure modes surfaced by the Line Driver, Framing Codec, Session State
/// Machine, OBIS Grammar, and Operation Orchestrator.
#[derive(Debug, Error)]
pub enum MeterError {
    #[error("link I/O error: {0}")]
    LinkIo(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("BCC mismatch: expected {expected:02X}, got {got:02X}")]
    BccMismatch { expected: u8, got: u8 },

    #[error("unknown baud code '{0}'")]
    UnknownBaud(char),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("authentication rejected by meter")]
    AuthRejected,

    #[error("meter lockout imminent — refusing further password attempts this session")]
    LockoutImminent,

    #[error("meter refused write/execute: {0}")]
    WriteRefused(String),

    #[error("OBIS payload malformed: {0}")]
    ObisParse(String),

    #[error("load profile shape mismatch: expected {expected} columns, got {got}")]
    LoadProfileShape { expected: usize, got: usize },

    #[error("tariff schedule shape mismatch: expected {expected} slots, got {got}")]
    ScheduleShape { expected: usize, got: usize },

    #[error("link is busy with another session")]
    Busy,

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, MeterError>;
