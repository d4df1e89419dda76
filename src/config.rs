//! Operation configuration.
//!
//! The teacher app spread this across a loosely typed `ConnectionParams`
//! (`connection_type: String`, `baud_rate: u32`, ...). Spec §6 pins the full
//! option table and types `connection_kind` as a proper enum; this module
//! finishes that typing job crate-wide.

use serde::{Deserialize, Serialize};

/// How the link is physically attached to the meter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// IEC 62056-21 optical probe — always starts at 300 baud.
    Optical,
    /// Direct RS-485/RS-232 wiring.
    DirectRs485,
    /// Let the core pick sensible initial bauds to try.
    #[default]
    Auto,
}

/// The single struct enumerating every recognized option (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationConfig {
    pub port: String,
    /// Rate for handshake; `0` means auto (resolved per `connection_kind`).
    pub initial_baud: u32,
    pub cap_baud: u32,
    pub timeout_ms: u64,
    pub turnaround_ms: u64,
    pub retries: u32,
    pub meter_address: Option<String>,
    pub password: Option<String>,
    pub connection_kind: ConnectionKind,
}

impl OperationConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self { port: port.into(), ..Self::default_for_port("") }
    }

    fn default_for_port(port: &str) -> Self {
        Self {
            port: port.to_string(),
            initial_baud: 0,
            cap_baud: 19200,
            timeout_ms: 2000,
            turnaround_ms: 300,
            retries: 3,
            meter_address: None,
            password: None,
            connection_kind: ConnectionKind::Auto,
        }
    }

    /// Resolve the list of initial baud rates to try, honoring the optical
    /// override: when `connection_kind == Optical` the core forces 300 baud
    /// and the caller's `initial_baud` is ignored (spec §6). `initial_baud ==
    /// 0` means auto, which resolves to the spec's documented default of 300
    /// for `Auto`, not a multi-rate probe.
    pub fn resolve_initial_bauds(&self) -> (Vec<u32>, bool) {
        match self.connection_kind {
            ConnectionKind::Optical => (vec![300], self.initial_baud != 0 && self.initial_baud != 300),
            ConnectionKind::Auto => {
                if self.initial_baud > 0 {
                    (vec![self.initial_baud], false)
                } else {
                    (vec![300], false)
                }
            }
            ConnectionKind::DirectRs485 => {
                if self.initial_baud > 0 {
                    (vec![self.initial_baud], false)
                } else {
                    (vec![9600, 300, 19200], false)
                }
            }
        }
    }

    /// Resolve the target baud to switch to after handshake: the lesser of
    /// the caller's cap and the meter's proposed baud (spec §4.3 step 3).
    pub fn resolve_target_baud(&self, meter_proposed: u32) -> u32 {
        meter_proposed.min(self.cap_baud)
    }
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self::default_for_port("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optical_forces_300_and_flags_override() {
        let cfg = OperationConfig { connection_kind: ConnectionKind::Optical, initial_baud: 9600, ..OperationConfig::new("COM1") };
        let (bauds, overridden) = cfg.resolve_initial_bauds();
        assert_eq!(bauds, vec![300]);
        assert!(overridden);
    }

    #[test]
    fn auto_with_no_explicit_baud_resolves_to_300() {
        let cfg = OperationConfig::new("COM1");
        let (bauds, overridden) = cfg.resolve_initial_bauds();
        assert_eq!(bauds, vec![300]);
        assert!(!overridden);
    }

    #[test]
    fn auto_with_explicit_baud_uses_that_baud_only() {
        let cfg = OperationConfig { initial_baud: 9600, ..OperationConfig::new("COM1") };
        let (bauds, overridden) = cfg.resolve_initial_bauds();
        assert_eq!(bauds, vec![9600]);
        assert!(!overridden);
    }

    #[test]
    fn target_baud_is_minimum_of_cap_and_proposed() {
        let cfg = OperationConfig { cap_baud: 4800, ..OperationConfig::new("COM1") };
        assert_eq!(cfg.resolve_target_baud(9600), 4800);
    }
}
