//! The typed result of decoding a meter's OBIS payload.
//!
//! Re-architected per Design Notes §9: the teacher's `ShortReadData`
//! collects everything into one flat struct with `Option<f64>` fields for
//! whatever a bidirectional/"kombi" meter happened to report. Here `Reading`
//! is a product of optional sub-records, each with its own concrete schema;
//! the decoder fills in only the sub-records the packet/meter type actually
//! supplied.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// A decimal magnitude that keeps the meter's printed string alongside a
/// parsed convenience value, so callers needing exact printed precision
/// never have to round-trip through `f64` (spec §4.4: "do not round").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Magnitude {
    pub raw: String,
    pub value: f64,
    /// Canonical unit token, empty when the payload carried no `*unit` tag
    /// (dimensionless — never inferred, per spec §9's open question).
    pub unit: String,
}

impl Magnitude {
    pub fn new(raw: impl Into<String>, value: f64, unit: Option<String>) -> Self {
        Self { raw: raw.into(), value, unit: unit.unwrap_or_default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Import,
    Export,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyKind {
    Active,
    Inductive,
    Capacitive,
}

/// One `(tariff, direction, kind) -> magnitude` entry (spec §3's energy
/// register mapping). `tariff == 0` is the all-tariff total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyRegister {
    pub tariff: u8,
    pub direction: Direction,
    pub kind: EnergyKind,
    pub magnitude: Magnitude,
}

/// `direction -> (value, timestamp)` demand entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemandEntry {
    pub direction: Direction,
    pub magnitude: Magnitude,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instantaneous {
    pub voltage_l1: Option<Magnitude>,
    pub voltage_l2: Option<Magnitude>,
    pub voltage_l3: Option<Magnitude>,
    pub current_l1: Option<Magnitude>,
    pub current_l2: Option<Magnitude>,
    pub current_l3: Option<Magnitude>,
    pub power_factor_l1: Option<Magnitude>,
    pub power_factor_l2: Option<Magnitude>,
    pub power_factor_l3: Option<Magnitude>,
    pub frequency: Option<Magnitude>,
}

impl Instantaneous {
    /// Heuristic, informational-only three-phase detection (spec §9): the
    /// presence of the L2/L3 voltage codes. Never used to drive parsing
    /// decisions, only to annotate the reading for a caller's UI.
    pub fn is_three_phase(&self) -> bool {
        self.voltage_l2.is_some() || self.voltage_l3.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityClock {
    pub serial: Option<String>,
    pub program_version: Option<String>,
    pub production_date: Option<NaiveDate>,
    pub calibration_date: Option<NaiveDate>,
    pub meter_date: Option<NaiveDate>,
    pub meter_time: Option<NaiveTime>,
    pub weekday_index: Option<u8>,
}

/// One `(start, end)` event-list entry. Sentinel entries (`start` beginning
/// `00-00-00`) never reach here — they are pruned at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLists {
    pub voltage_warnings: Vec<EventRecord>,
    pub current_warnings: Vec<EventRecord>,
    pub magnetic_warnings: Vec<EventRecord>,
    pub phase_outages_l1: Vec<EventRecord>,
    pub phase_outages_l2: Vec<EventRecord>,
    pub phase_outages_l3: Vec<EventRecord>,
    pub three_phase_outages: Vec<EventRecord>,
}

pub const MAX_WARNING_ENTRIES: usize = 10;
pub const MAX_OUTAGE_ENTRIES: usize = 99;

/// One day-type's `(start_time, tariff_index)` switching schedule, up to 8
/// slots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayTariffSchedule {
    pub slots: Vec<(NaiveTime, u8)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TariffSchedule {
    pub weekday: DayTariffSchedule,
    pub saturday: DayTariffSchedule,
    pub sunday: DayTariffSchedule,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyRecord {
    pub energy: Vec<EnergyRegister>,
    pub demand: Vec<DemandEntry>,
    pub reset_timestamp: Option<NaiveDateTime>,
    pub terminal_cover_openings: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    pub obis: String,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadProfileRecord {
    pub timestamp: NaiveDateTime,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadProfileFrame {
    pub profile_number: u8,
    pub columns: Vec<ColumnDef>,
    pub records: Vec<LoadProfileRecord>,
}

/// Decoded FF (alarm) / GF (geographic) status words.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusWord {
    pub ff_raw: String,
    pub ff_value: u64,
    pub ff_alarms: Vec<String>,
    pub gf_raw: String,
    pub gf_value: u64,
    pub gf_edas_id: u8,
    pub gf_edas_name: String,
    pub gf_substation_id: u16,
    pub gf_transformer_id: u8,
    pub gf_feeder_id: u8,
    pub gf_phase: u8,
    pub gf_max_current_amps: u16,
    pub battery_status: Option<String>,
    pub relay_status: Option<String>,
}

/// The complete typed decode of one meter session's payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub identity: Option<IdentityClock>,
    pub energy: Vec<EnergyRegister>,
    pub demand: Vec<DemandEntry>,
    pub instantaneous: Option<Instantaneous>,
    pub status: Option<StatusWord>,
    pub monthly: [Option<MonthlyRecord>; 12],
    pub events: Option<EventLists>,
    pub tariff_schedule: Option<TariffSchedule>,
    pub load_profile: Option<LoadProfileFrame>,
}

impl Reading {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts an energy register, keeping keys unique within the group
    /// (spec §3: "keys unique within a group").
    pub fn set_energy(&mut self, entry: EnergyRegister) {
        upsert_energy(&mut self.energy, entry);
    }
}

pub(crate) fn upsert_energy(registers: &mut Vec<EnergyRegister>, entry: EnergyRegister) {
    if let Some(existing) = registers
        .iter_mut()
        .find(|r| r.tariff == entry.tariff && r.direction == entry.direction && r.kind == entry.kind)
    {
        *existing = entry;
    } else {
        registers.push(entry);
    }
}
