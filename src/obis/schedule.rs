//! Tariff switching-time and slot-assignment decoding into a per-day-type
//! schedule.
//!
//! Grounded on `serial::iec62056::parse_obis_response`'s ad-hoc handling of
//! the teacher app's "tariff program" OBIS lines, generalized into the
//! 32-digit switch-time run and 8-digit slot-assignment run spelled out in
//! spec §4.4.

use chrono::NaiveTime;

use super::grammar::ObisValue;
use super::reading::DayTariffSchedule;
use crate::error::{MeterError, Result};

/// `13.x.1` carries the 32-digit switch-time run for a day type; codes
/// invented for this decoder in the absence of a pinned assignment in the
/// spec (documented as an assumption).
pub const SWITCH_TIME_CODES: &[(&str, &str)] = &[
    ("13.1.1", "weekday"),
    ("13.2.1", "saturday"),
    ("13.3.1", "sunday"),
];

/// `13.x.2` carries the matching 8-digit slot-assignment run.
pub const SLOT_ASSIGNMENT_CODES: &[(&str, &str)] = &[
    ("13.1.2", "weekday"),
    ("13.2.2", "saturday"),
    ("13.3.2", "sunday"),
];

/// Combines a `TariffSwitchTimes` run (up to 8 `HHMM` slots, `None` where
/// unused) with a matching `TariffSlotAssignment` run (the tariff index
/// active from each slot) into one day-type's schedule. The two runs must
/// describe the same number of slots.
pub fn build_day_schedule(switch_times: &ObisValue, slot_assignment: &ObisValue) -> Result<DayTariffSchedule> {
    let times = match switch_times {
        ObisValue::TariffSwitchTimes(t) => t,
        other => return Err(MeterError::ObisParse(format!("expected tariff switch times, got {other:?}"))),
    };
    let tariffs = match slot_assignment {
        ObisValue::TariffSlotAssignment(t) => t,
        other => return Err(MeterError::ObisParse(format!("expected tariff slot assignment, got {other:?}"))),
    };

    if times.len() != tariffs.len() {
        return Err(MeterError::ScheduleShape { expected: times.len(), got: tariffs.len() });
    }

    let slots = times
        .iter()
        .zip(tariffs.iter())
        .filter_map(|(slot, tariff)| slot.map(|(hh, mm)| (NaiveTime::from_hms_opt(hh as u32, mm as u32, 0), *tariff)))
        .filter_map(|(time, tariff)| time.map(|t| (t, tariff)))
        .collect();

    Ok(DayTariffSchedule { slots })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combines_switch_times_and_slot_assignment() {
        let times = ObisValue::TariffSwitchTimes(vec![Some((6, 0)), Some((22, 0)), None, None, None, None, None, None]);
        let tariffs = ObisValue::TariffSlotAssignment(vec![1, 2, 0, 0, 0, 0, 0, 0]);
        let schedule = build_day_schedule(&times, &tariffs).unwrap();
        assert_eq!(schedule.slots, vec![(NaiveTime::from_hms_opt(6, 0, 0).unwrap(), 1), (NaiveTime::from_hms_opt(22, 0, 0).unwrap(), 2)]);
    }

    #[test]
    fn mismatched_slot_counts_is_shape_error() {
        let times = ObisValue::TariffSwitchTimes(vec![Some((6, 0))]);
        let tariffs = ObisValue::TariffSlotAssignment(vec![1, 2]);
        assert!(matches!(build_day_schedule(&times, &tariffs), Err(MeterError::ScheduleShape { .. })));
    }
}
