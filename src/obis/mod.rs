//! OBIS Grammar & Decoder — turns a data block's textual payload into a
//! typed [`Reading`].
//!
//! Grounded on `serial::iec62056::{parse_obis_response, parse_data_block}`
//! in the teacher app, which walked the same payload but wrote straight into
//! one flat `ShortReadData`. Here the routing table fans each code out to
//! its own sub-record (spec §3/§4.4), and unrecognized codes are skipped
//! rather than rejected — a meter firmware revision adding a code this
//! decoder doesn't know yet should degrade, not fail the whole read.

pub mod grammar;
pub mod load_profile;
pub mod reading;
pub mod schedule;
pub mod status;

use std::collections::BTreeMap;

use grammar::{classify_value, is_sentinel_pair, parse_block, ObisLine, ObisValue};
use reading::{
    DemandEntry, Direction, EnergyKind, EnergyRegister, EventLists, EventRecord, IdentityClock,
    Instantaneous, Magnitude, MonthlyRecord, Reading, StatusWord,
};

use crate::error::{MeterError, Result};

/// Decodes one complete data-block payload into a [`Reading`]. Multiple
/// payloads from the same session (e.g. short read, then monthly reads) are
/// merged by calling this repeatedly into the same `Reading` via
/// [`merge_into`].
pub fn decode_reading(payload: &str) -> Result<Reading> {
    let mut reading = Reading::new();
    merge_into(&mut reading, payload)?;
    Ok(reading)
}

/// Parses `payload` and folds every recognized line into `reading`,
/// preserving whatever the `Reading` already held (spec §4.5: sub-mode reads
/// accumulate into one session `Reading`, they don't replace it).
pub fn merge_into(reading: &mut Reading, payload: &str) -> Result<()> {
    let lines = parse_block(payload);

    let mut load_profile_columns: BTreeMap<u8, &ObisLine> = BTreeMap::new();
    let mut load_profile_records: BTreeMap<u8, Vec<&ObisLine>> = BTreeMap::new();
    let mut schedule_parts: BTreeMap<&'static str, (Option<ObisValue>, Option<ObisValue>)> = BTreeMap::new();

    for line in &lines {
        if let Some(profile) = load_profile_column_code(&line.code) {
            load_profile_columns.insert(profile, line);
            continue;
        }
        if let Some(profile) = load_profile_data_code(&line.code) {
            load_profile_records.entry(profile).or_default().push(line);
            continue;
        }
        if let Some(&(_, daytype)) = schedule::SWITCH_TIME_CODES.iter().find(|&&(c, _)| c == line.code.as_str()) {
            let value = first_value(line)?;
            schedule_parts.entry(daytype).or_default().0 = Some(value);
            continue;
        }
        if let Some(&(_, daytype)) = schedule::SLOT_ASSIGNMENT_CODES.iter().find(|&&(c, _)| c == line.code.as_str()) {
            let value = first_value(line)?;
            schedule_parts.entry(daytype).or_default().1 = Some(value);
            continue;
        }

        route_line(reading, line)?;
    }

    if !load_profile_columns.is_empty() || !load_profile_records.is_empty() {
        merge_load_profile(reading, load_profile_columns, load_profile_records)?;
    }
    if !schedule_parts.is_empty() {
        merge_schedule(reading, schedule_parts)?;
    }

    Ok(())
}

fn first_value(line: &ObisLine) -> Result<ObisValue> {
    let raw = line
        .raw_values
        .first()
        .ok_or_else(|| MeterError::ObisParse(format!("{} has no value", line.code)))?;
    classify_value(raw)
}

fn load_profile_column_code(code: &str) -> Option<u8> {
    code.strip_prefix("97.").and_then(|rest| rest.strip_suffix(".0")).and_then(|n| n.parse().ok())
}

fn load_profile_data_code(code: &str) -> Option<u8> {
    code.strip_prefix("P.0").and_then(|n| n.parse().ok())
}

fn merge_load_profile(
    reading: &mut Reading,
    mut columns: BTreeMap<u8, &ObisLine>,
    mut records: BTreeMap<u8, Vec<&ObisLine>>,
) -> Result<()> {
    // Single load profile per session in this protocol (spec §4.4); take the
    // lowest profile number present across either map.
    let profile_number = columns.keys().next().copied().or_else(|| records.keys().next().copied());
    let Some(profile_number) = profile_number else { return Ok(()) };

    let column_line = columns.remove(&profile_number);
    let columns_def = match column_line {
        Some(line) => load_profile::parse_columns(line)?,
        None => reading.load_profile.as_ref().map(|lp| lp.columns.clone()).unwrap_or_default(),
    };

    let mut frame = reading.load_profile.take().unwrap_or(reading::LoadProfileFrame {
        profile_number,
        columns: columns_def.clone(),
        records: Vec::new(),
    });
    frame.columns = columns_def;

    if let Some(lines) = records.remove(&profile_number) {
        for line in lines {
            frame.records.push(load_profile::parse_record(line, frame.columns.len())?);
        }
    }

    reading.load_profile = Some(frame);
    Ok(())
}

fn merge_schedule(
    reading: &mut Reading,
    parts: BTreeMap<&'static str, (Option<ObisValue>, Option<ObisValue>)>,
) -> Result<()> {
    let mut schedule = reading.tariff_schedule.take().unwrap_or_default();
    for (daytype, (switch, slots)) in parts {
        let (Some(switch), Some(slots)) = (switch, slots) else { continue };
        let day = schedule::build_day_schedule(&switch, &slots)?;
        match daytype {
            "weekday" => schedule.weekday = day,
            "saturday" => schedule.saturday = day,
            "sunday" => schedule.sunday = day,
            _ => unreachable!("unknown day type"),
        }
    }
    reading.tariff_schedule = Some(schedule);
    Ok(())
}

/// Routes one non-load-profile, non-schedule line into its `Reading`
/// sub-record, per the code table below. `F.F`/`F.F.0` and `F.F.1` alias the
/// alarm/geographic words; all other codes are looked up by exact string
/// match. Monthly indexing applies uniformly: any energy or demand code
/// carrying a `*1`..`*12` subscript is folded into `monthly[subscript-1]`
/// instead of the top-level `energy`/`demand` lists.
///
/// The `98.x` event-list codes (voltage/current/magnetic warnings, per-phase
/// and three-phase outages) are invented for this decoder — spec §4.4
/// describes only the concept of warning/outage event lists, without pinning
/// OBIS codes, and neither teacher source carries any trace of them. Treated
/// as an assumption the same way `obis::schedule`'s switch-time/slot codes
/// are (see that module's doc comment and the matching entry in
/// DESIGN.md's Open Question decisions).
fn route_line(reading: &mut Reading, line: &ObisLine) -> Result<()> {
    match line.code.as_str() {
        "0.0.0" => set_identity_text(reading, |id| &mut id.serial, line),
        "0.2.0" => set_identity_text(reading, |id| &mut id.program_version, line),
        "96.1.1" => set_identity_date(reading, |id| &mut id.production_date, line),
        "96.1.2" => set_identity_date(reading, |id| &mut id.calibration_date, line),
        "0.9.1" => {
            if let ObisValue::ClockTime(t) = first_value(line)? {
                reading.identity.get_or_insert_with(Default::default).meter_time = Some(t);
            }
        }
        "0.9.2" => {
            if let ObisValue::CalendarDate(d) = first_value(line)? {
                reading.identity.get_or_insert_with(Default::default).meter_date = Some(d);
            }
        }
        "96.1.0" => {
            if let ObisValue::Integer { value, .. } = first_value(line)? {
                reading.identity.get_or_insert_with(Default::default).weekday_index = Some(value as u8);
            }
        }

        "F.F" | "F.F.0" => apply_ff(reading, line)?,
        "F.F.1" => apply_gf(reading, line)?,
        "96.6.1" => {
            let raw = line.raw_values.first().cloned().unwrap_or_default();
            reading.status.get_or_insert_with(blank_status).battery_status = Some(status::battery_status_from_code(&raw));
        }
        "96.3.10" => {
            let raw = line.raw_values.first().cloned().unwrap_or_default();
            reading.status.get_or_insert_with(blank_status).relay_status = Some(status::relay_status_from_code(&raw));
        }

        "1.6.0" => apply_demand(reading, Direction::Import, line)?,
        "2.6.0" => apply_demand(reading, Direction::Export, line)?,

        "32.7.0" => set_instantaneous(reading, |i| &mut i.voltage_l1, line)?,
        "52.7.0" => set_instantaneous(reading, |i| &mut i.voltage_l2, line)?,
        "72.7.0" => set_instantaneous(reading, |i| &mut i.voltage_l3, line)?,
        "31.7.0" => set_instantaneous(reading, |i| &mut i.current_l1, line)?,
        "51.7.0" => set_instantaneous(reading, |i| &mut i.current_l2, line)?,
        "71.7.0" => set_instantaneous(reading, |i| &mut i.current_l3, line)?,
        "33.7.0" => set_instantaneous(reading, |i| &mut i.power_factor_l1, line)?,
        "53.7.0" => set_instantaneous(reading, |i| &mut i.power_factor_l2, line)?,
        "73.7.0" => set_instantaneous(reading, |i| &mut i.power_factor_l3, line)?,
        "14.7.0" => set_instantaneous(reading, |i| &mut i.frequency, line)?,

        "98.1.0" => apply_events(reading, |e| &mut e.voltage_warnings, line)?,
        "98.2.0" => apply_events(reading, |e| &mut e.current_warnings, line)?,
        "98.3.0" => apply_events(reading, |e| &mut e.magnetic_warnings, line)?,
        "98.4.1" => apply_events(reading, |e| &mut e.phase_outages_l1, line)?,
        "98.4.2" => apply_events(reading, |e| &mut e.phase_outages_l2, line)?,
        "98.4.3" => apply_events(reading, |e| &mut e.phase_outages_l3, line)?,
        "98.5.0" => apply_events(reading, |e| &mut e.three_phase_outages, line)?,

        code => apply_energy(reading, code, line)?,
    }
    Ok(())
}

fn blank_status() -> StatusWord {
    StatusWord {
        ff_raw: String::new(),
        ff_value: 0,
        ff_alarms: Vec::new(),
        gf_raw: String::new(),
        gf_value: 0,
        gf_edas_id: 0,
        gf_edas_name: String::new(),
        gf_substation_id: 0,
        gf_transformer_id: 0,
        gf_feeder_id: 0,
        gf_phase: 0,
        gf_max_current_amps: 0,
        battery_status: None,
        relay_status: None,
    }
}

fn apply_ff(reading: &mut Reading, line: &ObisLine) -> Result<()> {
    let ObisValue::HexWord { raw, value } = first_value(line)? else {
        return Err(MeterError::ObisParse(format!("{} is not a hex word", line.code)));
    };
    let entry = reading.status.get_or_insert_with(blank_status);
    entry.ff_raw = raw;
    entry.ff_value = value;
    entry.ff_alarms = status::ff_alarm_names(value);
    Ok(())
}

fn apply_gf(reading: &mut Reading, line: &ObisLine) -> Result<()> {
    let ObisValue::HexWord { raw, value } = first_value(line)? else {
        return Err(MeterError::ObisParse(format!("{} is not a hex word", line.code)));
    };
    let fields = status::decode_gf(value);
    let entry = reading.status.get_or_insert_with(blank_status);
    entry.gf_raw = raw;
    entry.gf_value = value;
    entry.gf_edas_id = fields.edas_id;
    entry.gf_edas_name = fields.edas_name.to_string();
    entry.gf_substation_id = fields.substation_id;
    entry.gf_transformer_id = fields.transformer_id;
    entry.gf_feeder_id = fields.feeder_id;
    entry.gf_phase = fields.phase;
    entry.gf_max_current_amps = fields.max_current_amps;
    Ok(())
}

fn magnitude_from(value: ObisValue) -> Result<Magnitude> {
    match value {
        ObisValue::Decimal { raw, value, unit } => Ok(Magnitude::new(raw, value, unit)),
        ObisValue::Integer { raw, value, unit } => Ok(Magnitude::new(raw, value as f64, unit)),
        other => Err(MeterError::ObisParse(format!("expected a magnitude, got {other:?}"))),
    }
}

fn set_instantaneous(
    reading: &mut Reading,
    field: impl FnOnce(&mut Instantaneous) -> &mut Option<Magnitude>,
    line: &ObisLine,
) -> Result<()> {
    let magnitude = magnitude_from(first_value(line)?)?;
    *field(reading.instantaneous.get_or_insert_with(Default::default)) = Some(magnitude);
    Ok(())
}

fn set_identity_text(reading: &mut Reading, field: impl FnOnce(&mut IdentityClock) -> &mut Option<String>, line: &ObisLine) {
    let raw = line.raw_values.first().cloned();
    *field(reading.identity.get_or_insert_with(Default::default)) = raw;
}

fn set_identity_date(reading: &mut Reading, field: impl FnOnce(&mut IdentityClock) -> &mut Option<chrono::NaiveDate>, line: &ObisLine) {
    if let Some(Ok(ObisValue::CalendarDate(d))) = line.raw_values.first().map(|r| classify_value(r)) {
        *field(reading.identity.get_or_insert_with(Default::default)) = Some(d);
    }
}

fn apply_demand(reading: &mut Reading, direction: Direction, line: &ObisLine) -> Result<()> {
    let magnitude_raw = line.raw_values.first().ok_or_else(|| MeterError::ObisParse(format!("{} missing magnitude", line.code)))?;
    let timestamp_raw = line.raw_values.get(1).ok_or_else(|| MeterError::ObisParse(format!("{} missing timestamp", line.code)))?;
    let magnitude = magnitude_from(classify_value(magnitude_raw)?)?;
    let ObisValue::Timestamp(timestamp) = classify_value(timestamp_raw)? else {
        return Err(MeterError::ObisParse(format!("{} timestamp malformed", line.code)));
    };
    let entry = DemandEntry { direction, magnitude, timestamp };

    if let Some(month) = line.subscript.filter(|m| (1..=12).contains(m)) {
        let slot = reading.monthly[(month - 1) as usize].get_or_insert_with(MonthlyRecord::default);
        slot.demand.push(entry);
    } else {
        reading.demand.push(entry);
    }
    Ok(())
}

fn apply_events(reading: &mut Reading, field: impl FnOnce(&mut EventLists) -> &mut Vec<EventRecord>, line: &ObisLine) -> Result<()> {
    let list = field(reading.events.get_or_insert_with(Default::default));
    for raw in &line.raw_values {
        if is_sentinel_pair(raw) {
            continue;
        }
        if let ObisValue::TimestampPair { start, end } = classify_value(raw)? {
            list.push(EventRecord { start, end });
        }
    }
    Ok(())
}

/// Energy-register codes: `{1,2,5,6,7,8}.8.{0..}` per the import/export ×
/// active/reactive-quadrant convention — 1=active import, 2=active export,
/// 5/8=inductive (Q1/Q4), 6/7=capacitive (Q2/Q3). The trailing digit is the
/// tariff index (`0` = all-tariff total); a `*N` subscript routes the entry
/// into `monthly[N-1]` instead of the top-level list.
fn apply_energy(reading: &mut Reading, code: &str, line: &ObisLine) -> Result<()> {
    let mut parts = code.split('.');
    let (Some(group), Some("8"), Some(tariff_str)) = (parts.next(), parts.next(), parts.next()) else {
        return Ok(()); // unrecognized code family: ignored, not fatal.
    };
    let Ok(tariff) = tariff_str.parse::<u8>() else { return Ok(()) };

    let (direction, kind) = match group {
        "1" => (Direction::Import, EnergyKind::Active),
        "2" => (Direction::Export, EnergyKind::Active),
        "5" => (Direction::Import, EnergyKind::Inductive),
        "8" => (Direction::Export, EnergyKind::Inductive),
        "6" => (Direction::Import, EnergyKind::Capacitive),
        "7" => (Direction::Export, EnergyKind::Capacitive),
        _ => return Ok(()),
    };

    let magnitude = magnitude_from(first_value(line)?)?;
    let entry = EnergyRegister { tariff, direction, kind, magnitude };

    if let Some(month) = line.subscript.filter(|m| (1..=12).contains(m)) {
        let slot = reading.monthly[(month - 1) as usize].get_or_insert_with(MonthlyRecord::default);
        reading::upsert_energy(&mut slot.energy, entry);
    } else {
        reading.set_energy(entry);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_energy_and_instantaneous_from_s1_scenario() {
        let payload = "1.8.0(00123.456*kWh)\r\n32.7.0(220.5*V)\r\nF.F(0000000000000090)\r\n!\r\n";
        let reading = decode_reading(payload).unwrap();
        assert_eq!(reading.energy.len(), 1);
        assert_eq!(reading.energy[0].magnitude.value, 123.456);
        assert_eq!(reading.instantaneous.unwrap().voltage_l1.unwrap().value, 220.5);
        let status = reading.status.unwrap();
        assert_eq!(status.ff_alarms, vec!["terminal_cover_open", "battery_low"]);
    }

    #[test]
    fn monthly_subscript_routes_into_monthly_array() {
        let payload = "1.8.0*3(100.000*kWh)\r\n!\r\n";
        let reading = decode_reading(payload).unwrap();
        assert!(reading.energy.is_empty());
        let month3 = reading.monthly[2].as_ref().unwrap();
        assert_eq!(month3.energy[0].magnitude.value, 100.000);
    }

    #[test]
    fn load_profile_columns_and_records_merge() {
        let payload = "97.1.0(1.8.0*kWh)\r\nP.01(24-01-01,00:00)(12.5)\r\n!\r\n";
        let reading = decode_reading(payload).unwrap();
        let lp = reading.load_profile.unwrap();
        assert_eq!(lp.columns.len(), 1);
        assert_eq!(lp.records.len(), 1);
        assert_eq!(lp.records[0].values, vec![12.5]);
    }

    #[test]
    fn sentinel_event_pairs_are_pruned() {
        let payload = "98.1.0(00-00-00,00:00;00-00-00,00:00)(24-01-01,08:00;24-01-01,08:05)\r\n!\r\n";
        let reading = decode_reading(payload).unwrap();
        assert_eq!(reading.events.unwrap().voltage_warnings.len(), 1);
    }
}
