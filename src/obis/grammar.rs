//! OBIS payload line grammar: splits a textual payload into `code(value)...`
//! lines and classifies each value's shape.
//!
//! Grounded on `serial::iec62056::{parse_obis_response, parse_data_block}` in
//! the teacher app, generalized from "one value per line, unit after `*`"
//! to the full value-shape table in spec §4.4 (timestamps, timestamp pairs,
//! hex words, tariff schedule runs).

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{MeterError, Result};

/// One decoded `code[*subscript](v1)(v2)...` line.
#[derive(Debug, Clone, PartialEq)]
pub struct ObisLine {
    pub code: String,
    pub subscript: Option<u32>,
    pub raw_values: Vec<String>,
}

/// A recognized value shape (spec §4.4's value-kind table).
#[derive(Debug, Clone, PartialEq)]
pub enum ObisValue {
    Decimal { raw: String, value: f64, unit: Option<String> },
    Integer { raw: String, value: i64, unit: Option<String> },
    Timestamp(NaiveDateTime),
    TimestampPair { start: NaiveDateTime, end: NaiveDateTime },
    ClockTime(NaiveTime),
    CalendarDate(NaiveDate),
    HexWord { raw: String, value: u64 },
    TariffSwitchTimes(Vec<Option<(u8, u8)>>),
    TariffSlotAssignment(Vec<u8>),
    Text(String),
}

/// Splits a full data-block payload into lines, tolerating leading `\r\n`
/// and ignoring the sentinel line `!`.
pub fn parse_block(payload: &str) -> Vec<ObisLine> {
    payload
        .split("\r\n")
        .flat_map(|l| l.split('\n'))
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != "!")
        .filter_map(parse_line)
        .collect()
}

/// Parses one `code*N(v1)(v2)...` line.
pub fn parse_line(line: &str) -> Option<ObisLine> {
    let open = line.find('(')?;
    let (code_part, rest) = line.split_at(open);

    let (code, subscript) = match code_part.split_once('*') {
        Some((c, n)) if n.chars().all(|ch| ch.is_ascii_digit()) && !n.is_empty() => {
            (c.to_string(), n.parse::<u32>().ok())
        }
        _ => (code_part.to_string(), None),
    };

    let raw_values = split_groups(rest);
    Some(ObisLine { code, subscript, raw_values })
}

/// Splits `(a)(b)(c)` into `["a", "b", "c"]`.
fn split_groups(s: &str) -> Vec<String> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut cur = String::new();
    for c in s.chars() {
        match c {
            '(' => {
                depth += 1;
                if depth > 1 {
                    cur.push(c);
                }
            }
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    groups.push(std::mem::take(&mut cur));
                } else {
                    cur.push(c);
                }
            }
            _ if depth > 0 => cur.push(c),
            _ => {}
        }
    }
    groups
}

/// Classifies one raw `(...)` group's contents into its `ObisValue` shape.
/// Does not guess units: an absent `*unit` tag is dimensionless, never
/// inferred from context (spec §9 open question).
pub fn classify_value(raw: &str) -> Result<ObisValue> {
    if raw.contains(';') {
        return classify_timestamp_pair(raw);
    }
    if raw.contains(',') {
        return classify_timestamp(raw).map(ObisValue::Timestamp);
    }
    if is_clock_time(raw) {
        let t = NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .map_err(|e| MeterError::ObisParse(format!("bad clock time '{raw}': {e}")))?;
        return Ok(ObisValue::ClockTime(t));
    }
    if is_calendar_date(raw) {
        return Ok(ObisValue::CalendarDate(parse_two_digit_date(raw)?));
    }
    if let Some((mag, unit)) = raw.split_once('*') {
        return classify_magnitude(mag, Some(unit.to_string()), raw);
    }
    if raw.len() == 16 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
        let value = u64::from_str_radix(raw, 16)
            .map_err(|e| MeterError::ObisParse(format!("bad hex word '{raw}': {e}")))?;
        return Ok(ObisValue::HexWord { raw: raw.to_string(), value });
    }
    if raw.len() == 32 && raw.chars().all(|c| c.is_ascii_digit()) {
        return Ok(ObisValue::TariffSwitchTimes(parse_tariff_switch_times(raw)));
    }
    if raw.len() == 8 && raw.chars().all(|c| ('0'..='4').contains(&c)) {
        return Ok(ObisValue::TariffSlotAssignment(
            raw.chars().map(|c| c.to_digit(10).unwrap() as u8).collect(),
        ));
    }
    if let Ok(value) = raw.parse::<f64>() {
        return classify_magnitude_plain(raw, value);
    }
    Ok(ObisValue::Text(raw.to_string()))
}

fn classify_magnitude(mag: &str, unit: Option<String>, raw: &str) -> Result<ObisValue> {
    if mag.contains('.') {
        let value: f64 = mag
            .parse()
            .map_err(|e| MeterError::ObisParse(format!("bad decimal '{mag}': {e}")))?;
        Ok(ObisValue::Decimal { raw: raw.to_string(), value, unit })
    } else {
        let value: i64 = mag
            .parse()
            .map_err(|e| MeterError::ObisParse(format!("bad integer '{mag}': {e}")))?;
        Ok(ObisValue::Integer { raw: raw.to_string(), value, unit })
    }
}

fn classify_magnitude_plain(raw: &str, value: f64) -> Result<ObisValue> {
    if raw.contains('.') {
        Ok(ObisValue::Decimal { raw: raw.to_string(), value, unit: None })
    } else {
        Ok(ObisValue::Integer { raw: raw.to_string(), value: value as i64, unit: None })
    }
}

fn is_clock_time(s: &str) -> bool {
    s.len() == 8 && s.as_bytes()[2] == b':' && s.as_bytes()[5] == b':' && s.replace(':', "").chars().all(|c| c.is_ascii_digit())
}

fn is_calendar_date(s: &str) -> bool {
    s.len() == 8 && s.as_bytes()[2] == b'-' && s.as_bytes()[5] == b'-' && s.replace('-', "").chars().all(|c| c.is_ascii_digit())
}

fn parse_two_digit_date(s: &str) -> Result<NaiveDate> {
    let full = format!("20{s}");
    NaiveDate::parse_from_str(&full, "%Y-%m-%d")
        .map_err(|e| MeterError::ObisParse(format!("bad date '{s}': {e}")))
}

fn classify_timestamp(s: &str) -> Result<NaiveDateTime> {
    let (date_part, time_part) =
        s.split_once(',').ok_or_else(|| MeterError::ObisParse(format!("bad timestamp '{s}'")))?;
    let date = parse_two_digit_date(date_part)?;
    let time = NaiveTime::parse_from_str(time_part, "%H:%M")
        .map_err(|e| MeterError::ObisParse(format!("bad timestamp time '{s}': {e}")))?;
    Ok(NaiveDateTime::new(date, time))
}

fn classify_timestamp_pair(s: &str) -> Result<ObisValue> {
    let (start_str, end_str) =
        s.split_once(';').ok_or_else(|| MeterError::ObisParse(format!("bad timestamp pair '{s}'")))?;

    if is_sentinel_timestamp(start_str) {
        // Sentinel record: caller drops it. We still need a value to return
        // so pruning happens one layer up where we know the whole line is
        // being discarded; signal via a dedicated error the caller filters.
        return Err(MeterError::ObisParse("sentinel timestamp pair".to_string()));
    }

    let start = classify_timestamp(start_str)?;
    let end = classify_timestamp(end_str)?;
    Ok(ObisValue::TimestampPair { start, end })
}

fn is_sentinel_timestamp(s: &str) -> bool {
    s.starts_with("00-00-00")
}

/// Whether a raw `(start;end)` group is the sentinel "unused event slot"
/// entry, so callers building event lists can skip it before calling
/// `classify_value` (which rejects sentinel pairs as an error).
pub fn is_sentinel_pair(raw: &str) -> bool {
    raw.split_once(';').map(|(start, _)| is_sentinel_timestamp(start)).unwrap_or(false)
}

/// 32-digit run of 4-digit `HHMM` slots, `9999` meaning unused.
fn parse_tariff_switch_times(raw: &str) -> Vec<Option<(u8, u8)>> {
    raw.as_bytes()
        .chunks(4)
        .map(|chunk| {
            let s = std::str::from_utf8(chunk).unwrap();
            if s == "9999" {
                None
            } else {
                let hh: u8 = s[0..2].parse().unwrap_or(0);
                let mm: u8 = s[2..4].parse().unwrap_or(0);
                Some((hh, mm))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_line_with_unit() {
        let line = parse_line("1.8.0(00123.456*kWh)").unwrap();
        assert_eq!(line.code, "1.8.0");
        assert_eq!(line.subscript, None);
        assert_eq!(line.raw_values, vec!["00123.456*kWh"]);
    }

    #[test]
    fn parses_monthly_subscript() {
        let line = parse_line("1.8.1*3(100.000*kWh)").unwrap();
        assert_eq!(line.code, "1.8.1");
        assert_eq!(line.subscript, Some(3));
    }

    #[test]
    fn parses_multiple_value_groups() {
        let line = parse_line("1.6.0(001.234*kW)(24-12-15,14:30)").unwrap();
        assert_eq!(line.raw_values, vec!["001.234*kW", "24-12-15,14:30"]);
    }

    #[test]
    fn block_ignores_sentinel_and_blank_lines() {
        let lines = parse_block("\r\n1.8.0(1*kWh)\r\n!\r\n32.7.0(220.5*V)\r\n");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn classifies_decimal_with_unit() {
        assert_eq!(
            classify_value("123.456*kWh").unwrap(),
            ObisValue::Decimal { raw: "123.456*kWh".into(), value: 123.456, unit: Some("kWh".into()) }
        );
    }

    #[test]
    fn classifies_integer_with_unit() {
        assert_eq!(
            classify_value("220*V").unwrap(),
            ObisValue::Integer { raw: "220*V".into(), value: 220, unit: Some("V".into()) }
        );
    }

    #[test]
    fn classifies_single_timestamp() {
        match classify_value("24-12-15,14:30").unwrap() {
            ObisValue::Timestamp(ts) => assert_eq!(ts.to_string(), "2024-12-15 14:30:00"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn classifies_timestamp_pair() {
        match classify_value("24-01-01,00:00;24-01-02,00:00").unwrap() {
            ObisValue::TimestampPair { start, end } => {
                assert!(end > start);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn sentinel_pair_is_rejected() {
        assert!(classify_value("00-00-00,00:00;00-00-00,00:00").is_err());
    }

    #[test]
    fn classifies_clock_and_calendar() {
        assert!(matches!(classify_value("14:30:35").unwrap(), ObisValue::ClockTime(_)));
        assert!(matches!(classify_value("24-12-15").unwrap(), ObisValue::CalendarDate(_)));
    }

    #[test]
    fn classifies_hex_word() {
        match classify_value("0000000000000090").unwrap() {
            ObisValue::HexWord { value, .. } => assert_eq!(value, 0x90),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn classifies_tariff_switch_times_with_unused_slots() {
        let exact = "0600".to_string() + "1300" + "1930" + &"9999".repeat(5);
        assert_eq!(exact.len(), 32);
        match classify_value(&exact).unwrap() {
            ObisValue::TariffSwitchTimes(slots) => {
                assert_eq!(slots[0], Some((6, 0)));
                assert_eq!(slots[1], Some((13, 0)));
                assert_eq!(slots[2], Some((19, 30)));
                assert_eq!(slots[3], None);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn classifies_tariff_slot_assignment() {
        match classify_value("11122200").unwrap() {
            ObisValue::TariffSlotAssignment(slots) => assert_eq!(slots, vec![1, 1, 1, 2, 2, 2, 0, 0]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_text() {
        assert_eq!(classify_value("M550.2251").unwrap(), ObisValue::Text("M550.2251".into()));
    }
}
