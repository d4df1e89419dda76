//! Load-profile column definitions and chunked data-block decoding.
//!
//! Grounded on the teacher app's `read_load_profile` command, which parsed
//! two ad-hoc line formats ("Type A" `P.01(...)...` and "Type B (BYL)"
//! `LPCH:.../(...)...`) by hand. Generalized here into one column-definition
//! parser plus one strict-shape data-line parser, per spec §4.4.

use super::grammar::{classify_value, ObisLine, ObisValue};
use super::reading::{ColumnDef, LoadProfileRecord};
use crate::error::{MeterError, Result};

/// Parses a `97.P.0(c1,c2,...)` column-definition line, where each
/// `ci = <obis>*<unit>` (unit may be absent).
pub fn parse_columns(line: &ObisLine) -> Result<Vec<ColumnDef>> {
    let body = line
        .raw_values
        .first()
        .ok_or_else(|| MeterError::ObisParse("column-definition line has no body".to_string()))?;

    Ok(body
        .split(',')
        .filter(|c| !c.is_empty())
        .map(|c| match c.split_once('*') {
            Some((obis, unit)) => ColumnDef { obis: obis.to_string(), unit: Some(unit.to_string()) },
            None => ColumnDef { obis: c.to_string(), unit: None },
        })
        .collect())
}

/// Parses one `P.0N(yy-mm-dd,hh:mm)(v1)(v2)...` data line. The number of
/// value groups must exactly equal `column_count`; a mismatch is
/// `LoadProfileShape`, never silently truncated or padded (spec §4.4).
pub fn parse_record(line: &ObisLine, column_count: usize) -> Result<LoadProfileRecord> {
    let (ts_raw, value_raws) = line
        .raw_values
        .split_first()
        .ok_or_else(|| MeterError::ObisParse("load profile record has no timestamp".to_string()))?;

    if value_raws.len() != column_count {
        return Err(MeterError::LoadProfileShape { expected: column_count, got: value_raws.len() });
    }

    let timestamp = match classify_value(ts_raw)? {
        ObisValue::Timestamp(ts) => ts,
        other => return Err(MeterError::ObisParse(format!("load profile timestamp malformed: {other:?}"))),
    };

    let mut values = Vec::with_capacity(value_raws.len());
    for raw in value_raws {
        let v = match classify_value(raw)? {
            ObisValue::Decimal { value, .. } => value,
            ObisValue::Integer { value, .. } => value as f64,
            other => return Err(MeterError::ObisParse(format!("load profile value malformed: {other:?}"))),
        };
        values.push(v);
    }

    Ok(LoadProfileRecord { timestamp, values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obis::grammar::parse_line;

    #[test]
    fn parses_column_definitions() {
        let line = parse_line("97.1.0(1.8.0*kWh,2.8.0*kWh)").unwrap();
        let cols = parse_columns(&line).unwrap();
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].obis, "1.8.0");
        assert_eq!(cols[0].unit.as_deref(), Some("kWh"));
    }

    #[test]
    fn parses_data_record_with_matching_column_count() {
        let line = parse_line("P.01(24-01-01,00:00)(123.456)").unwrap();
        let record = parse_record(&line, 1).unwrap();
        assert_eq!(record.values, vec![123.456]);
    }

    #[test]
    fn mismatched_column_count_is_shape_error() {
        let line = parse_line("P.01(24-01-01,00:00)(123.456)(789.0)").unwrap();
        assert!(matches!(
            parse_record(&line, 1),
            Err(MeterError::LoadProfileShape { expected: 1, got: 2 })
        ));
    }
}
