//! FF (alarm) / GF (geographic) bit-packed status word decoding.
//!
//! Grounded on `serial::iec62056::{parse_gf_code, GfCodeFields,
//! edas_name_from_id}` in the teacher app. The bit layout follows the
//! spec's explicit table rather than the teacher's `parse_gf_code`, which
//! additionally names bits 32-33 as a branch id (`kol_id`) the spec marks
//! reserved — see DESIGN.md for that divergence.

/// Named alarm bits of the FF word. Unlisted bits have no name and are
/// simply absent from `StatusWord::ff_alarms`.
const FF_ALARM_NAMES: &[(u8, &str)] = &[
    (0, "voltage_missing_l1"),
    (1, "voltage_missing_l2"),
    (2, "voltage_missing_l3"),
    (3, "reverse_energy_flow"),
    (4, "terminal_cover_open"),
    (5, "magnetic_tampering"),
    (6, "meter_cover_open"),
    (7, "battery_low"),
    (8, "real_time_clock_fault"),
    (9, "program_memory_fault"),
    (10, "current_circuit_fault"),
    (11, "demand_reset_performed"),
    (12, "calibration_switch_open"),
];

/// Returns the named alarms whose bit is set, in ascending bit order.
pub fn ff_alarm_names(ff: u64) -> Vec<String> {
    FF_ALARM_NAMES
        .iter()
        .filter(|(bit, _)| ff & (1u64 << bit) != 0)
        .map(|(_, name)| name.to_string())
        .collect()
}

/// Turkish distribution-company (EDAŞ) names, keyed by the GF word's 5-bit
/// EDAŞ id field.
pub fn edas_name_from_id(id: u8) -> &'static str {
    match id {
        1 => "AKDENİZ EDAŞ",
        2 => "AKEDAŞ",
        3 => "ARAS EDAŞ",
        4 => "AYDEM",
        5 => "AYEDAŞ",
        6 => "BAŞKENT EDAŞ",
        7 => "BOĞAZİÇİ EDAŞ",
        8 => "ÇAMLIBEL EDAŞ",
        9 => "ÇORUH EDAŞ",
        10 => "DİCLE EDAŞ",
        11 => "FIRAT EDAŞ",
        12 => "GEDİZ EDAŞ",
        13 => "KCETAŞ",
        14 => "MERAM EDAŞ",
        15 => "OSMANGAZİ EDAŞ",
        16 => "SAKARYA EDAŞ",
        17 => "TOROSLAR EDAŞ",
        18 => "TRAKYA EDAŞ",
        19 => "ULUDAĞ EDAŞ",
        20 => "VANGÖLÜ EDAŞ",
        21 => "YEŞİLIRMAK EDAŞ",
        _ => "Unknown",
    }
}

/// The GF word's bit-sliced fields, per spec §4.4: bits 0-4 EDAŞ id, 5-19
/// substation id (15 bits), 20-23 transformer id, 24-29 feeder id, 30-31
/// phase, 34-43 max current amps. Bits 32-33 and 44-63 are reserved.
pub struct GfFields {
    pub edas_id: u8,
    pub edas_name: &'static str,
    pub substation_id: u16,
    pub transformer_id: u8,
    pub feeder_id: u8,
    pub phase: u8,
    pub max_current_amps: u16,
}

pub fn decode_gf(gf: u64) -> GfFields {
    let edas_id = (gf & 0x1F) as u8;
    let substation_id = ((gf >> 5) & 0x7FFF) as u16;
    let transformer_id = ((gf >> 20) & 0x0F) as u8;
    let feeder_id = ((gf >> 24) & 0x3F) as u8;
    let phase = ((gf >> 30) & 0x03) as u8;
    let max_current_amps = ((gf >> 34) & 0x3FF) as u16;

    GfFields {
        edas_id,
        edas_name: edas_name_from_id(edas_id),
        substation_id,
        transformer_id,
        feeder_id,
        phase,
        max_current_amps,
    }
}

/// `96.6.1` battery status: `'0'` healthy, anything else low.
pub fn battery_status_from_code(value: &str) -> String {
    match value.trim() {
        "0" => "ok".to_string(),
        _ => "low".to_string(),
    }
}

/// `96.3.10` relay status: `'0'` connected, `'1'` disconnected.
pub fn relay_status_from_code(value: &str) -> String {
    match value.trim() {
        "0" => "connected".to_string(),
        "1" => "disconnected".to_string(),
        other => format!("unknown({other})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ff_decodes_named_bits_from_s1_scenario() {
        // F.F(0000000000000090) = 0x90 = bits 4 and 7 set.
        let names = ff_alarm_names(0x90);
        assert_eq!(names, vec!["terminal_cover_open", "battery_low"]);
    }

    #[test]
    fn ff_with_no_named_bits_is_empty() {
        assert!(ff_alarm_names(1 << 20).is_empty());
    }

    #[test]
    fn gf_slices_fields_per_spec_layout() {
        // edas=4 (AYDEM), substation=100, transformer=3, feeder=7, phase=1, max_current=63
        let gf = 4u64
            | (100u64 << 5)
            | (3u64 << 20)
            | (7u64 << 24)
            | (1u64 << 30)
            | (63u64 << 34);
        let fields = decode_gf(gf);
        assert_eq!(fields.edas_id, 4);
        assert_eq!(fields.edas_name, "AYDEM");
        assert_eq!(fields.substation_id, 100);
        assert_eq!(fields.transformer_id, 3);
        assert_eq!(fields.feeder_id, 7);
        assert_eq!(fields.phase, 1);
        assert_eq!(fields.max_current_amps, 63);
    }

    #[test]
    fn battery_and_relay_status_codes() {
        assert_eq!(battery_status_from_code("0"), "ok");
        assert_eq!(battery_status_from_code("1"), "low");
        assert_eq!(relay_status_from_code("0"), "connected");
        assert_eq!(relay_status_from_code("1"), "disconnected");
    }
}
