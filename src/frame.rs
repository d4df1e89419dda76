//! Framing Codec — encodes/decodes the five on-wire message shapes and
//! computes/verifies the Block Check Character.
//!
//! Grounded on `serial::iec62056::{control, calculate_bcc, build_*_message,
//! build_*_command, parse_identification}` in the teacher app, generalized
//! into a single value-typed `Frame` enum with one decode entry point
//! instead of one free function per message shape.

use crate::error::{MeterError, Result};

/// Control characters used in IEC 62056-21 Mode C.
pub mod control {
    pub const SOH: u8 = 0x01;
    pub const STX: u8 = 0x02;
    pub const ETX: u8 = 0x03;
    pub const EOT: u8 = 0x04;
    pub const ACK: u8 = 0x06;
    pub const NAK: u8 = 0x15;
    pub const CR: u8 = 0x0D;
    pub const LF: u8 = 0x0A;
}

/// The `cmd` token inside a `SOH`-framed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    R1,
    R2,
    W1,
    W2,
    E2,
    P1,
    B0,
}

impl CommandKind {
    fn as_bytes(self) -> &'static [u8; 2] {
        match self {
            CommandKind::R1 => b"R1",
            CommandKind::R2 => b"R2",
            CommandKind::W1 => b"W1",
            CommandKind::W2 => b"W2",
            CommandKind::E2 => b"E2",
            CommandKind::P1 => b"P1",
            CommandKind::B0 => b"B0",
        }
    }

    fn from_bytes(b: &[u8]) -> Option<Self> {
        match b {
            b"R1" => Some(CommandKind::R1),
            b"R2" => Some(CommandKind::R2),
            b"W1" => Some(CommandKind::W1),
            b"W2" => Some(CommandKind::W2),
            b"E2" => Some(CommandKind::E2),
            b"P1" => Some(CommandKind::P1),
            b"B0" => Some(CommandKind::B0),
            _ => None,
        }
    }

    /// `B0` (break) carries no `STX...ETX` body; every other command does.
    fn has_body(self) -> bool {
        !matches!(self, CommandKind::B0)
    }
}

/// A tagged union of every on-wire message shape (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `/?<addr>!\r\n`, sent at initial baud.
    Request { address: Option<String> },
    /// `/FLAGZ<gen>EDAS(MODEL)\r\n`, the meter's handshake reply.
    Identification {
        flag: String,
        baud_char: char,
        generation: Option<String>,
        edas: String,
        model: String,
    },
    /// `ACK '0' Z Y \r\n`; `baud_char` is the chosen baud, `mode_char` the
    /// readout-mode selector.
    OptionSelect { baud_char: char, mode_char: char },
    /// `STX payload ETX BCC`.
    DataBlock { payload: String },
    /// `SOH cmd [STX body ETX] BCC` with `cmd in {R1,R2,W1,W2,E2,P1,B0}`.
    Command { kind: CommandKind, obis: Option<String>, value: Option<String> },
    ShortAck,
    ShortNak,
}

/// BCC: XOR-fold of every byte from (excluding) the opening SOH/STX through
/// (including) the closing ETX, kept to the low 7 bits.
pub fn calculate_bcc(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b) & 0x7F
}

pub fn verify_bcc(data: &[u8], expected: u8) -> Result<()> {
    let got = calculate_bcc(data);
    if got == expected {
        Ok(())
    } else {
        Err(MeterError::BccMismatch { expected, got })
    }
}

/// Encode a `Frame` to the exact bytes that go on the wire.
pub fn encode(frame: &Frame) -> Vec<u8> {
    match frame {
        Frame::Request { address } => {
            let mut msg = vec![b'/', b'?'];
            if let Some(addr) = address {
                msg.extend_from_slice(addr.as_bytes());
            }
            msg.push(b'!');
            msg.push(control::CR);
            msg.push(control::LF);
            msg
        }
        Frame::Identification { flag, baud_char, generation, edas, model } => {
            let mut msg = vec![b'/'];
            msg.extend_from_slice(flag.as_bytes());
            msg.push(*baud_char as u8);
            if let Some(gen) = generation {
                msg.push(b'<');
                msg.extend_from_slice(gen.as_bytes());
                msg.push(b'>');
            }
            msg.extend_from_slice(edas.as_bytes());
            msg.push(b'(');
            msg.extend_from_slice(model.as_bytes());
            msg.push(b')');
            msg.push(control::CR);
            msg.push(control::LF);
            msg
        }
        Frame::OptionSelect { baud_char, mode_char } => {
            vec![
                control::ACK,
                b'0',
                *baud_char as u8,
                *mode_char as u8,
                control::CR,
                control::LF,
            ]
        }
        Frame::DataBlock { payload } => {
            let mut msg = vec![control::STX];
            msg.extend_from_slice(payload.as_bytes());
            msg.push(control::ETX);
            let bcc = calculate_bcc(&msg[1..]);
            msg.push(bcc);
            msg
        }
        Frame::Command { kind, obis, value } => {
            let mut msg = vec![control::SOH];
            msg.extend_from_slice(kind.as_bytes());
            if kind.has_body() {
                msg.push(control::STX);
                if let Some(obis) = obis {
                    msg.extend_from_slice(obis.as_bytes());
                }
                msg.push(b'(');
                if let Some(value) = value {
                    msg.extend_from_slice(value.as_bytes());
                }
                msg.push(b')');
                msg.push(control::ETX);
            } else {
                msg.push(control::ETX);
            }
            let bcc = calculate_bcc(&msg[1..]);
            msg.push(bcc);
            msg
        }
        Frame::ShortAck => vec![control::ACK],
        Frame::ShortNak => vec![control::NAK],
    }
}

/// Decode a complete on-wire message into a `Frame`. Pure, no I/O: callers
/// (the Line Driver / Session) are responsible for accumulating exactly one
/// message's worth of bytes first.
pub fn decode(bytes: &[u8]) -> Result<Frame> {
    if bytes.is_empty() {
        return Err(MeterError::Handshake("empty frame".into()));
    }

    match bytes[0] {
        control::ACK if bytes.len() == 1 => Ok(Frame::ShortAck),
        control::NAK if bytes.len() == 1 => Ok(Frame::ShortNak),
        control::ACK => decode_option_select(bytes),
        b'/' => decode_slash(bytes),
        control::STX => decode_data_block(bytes),
        control::SOH => decode_command(bytes),
        other => Err(MeterError::Handshake(format!("unrecognized leading byte 0x{:02X}", other))),
    }
}

fn decode_slash(bytes: &[u8]) -> Result<Frame> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| MeterError::Handshake("non-UTF8 identification/request line".into()))?;
    let trimmed = text.trim_end_matches(['\r', '\n']);
    let content = &trimmed[1..]; // drop leading '/'

    if let Some(rest) = content.strip_prefix('?') {
        let addr = rest.strip_suffix('!').unwrap_or(rest);
        let address = if addr.is_empty() { None } else { Some(addr.to_string()) };
        return Ok(Frame::Request { address });
    }

    if content.len() < 4 {
        return Err(MeterError::Handshake("identification line too short".into()));
    }
    let flag = content[..3].to_string();
    let baud_char = content.chars().nth(3).unwrap();
    crate::frame::baud_from_char(baud_char)?;

    let after_baud = &content[4..];
    let (generation, after_gen) = if let Some(gen_start) = after_baud.find('<') {
        let gen_end = after_baud
            .find('>')
            .ok_or_else(|| MeterError::Handshake("unterminated generation marker".into()))?;
        (Some(after_baud[gen_start + 1..gen_end].to_string()), &after_baud[gen_end + 1..])
    } else {
        (None, after_baud)
    };

    let model_start = after_gen
        .find('(')
        .ok_or_else(|| MeterError::Handshake("missing model field".into()))?;
    let model_end = after_gen
        .find(')')
        .ok_or_else(|| MeterError::Handshake("unterminated model field".into()))?;
    let edas = after_gen[..model_start].to_string();
    let model = after_gen[model_start + 1..model_end].to_string();

    Ok(Frame::Identification { flag, baud_char, generation, edas, model })
}

fn decode_option_select(bytes: &[u8]) -> Result<Frame> {
    if bytes.len() < 4 {
        return Err(MeterError::Handshake("option-select frame too short".into()));
    }
    Ok(Frame::OptionSelect { baud_char: bytes[2] as char, mode_char: bytes[3] as char })
}

fn decode_data_block(bytes: &[u8]) -> Result<Frame> {
    let etx_idx = bytes
        .iter()
        .position(|&b| b == control::ETX)
        .ok_or_else(|| MeterError::Handshake("data block missing ETX".into()))?;
    if bytes.len() <= etx_idx + 1 {
        return Err(MeterError::Handshake("data block missing BCC byte".into()));
    }
    let received_bcc = bytes[etx_idx + 1];
    verify_bcc(&bytes[1..=etx_idx], received_bcc)?;
    let payload = String::from_utf8_lossy(&bytes[1..etx_idx]).to_string();
    Ok(Frame::DataBlock { payload })
}

fn decode_command(bytes: &[u8]) -> Result<Frame> {
    if bytes.len() < 3 {
        return Err(MeterError::Handshake("command frame too short".into()));
    }
    let kind = CommandKind::from_bytes(&bytes[1..3])
        .ok_or_else(|| MeterError::Handshake("unrecognized command token".into()))?;

    if !kind.has_body() {
        let etx_idx = bytes
            .iter()
            .position(|&b| b == control::ETX)
            .ok_or_else(|| MeterError::Handshake("break frame missing ETX".into()))?;
        let received_bcc = *bytes.get(etx_idx + 1).ok_or_else(|| {
            MeterError::Handshake("break frame missing BCC byte".into())
        })?;
        verify_bcc(&bytes[1..=etx_idx], received_bcc)?;
        return Ok(Frame::Command { kind, obis: None, value: None });
    }

    let stx_idx = bytes
        .iter()
        .position(|&b| b == control::STX)
        .ok_or_else(|| MeterError::Handshake("command frame missing STX".into()))?;
    let etx_idx = bytes
        .iter()
        .position(|&b| b == control::ETX)
        .ok_or_else(|| MeterError::Handshake("command frame missing ETX".into()))?;
    if bytes.len() <= etx_idx + 1 {
        return Err(MeterError::Handshake("command frame missing BCC byte".into()));
    }
    let received_bcc = bytes[etx_idx + 1];
    verify_bcc(&bytes[1..=etx_idx], received_bcc)?;

    let body = std::str::from_utf8(&bytes[stx_idx + 1..etx_idx])
        .map_err(|_| MeterError::Handshake("non-UTF8 command body".into()))?;
    let open = body.find('(').ok_or_else(|| MeterError::Handshake("command body missing '('".into()))?;
    let close = body.rfind(')').ok_or_else(|| MeterError::Handshake("command body missing ')'".into()))?;
    let obis_str = &body[..open];
    let value_str = &body[open + 1..close];

    let obis = if obis_str.is_empty() { None } else { Some(obis_str.to_string()) };
    let value = if value_str.is_empty() { None } else { Some(value_str.to_string()) };
    Ok(Frame::Command { kind, obis, value })
}

/// Maps a Mode-C baud code character to the corresponding rate, per spec §4.2.
pub fn baud_from_char(c: char) -> Result<u32> {
    match c {
        '0' => Ok(300),
        '1' => Ok(600),
        '2' => Ok(1200),
        '3' => Ok(2400),
        '4' => Ok(4800),
        '5' => Ok(9600),
        '6' => Ok(19200),
        other => Err(MeterError::UnknownBaud(other)),
    }
}

pub fn char_from_baud(baud: u32) -> Option<char> {
    match baud {
        300 => Some('0'),
        600 => Some('1'),
        1200 => Some('2'),
        2400 => Some('3'),
        4800 => Some('4'),
        9600 => Some('5'),
        19200 => Some('6'),
        _ => None,
    }
}

/// Render control bytes as `<SOH>`/`<STX>`/... for human-readable logs, the
/// same convention the teacher's `format_bytes_for_display` uses.
pub fn format_bytes_for_display(bytes: &[u8]) -> String {
    let mut out = String::new();
    for &b in bytes {
        match b {
            control::SOH => out.push_str("<SOH>"),
            control::STX => out.push_str("<STX>"),
            control::ETX => out.push_str("<ETX>"),
            control::EOT => out.push_str("<EOT>"),
            control::ACK => out.push_str("<ACK>"),
            control::NAK => out.push_str("<NAK>"),
            control::CR => out.push_str("<CR>"),
            control::LF => out.push_str("<LF>"),
            0x20..=0x7E => out.push(b as char),
            other => out.push_str(&format!("<0x{:02X}>", other)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bcc_is_low_seven_bits_of_xor() {
        let data = b"test";
        assert_eq!(calculate_bcc(data), (b't' ^ b'e' ^ b's' ^ b't') & 0x7F);
    }

    #[test]
    fn baud_char_round_trips() {
        assert_eq!(baud_from_char('5').unwrap(), 9600);
        assert_eq!(char_from_baud(9600), Some('5'));
        assert!(baud_from_char('9').is_err());
    }

    #[test]
    fn request_round_trips_with_and_without_address() {
        for f in [
            Frame::Request { address: Some("123456789".into()) },
            Frame::Request { address: None },
        ] {
            let bytes = encode(&f);
            assert_eq!(decode(&bytes).unwrap(), f);
        }
    }

    #[test]
    fn identification_round_trips_with_generation() {
        let f = Frame::Identification {
            flag: "MKS".into(),
            baud_char: '5',
            generation: Some("2".into()),
            edas: "ADM".into(),
            model: "M550.2251".into(),
        };
        let bytes = encode(&f);
        assert_eq!(bytes, b"/MKS5<2>ADM(M550.2251)\r\n");
        assert_eq!(decode(&bytes).unwrap(), f);
    }

    #[test]
    fn identification_round_trips_without_generation() {
        let f = Frame::Identification {
            flag: "MKS".into(),
            baud_char: '5',
            generation: None,
            edas: "ADM".into(),
            model: "M550.2251".into(),
        };
        assert_eq!(decode(&encode(&f)).unwrap(), f);
    }

    #[test]
    fn option_select_round_trips() {
        let f = Frame::OptionSelect { baud_char: '5', mode_char: '0' };
        assert_eq!(encode(&f), vec![control::ACK, b'0', b'5', b'0', control::CR, control::LF]);
        assert_eq!(decode(&encode(&f)).unwrap(), f);
    }

    #[test]
    fn data_block_round_trips_and_verifies_bcc() {
        let f = Frame::DataBlock { payload: "0.0.0(510095849)\r\n!\r\n".into() };
        assert_eq!(decode(&encode(&f)).unwrap(), f);
    }

    #[test]
    fn data_block_detects_bcc_mismatch() {
        let mut bytes = encode(&Frame::DataBlock { payload: "1.8.0(1*kWh)".into() });
        *bytes.last_mut().unwrap() ^= 0xFF;
        assert!(matches!(decode(&bytes), Err(MeterError::BccMismatch { .. })));
    }

    #[test]
    fn commands_with_body_round_trip() {
        for kind in [CommandKind::R2, CommandKind::W2, CommandKind::P1, CommandKind::E2] {
            let f = Frame::Command { kind, obis: Some("1.8.0".into()), value: Some("val".into()) };
            assert_eq!(decode(&encode(&f)).unwrap(), f);
        }
    }

    #[test]
    fn break_command_has_no_body_and_round_trips() {
        let f = Frame::Command { kind: CommandKind::B0, obis: None, value: None };
        let bytes = encode(&f);
        assert_eq!(bytes[0], control::SOH);
        assert_eq!(&bytes[1..3], b"B0");
        assert_eq!(decode(&bytes).unwrap(), f);
    }

    #[test]
    fn short_ack_and_nak_round_trip() {
        assert_eq!(decode(&encode(&Frame::ShortAck)).unwrap(), Frame::ShortAck);
        assert_eq!(decode(&encode(&Frame::ShortNak)).unwrap(), Frame::ShortNak);
    }

    #[test]
    fn format_bytes_renders_control_names() {
        assert_eq!(format_bytes_for_display(&[control::SOH, b'P', b'1', control::STX]), "<SOH>P1<STX>");
    }
}
