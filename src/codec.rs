//! Wire codec: framing, CRC, and the four on-air frame layouts.
//!
//! Every struct here is a parsed, owned representation of a frame; nothing
//! in this module holds a reference to the original buffer. All integers on
//! the wire are little-endian; all layouts are packed (no compiler-inserted
//! padding — any padding byte is explicit and part of the layout).

use crate::error::CodecError;
use crc::{Crc, CRC_16_IBM_3740};

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection, no xor-out.
/// `CRC_16_IBM_3740` is bit-for-bit this variant (check value `0x29B1` on
/// `b"123456789"`).
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute CRC-16/CCITT-FALSE over `data`. Empty input yields `0xFFFF`.
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

const SYNC_LEGACY: u16 = 0x1234;
const SYNC_MULTI_SENSOR: u16 = 0xABCD;
const SYNC_COMMAND: u16 = 0xCDEF;

const MULTI_HEADER_SIZE: usize = 60;
const VALUE_SIZE: usize = 5;
const MAX_VALUES: usize = 16;

const CMD_SIZE: usize = 201;
const CMD_DATA_SIZE: usize = 192;

const LEGACY_SIZE: usize = 19;

/// Node id of the base station. Reserved; never a valid telemetry sender.
pub const BASE_STATION_ID: u8 = 0;
/// Broadcast node id. Reserved; never a valid telemetry sender.
pub const NODE_ID_BROADCAST: u8 = 255;

/// Which frame kind a buffer's sync word and shape indicate, per
/// `detect_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Legacy,
    Multi,
    Command,
    Ack,
}

/// Inspect the first bytes of `buf` and classify the frame, without fully
/// parsing it. Returns `None` for anything too short or unrecognized.
pub fn detect_kind(buf: &[u8]) -> Option<FrameKind> {
    if buf.len() < 2 {
        return None;
    }
    let sync = u16::from_le_bytes([buf[0], buf[1]]);
    match sync {
        SYNC_LEGACY if buf.len() >= LEGACY_SIZE => Some(FrameKind::Legacy),
        SYNC_MULTI_SENSOR => Some(FrameKind::Multi),
        SYNC_COMMAND if buf.len() >= 3 && matches!(buf[2], CMD_ACK | CMD_NACK) => {
            Some(FrameKind::Ack)
        }
        SYNC_COMMAND => Some(FrameKind::Command),
        _ => None,
    }
}

/// A value-type tag carried in a [`SensorValue`]. The codec never
/// interprets the reading beyond this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    Temperature = 0,
    Humidity = 1,
    Pressure = 2,
    Light = 3,
    Voltage = 4,
    Current = 5,
    Power = 6,
    Energy = 7,
    GasResistance = 8,
    Battery = 9,
    SignalStrength = 10,
    Moisture = 11,
    Generic = 12,
    ThermistorTemperature = 13,
}

impl ValueType {
    /// Map a raw type byte to a known variant, if any. Unknown bytes are
    /// preserved as the raw tag in [`SensorValue::type_code`] rather than
    /// rejected — the codec tolerates value types it doesn't recognize.
    pub fn from_code(code: u8) -> Option<Self> {
        use ValueType::*;
        Some(match code {
            0 => Temperature,
            1 => Humidity,
            2 => Pressure,
            3 => Light,
            4 => Voltage,
            5 => Current,
            6 => Power,
            7 => Energy,
            8 => GasResistance,
            9 => Battery,
            10 => SignalStrength,
            11 => Moisture,
            12 => Generic,
            13 => ThermistorTemperature,
            _ => return None,
        })
    }

    /// Display unit for this value type, or `""` for unitless/unknown.
    pub fn unit(self) -> &'static str {
        use ValueType::*;
        match self {
            Temperature | ThermistorTemperature => "\u{b0}C",
            Humidity => "%RH",
            Pressure => "hPa",
            Light => "lx",
            Voltage => "V",
            Current => "mA",
            Power => "mW",
            Energy => "Wh",
            GasResistance => "\u{3a9}",
            Battery => "%",
            SignalStrength => "dBm",
            Moisture => "%",
            Generic => "",
        }
    }

    /// Lowercase snake_case name for this value type.
    pub fn name(self) -> &'static str {
        use ValueType::*;
        match self {
            Temperature => "temperature",
            Humidity => "humidity",
            Pressure => "pressure",
            Light => "light",
            Voltage => "voltage",
            Current => "current",
            Power => "power",
            Energy => "energy",
            GasResistance => "gas_resistance",
            Battery => "battery",
            SignalStrength => "signal_strength",
            Moisture => "moisture",
            Generic => "generic",
            ThermistorTemperature => "thermistor_temperature",
        }
    }
}

/// A single typed measurement carried in a multi-sensor telemetry frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorValue {
    /// Raw type tag as it appeared on the wire. May not map to a known
    /// [`ValueType`].
    pub type_code: u8,
    pub value: f32,
}

impl SensorValue {
    pub fn value_type(&self) -> Option<ValueType> {
        ValueType::from_code(self.type_code)
    }
}

/// Parsed `PACKET_MULTI_SENSOR` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiSensorPacket {
    pub network_id: u16,
    pub sensor_id: u8,
    pub battery_percent: u8,
    pub power_state: u8,
    pub last_command_seq: u8,
    pub ack_status: u8,
    pub location: String,
    pub zone: String,
    pub values: Vec<SensorValue>,
    /// Sideband metadata from the radio, not the frame itself.
    pub rssi: Option<f32>,
    /// Sideband metadata from the radio, not the frame itself.
    pub snr: Option<f32>,
}

/// Parsed command or ACK/NACK frame (same wire layout, see [`FrameKind`]).
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPacket {
    pub command_type: u8,
    pub target_sensor_id: u8,
    pub sequence_number: u8,
    pub data: Vec<u8>,
}

/// Parsed legacy v1 telemetry frame. No CRC guards this format; a
/// malformed buffer that merely starts with the right sync word and is
/// long enough will parse and produce garbage readings. That is an
/// accepted property of this format, not a bug.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegacyPacket {
    pub sensor_id: u8,
    pub network_id: u16,
    pub temperature: f32,
    pub humidity: f32,
    pub battery_percent: u8,
    pub rssi: i8,
    pub snr: f32,
}

/// Command type codes (spec.md §3 / §4.4).
pub mod command_type {
    pub const PING: u8 = 0x00;
    pub const GET_CONFIG: u8 = 0x01;
    pub const SET_INTERVAL: u8 = 0x02;
    pub const SET_LOCATION: u8 = 0x03;
    pub const SET_TEMP_THRESH: u8 = 0x04;
    pub const SET_BATTERY_THRESH: u8 = 0x05;
    pub const SET_MESH_CONFIG: u8 = 0x06;
    pub const RESTART: u8 = 0x07;
    pub const FACTORY_RESET: u8 = 0x08;
    pub const SET_LORA_PARAMS: u8 = 0x09;
    pub const TIME_SYNC: u8 = 0x0A;
    pub const SENSOR_ANNOUNCE: u8 = 0x0B;
    pub const BASE_WELCOME: u8 = 0x0C;
    pub const ACK: u8 = 0xA0;
    pub const NACK: u8 = 0xA1;
}
use command_type::{ACK as CMD_ACK, NACK as CMD_NACK};

/// Mesh packet-type codes. Reserved by the wire protocol; no routing logic
/// is attached to them (see spec.md Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MeshPacketType {
    Data = 0,
    RouteRequest = 1,
    RouteReply = 2,
    RouteError = 3,
    NeighborBeacon = 4,
}

/// Parse a `MULTI` frame. `rssi`/`snr` are radio metadata, carried through
/// unchanged; they are not part of the wire frame.
pub fn parse_multi(
    buf: &[u8],
    rssi: Option<f32>,
    snr: Option<f32>,
) -> Result<MultiSensorPacket, CodecError> {
    if buf.len() < MULTI_HEADER_SIZE + 2 {
        return Err(CodecError::TooShort);
    }
    let sync = u16::from_le_bytes([buf[0], buf[1]]);
    if sync != SYNC_MULTI_SENSOR {
        return Err(CodecError::BadSync);
    }
    let network_id = u16::from_le_bytes([buf[2], buf[3]]);
    // buf[4] is packet_type; the codec doesn't interpret it.
    let sensor_id = buf[5];
    let mut value_count = buf[6];
    let battery_percent = buf[7];
    let power_state = buf[8];
    let last_command_seq = buf[9];
    let ack_status = buf[10];
    // buf[11] is the reserved pad byte.
    let location_bytes = &buf[12..44];
    let zone_bytes = &buf[44..60];

    if value_count as usize > MAX_VALUES {
        tracing::warn!(value_count, "value_count exceeds maximum 16; clamping");
        value_count = MAX_VALUES as u8;
    }
    let value_count = value_count as usize;

    let payload_end = MULTI_HEADER_SIZE + value_count * VALUE_SIZE;
    let expected_len = payload_end + 2;
    if buf.len() < expected_len {
        return Err(CodecError::TooShort);
    }

    let crc_received = u16::from_le_bytes([buf[payload_end], buf[payload_end + 1]]);
    let crc_computed = crc16(&buf[..payload_end]);
    if crc_received != crc_computed {
        return Err(CodecError::BadCrc);
    }

    let mut values = Vec::with_capacity(value_count);
    let mut offset = MULTI_HEADER_SIZE;
    for _ in 0..value_count {
        let type_code = buf[offset];
        let value = f32::from_le_bytes([
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
            buf[offset + 4],
        ]);
        values.push(SensorValue { type_code, value });
        offset += VALUE_SIZE;
    }

    Ok(MultiSensorPacket {
        network_id,
        sensor_id,
        battery_percent,
        power_state,
        last_command_seq,
        ack_status,
        location: trim_nul(location_bytes),
        zone: trim_nul(zone_bytes),
        values,
        rssi,
        snr,
    })
}

/// Right-trim at the first NUL and decode as UTF-8, replacing malformed
/// sequences rather than failing.
fn trim_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Parse a `COMMAND` or `ACK` frame (identical layout; [`detect_kind`]
/// distinguishes them by the command-type byte).
pub fn parse_command(buf: &[u8]) -> Result<CommandPacket, CodecError> {
    if buf.len() < CMD_SIZE {
        return Err(CodecError::TooShort);
    }
    let sync = u16::from_le_bytes([buf[0], buf[1]]);
    if sync != SYNC_COMMAND {
        return Err(CodecError::BadSync);
    }
    let command_type = buf[2];
    let target_sensor_id = buf[3];
    let sequence_number = buf[4];
    let data_length = buf[5] as usize;
    // buf[6] is the reserved pad byte; data area is buf[7..7+192].
    if data_length > CMD_DATA_SIZE {
        return Err(CodecError::BadLength);
    }

    let payload_end = CMD_SIZE - 2;
    let crc_received = u16::from_le_bytes([buf[payload_end], buf[payload_end + 1]]);
    let crc_computed = crc16(&buf[..payload_end]);
    if crc_received != crc_computed {
        return Err(CodecError::BadCrc);
    }

    let data = buf[7..7 + data_length].to_vec();
    Ok(CommandPacket {
        command_type,
        target_sensor_id,
        sequence_number,
        data,
    })
}

/// Parse an ACK/NACK frame. Identical to [`parse_command`]; the caller is
/// expected to have already confirmed `buf[2] ∈ {0xA0, 0xA1}` via
/// [`detect_kind`].
pub fn parse_ack(buf: &[u8]) -> Result<CommandPacket, CodecError> {
    parse_command(buf)
}

/// Parse a `LEGACY` frame. No CRC covers this format.
pub fn parse_legacy(buf: &[u8]) -> Result<LegacyPacket, CodecError> {
    if buf.len() < LEGACY_SIZE {
        return Err(CodecError::TooShort);
    }
    let sync = u16::from_le_bytes([buf[0], buf[1]]);
    if sync != SYNC_LEGACY {
        return Err(CodecError::BadSync);
    }
    let sensor_id = buf[2];
    let network_id = u16::from_le_bytes([buf[3], buf[4]]);
    let temperature = f32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]);
    let humidity = f32::from_le_bytes([buf[9], buf[10], buf[11], buf[12]]);
    let battery_percent = buf[13];
    let rssi = buf[14] as i8;
    let snr = f32::from_le_bytes([buf[15], buf[16], buf[17], buf[18]]);

    Ok(LegacyPacket {
        sensor_id,
        network_id,
        temperature,
        humidity,
        battery_percent,
        rssi,
        snr,
    })
}

/// Serialize a command ready for transmission. `data` must be at most 192
/// bytes; it is zero-padded to exactly 192. Output is always exactly 201
/// bytes: the 199-byte prefix plus a little-endian CRC16 over that prefix.
pub fn build_command(command_type: u8, target: u8, seq: u8, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    if data.len() > CMD_DATA_SIZE {
        return Err(CodecError::DataTooLong(data.len()));
    }
    let mut payload = Vec::with_capacity(CMD_SIZE - 2);
    payload.extend_from_slice(&SYNC_COMMAND.to_le_bytes());
    payload.push(command_type);
    payload.push(target);
    payload.push(seq);
    payload.push(data.len() as u8);
    payload.push(0); // reserved pad byte
    payload.extend_from_slice(data);
    payload.resize(payload.len() + (CMD_DATA_SIZE - data.len()), 0);

    let crc = crc16(&payload);
    payload.extend_from_slice(&crc.to_le_bytes());
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_known_answers() {
        assert_eq!(crc16(b""), 0xFFFF);
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn detect_kind_too_short_or_unknown() {
        assert_eq!(detect_kind(&[]), None);
        assert_eq!(detect_kind(&[0x01]), None);
        assert_eq!(detect_kind(&[0xAA, 0xBB]), None);
    }

    #[test]
    fn detect_kind_classifies_each_sync() {
        let legacy = build_legacy_for_test();
        assert_eq!(detect_kind(&legacy), Some(FrameKind::Legacy));

        let multi = build_multi_for_test("Garage", "Zone1", &[(0, 22.5), (1, 55.0)]);
        assert_eq!(detect_kind(&multi), Some(FrameKind::Multi));

        let cmd = build_command(command_type::PING, 3, 1, &[]).unwrap();
        assert_eq!(detect_kind(&cmd), Some(FrameKind::Command));

        let ack = build_command(command_type::ACK, 3, 1, &[]).unwrap();
        assert_eq!(detect_kind(&ack), Some(FrameKind::Ack));
    }

    #[test]
    fn build_then_parse_command_round_trips() {
        let data = vec![1, 2, 3, 4, 5];
        let raw = build_command(command_type::SET_INTERVAL, 7, 42, &data).unwrap();
        assert_eq!(raw.len(), 201);
        let parsed = parse_command(&raw).unwrap();
        assert_eq!(parsed.command_type, command_type::SET_INTERVAL);
        assert_eq!(parsed.target_sensor_id, 7);
        assert_eq!(parsed.sequence_number, 42);
        assert_eq!(parsed.data, data);
    }

    #[test]
    fn build_then_parse_ack_round_trips() {
        let raw = build_command(command_type::ACK, 9, 200, &[]).unwrap();
        let parsed = parse_ack(&raw).unwrap();
        assert_eq!(parsed.command_type, command_type::ACK);
        assert_eq!(parsed.sequence_number, 200);
    }

    #[test]
    fn build_command_rejects_oversized_data() {
        let data = vec![0u8; 193];
        let err = build_command(command_type::PING, 1, 1, &data).unwrap_err();
        assert_eq!(err, CodecError::DataTooLong(193));
    }

    fn build_multi_for_test(location: &str, zone: &str, values: &[(u8, f32)]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MULTI_HEADER_SIZE + values.len() * VALUE_SIZE + 2);
        buf.extend_from_slice(&SYNC_MULTI_SENSOR.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes()); // network_id
        buf.push(1); // packet_type (unused by the parser itself)
        buf.push(3); // sensor_id
        buf.push(values.len() as u8); // value_count
        buf.push(75); // battery_percent
        buf.push(0); // power_state
        buf.push(0); // last_command_seq
        buf.push(0); // ack_status
        buf.push(0); // pad
        let mut loc = [0u8; 32];
        loc[..location.len()].copy_from_slice(location.as_bytes());
        buf.extend_from_slice(&loc);
        let mut zn = [0u8; 16];
        zn[..zone.len()].copy_from_slice(zone.as_bytes());
        buf.extend_from_slice(&zn);
        for &(t, v) in values {
            buf.push(t);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        let crc = crc16(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    fn build_legacy_for_test() -> Vec<u8> {
        let mut buf = Vec::with_capacity(LEGACY_SIZE);
        buf.extend_from_slice(&SYNC_LEGACY.to_le_bytes());
        buf.push(5); // sensor_id
        buf.extend_from_slice(&1u16.to_le_bytes()); // network_id
        buf.extend_from_slice(&21.0f32.to_le_bytes()); // temperature
        buf.extend_from_slice(&44.0f32.to_le_bytes()); // humidity
        buf.push(80); // battery
        buf.push((-40i8) as u8); // rssi
        buf.extend_from_slice(&7.5f32.to_le_bytes()); // snr
        buf
    }

    #[test]
    fn round_trip_multi_sensor_packet() {
        let raw = build_multi_for_test("Garage", "Zone1", &[(0, 22.5), (1, 55.0)]);
        assert_eq!(raw.len(), 72); // 60 + 5*2 + 2, see DESIGN.md
        let pkt = parse_multi(&raw, Some(-60.0), Some(9.5)).unwrap();
        assert_eq!(pkt.sensor_id, 3);
        assert_eq!(pkt.network_id, 1);
        assert_eq!(pkt.battery_percent, 75);
        assert_eq!(pkt.location, "Garage");
        assert_eq!(pkt.zone, "Zone1");
        assert_eq!(pkt.values.len(), 2);
        assert_eq!(pkt.values[0].type_code, 0);
        assert_eq!(pkt.values[0].value, 22.5);
        assert_eq!(pkt.values[1].value, 55.0);
        assert_eq!(pkt.rssi, Some(-60.0));
        assert_eq!(pkt.snr, Some(9.5));
    }

    #[test]
    fn multi_sensor_crc_rejection() {
        let mut raw = build_multi_for_test("Garage", "Zone1", &[(0, 22.5)]);
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert_eq!(parse_multi(&raw, None, None), Err(CodecError::BadCrc));
    }

    #[test]
    fn multi_sensor_clamps_value_count() {
        let mut raw = build_multi_for_test("A", "B", &[]);
        raw[6] = 200; // value_count, way over the 16 cap
        // Clamped to 16, which is still too short for a zero-value frame,
        // so this exercises the TooShort path once clamping has already
        // happened — the clamp itself is logged.
        assert_eq!(parse_multi(&raw, None, None), Err(CodecError::TooShort));
    }

    #[test]
    fn parse_legacy_round_trips() {
        let raw = build_legacy_for_test();
        let pkt = parse_legacy(&raw).unwrap();
        assert_eq!(pkt.sensor_id, 5);
        assert_eq!(pkt.temperature, 21.0);
        assert_eq!(pkt.humidity, 44.0);
        assert_eq!(pkt.battery_percent, 80);
        assert_eq!(pkt.rssi, -40);
        assert_eq!(pkt.snr, 7.5);
    }

    #[test]
    fn value_type_names_and_units() {
        assert_eq!(ValueType::Temperature.name(), "temperature");
        assert_eq!(ValueType::Temperature.unit(), "\u{b0}C");
        assert_eq!(ValueType::from_code(99), None);
    }
}
