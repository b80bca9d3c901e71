use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

/// Protocol variant spoken by the inverter. Pi18 is the one we actually
/// poll with; Pi30 differs in the query names and some setter encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum Protocol {
    #[serde(rename = "PI18")]
    Pi18,
    #[serde(rename = "PI30")]
    Pi30,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Pi18 => write!(f, "PI18"),
            Protocol::Pi30 => write!(f, "PI30"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CommandKind {
    IdentifyQuery,
    FirmwareQuery,
    EnergyTotalsQuery,
    GeneralStatusQuery,
    ModeQuery,
    RatedInfoQuery,
    SetOutputSource(u8),
    SetChargerPriority(u8),
    SetMaxChargingVoltage(f64),
    SetMaxChargingCurrent(f64),
    SetMaxUtilityChargingCurrent(f64),
}

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
    #[error("{command}: missing expected field '{field}'")]
    MissingField {
        command: &'static str,
        field: &'static str,
    },
    #[error("{command}: field '{field}' is not numeric: '{value}'")]
    BadNumber {
        command: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("{command}: unrecognised working mode code '{code}'")]
    UnknownMode {
        command: &'static str,
        code: String,
    },
    #[error("{command}: empty response")]
    EmptyResponse { command: &'static str },
}

/// Charging current granularity: the device only accepts multiples of 10A.
/// Ties round to even.
pub fn round_current(current: f64) -> i64 {
    ((current / 10.0).round_ties_even() * 10.0) as i64
}

/// Build the command text for `kind` under `protocol`.
///
/// Returns None when the command is a documented no-op for the variant
/// (nothing is sent, the operation still reports success).
pub fn encode(kind: &CommandKind, protocol: Protocol) -> Option<String> {
    use CommandKind::*;

    let text = match (kind, protocol) {
        (IdentifyQuery, Protocol::Pi18) => "ID".to_string(),
        (IdentifyQuery, Protocol::Pi30) => "QID".to_string(),
        (FirmwareQuery, Protocol::Pi18) => "VFW".to_string(),
        (FirmwareQuery, Protocol::Pi30) => "QVFW".to_string(),
        (EnergyTotalsQuery, Protocol::Pi18) => "ET".to_string(),
        (EnergyTotalsQuery, Protocol::Pi30) => "QET".to_string(),
        (GeneralStatusQuery, Protocol::Pi18) => "GS".to_string(),
        (GeneralStatusQuery, Protocol::Pi30) => "QPIGS".to_string(),
        (ModeQuery, Protocol::Pi18) => "MOD".to_string(),
        (ModeQuery, Protocol::Pi30) => "QMOD".to_string(),
        (RatedInfoQuery, Protocol::Pi18) => "PIRI".to_string(),
        (RatedInfoQuery, Protocol::Pi30) => "QPIRI".to_string(),

        (SetOutputSource(source), _) => format!("POP{:02}", source),
        (SetChargerPriority(priority), _) => format!("PCP{:02}", priority),

        // Bulk and float are set to the same value, in 0.1V units.
        (SetMaxChargingVoltage(voltage), Protocol::Pi18) => {
            let v = (voltage * 10.0) as i64;
            format!("MCHGV{},{}", v, v)
        }
        (SetMaxChargingVoltage(_), _) => return None,

        // Leading 0 is the parallel unit index.
        (SetMaxChargingCurrent(current), Protocol::Pi18) => {
            format!("MCHGC0{:04}", round_current(*current))
        }
        (SetMaxChargingCurrent(current), _) => {
            format!("MNCHGC0{:04}", round_current(*current))
        }

        (SetMaxUtilityChargingCurrent(current), Protocol::Pi18) => {
            format!("MUCHGC0{:04}", round_current(*current).max(2))
        }
        // Non-PI18 firmware takes the raw current, unrounded. Protocol
        // quirk, kept as-is.
        (SetMaxUtilityChargingCurrent(current), _) => {
            format!("MUCHGC{:03}", *current as i64)
        }
    };

    Some(text)
}

// Record {{{
#[derive(Clone, Debug, PartialEq)]
pub enum Field {
    Num(f64),
    Text(String),
}

/// Named telemetry fields decoded from one command response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: HashMap<String, Field>,
}

impl Record {
    pub fn insert_num(&mut self, name: &str, value: f64) {
        self.fields.insert(name.to_string(), Field::Num(value));
    }

    pub fn insert_text(&mut self, name: &str, value: &str) {
        self.fields
            .insert(name.to_string(), Field::Text(value.to_string()));
    }

    pub fn num(&self, name: &str) -> Option<f64> {
        match self.fields.get(name) {
            Some(Field::Num(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(Field::Text(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, field) in &self.fields {
            let value = match field {
                Field::Num(v) => serde_json::json!(v),
                Field::Text(v) => serde_json::json!(v),
            };
            map.insert(name.clone(), value);
        }
        serde_json::Value::Object(map)
    }
} // }}}

struct FieldSpec {
    name: &'static str,
    divisor: f64,
}

const fn field(name: &'static str, divisor: f64) -> FieldSpec {
    FieldSpec { name, divisor }
}

// PI18 GS response layout, positional.
const GENERAL_STATUS_FIELDS: &[FieldSpec] = &[
    field("grid_voltage", 10.0),
    field("grid_frequency", 10.0),
    field("ac_output_voltage", 10.0),
    field("ac_output_frequency", 10.0),
    field("ac_output_apparent_power", 1.0),
    field("ac_output_active_power", 1.0),
    field("output_load_percent", 1.0),
    field("battery_voltage", 10.0),
    field("battery_voltage_scc", 10.0),
    field("battery_voltage_scc2", 10.0),
    field("battery_discharge_current", 1.0),
    field("battery_charging_current", 1.0),
    field("battery_capacity", 1.0),
    field("inverter_heat_sink_temperature", 1.0),
    field("mppt1_charger_temperature", 1.0),
    field("mppt2_charger_temperature", 1.0),
    field("pv1_input_power", 1.0),
    field("pv2_input_power", 1.0),
    field("pv1_input_voltage", 10.0),
    field("pv2_input_voltage", 10.0),
    field("setting_value_configuration_state", 1.0),
    field("mppt1_charger_status", 1.0),
    field("mppt2_charger_status", 1.0),
    field("load_connection", 1.0),
    field("battery_power_direction", 1.0),
    field("dc_ac_power_direction", 1.0),
    field("line_power_direction", 1.0),
];

const ENERGY_TOTAL_FIELDS: &[FieldSpec] = &[field("total_generated_energy", 1.0)];

// PI18 PIRI response layout, positional.
const RATED_INFO_FIELDS: &[FieldSpec] = &[
    field("ac_input_rated_voltage", 10.0),
    field("ac_input_rated_current", 10.0),
    field("ac_output_rated_voltage", 10.0),
    field("ac_output_rated_frequency", 10.0),
    field("ac_output_rated_current", 10.0),
    field("ac_output_rated_apparent_power", 1.0),
    field("ac_output_rated_active_power", 1.0),
    field("battery_rated_voltage", 10.0),
    field("battery_recharge_voltage", 10.0),
    field("battery_redischarge_voltage", 10.0),
    field("battery_under_voltage", 10.0),
    field("battery_bulk_voltage", 10.0),
    field("battery_float_voltage", 10.0),
    field("battery_type", 1.0),
    field("max_ac_charging_current", 1.0),
    field("max_charging_current", 1.0),
    field("output_source_priority", 1.0),
    field("charger_source_priority", 1.0),
];

/// Parse one raw command response into named fields.
///
/// Accepts either the bare comma-separated payload or a full `^Dnnn...`
/// response frame; extra trailing fields are tolerated, missing expected
/// fields are an error. No defaults are substituted here - that is the
/// caller's decision at merge time.
pub fn decode(kind: &CommandKind, raw: &str) -> Result<Record, DecodeError> {
    use CommandKind::*;

    match kind {
        EnergyTotalsQuery => decode_fields("ET", raw, ENERGY_TOTAL_FIELDS),
        GeneralStatusQuery => decode_fields("GS", raw, GENERAL_STATUS_FIELDS),
        RatedInfoQuery => decode_fields("PIRI", raw, RATED_INFO_FIELDS),
        ModeQuery => decode_mode(raw),
        IdentifyQuery => decode_single_text("ID", raw, "serial_number"),
        FirmwareQuery => decode_single_text("VFW", raw, "main_cpu_version"),
        _ => {
            // Setter replies are a bare ack, there is nothing to extract.
            Ok(Record::default())
        }
    }
}

/// True when a setter reply is a positive acknowledgement.
pub fn is_ack(raw: &str) -> bool {
    let payload = strip_frame(raw);
    payload == "1" || payload.eq_ignore_ascii_case("ack")
}

// Strips the `^Dnnn` / `^1` / `^0` response framing, leaving the
// comma-separated payload.
fn strip_frame(raw: &str) -> &str {
    let raw = raw.trim_matches(|c: char| c == '\r' || c == '\n' || c == '\0');
    if let Some(rest) = raw.strip_prefix("^D") {
        // three-digit payload length follows, then the payload itself
        if rest.len() >= 3 && rest[..3].chars().all(|c| c.is_ascii_digit()) {
            return &rest[3..];
        }
        return rest;
    }
    raw.strip_prefix('^').unwrap_or(raw)
}

fn decode_fields(
    command: &'static str,
    raw: &str,
    specs: &[FieldSpec],
) -> Result<Record, DecodeError> {
    let payload = strip_frame(raw);
    if payload.is_empty() {
        return Err(DecodeError::EmptyResponse { command });
    }

    let values: Vec<&str> = payload.split(',').map(str::trim).collect();

    let mut record = Record::default();
    for (i, spec) in specs.iter().enumerate() {
        let value = values
            .get(i)
            .filter(|v| !v.is_empty())
            .ok_or(DecodeError::MissingField {
                command,
                field: spec.name,
            })?;

        let number: f64 = value.parse().map_err(|_| DecodeError::BadNumber {
            command,
            field: spec.name,
            value: value.to_string(),
        })?;

        record.insert_num(spec.name, number / spec.divisor);
    }

    Ok(record)
}

fn decode_mode(raw: &str) -> Result<Record, DecodeError> {
    const COMMAND: &str = "MOD";

    let payload = strip_frame(raw);
    if payload.is_empty() {
        return Err(DecodeError::EmptyResponse { command: COMMAND });
    }

    let code = payload.split(',').next().unwrap_or(payload).trim();
    let label = match code {
        "00" | "0" => "Power on mode",
        "01" | "1" => "Standby mode",
        "02" | "2" => "Bypass mode",
        "03" | "3" => "Battery mode",
        "04" | "4" => "Fault mode",
        "05" | "5" => "Hybrid mode",
        _ => {
            return Err(DecodeError::UnknownMode {
                command: COMMAND,
                code: code.to_string(),
            })
        }
    };

    let mut record = Record::default();
    record.insert_text("working_mode", label);
    Ok(record)
}

fn decode_single_text(
    command: &'static str,
    raw: &str,
    name: &str,
) -> Result<Record, DecodeError> {
    let payload = strip_frame(raw);
    if payload.is_empty() {
        return Err(DecodeError::EmptyResponse { command });
    }

    let mut record = Record::default();
    record.insert_text(name, payload);
    Ok(record)
}
