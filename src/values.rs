//! Conversion between raw register payloads and typed values.
//!
//! Most registers carry a hexadecimal number whose interpretation depends on
//! the register kind. Enumerated registers are decoded straight to their
//! display string, so the selected language is part of the decode input.

use crate::registers::{self, Kind, Language, RegisterIndex};
use crate::timeprogram::{self, TimeProgram};

/// A decoded register value.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum RegisterValue {
    Bool(bool),
    Number(f64),
    Text(String),
    TimeProgram(TimeProgram),
}

impl std::fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterValue::Bool(true) => f.write_str("on"),
            RegisterValue::Bool(false) => f.write_str("off"),
            RegisterValue::Number(number) => write!(f, "{number}"),
            RegisterValue::Text(text) => f.write_str(text),
            RegisterValue::TimeProgram(program) => f.write_str(&timeprogram::summarize(program)),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{raw:?} is not a hexadecimal number")]
    BadHex { raw: String },
    #[error("{key:?} does not name a known enumeration value")]
    UnknownEnum { key: String },
    #[error("the register is computed locally and never read off the wire")]
    NotWire,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum EncodeError {
    #[error("register {register} does not accept this value type")]
    InvalidValue { register: &'static str },
    #[error("{value} is outside the {minimum}..={maximum} range of register {register}")]
    OutOfRange { register: &'static str, value: f64, minimum: f64, maximum: f64 },
    #[error("the register is computed locally and cannot be written")]
    NotWritable,
}

/// Decodes a raw payload as reported by the device.
///
/// A schedule blob that fails to parse decodes to an empty program rather
/// than an error, so one corrupt schedule does not hide the rest of a batch.
pub fn decode(
    register: RegisterIndex,
    raw: &str,
    language: Language,
) -> Result<RegisterValue, DecodeError> {
    match register.kind() {
        Kind::Switch | Kind::Action => Ok(RegisterValue::Bool(parse_hex(raw)? > 0)),
        Kind::Temperature | Kind::TemperatureInput => {
            // Temperatures are signed 16-bit tenths of a degree.
            let raw = parse_hex(raw)? as u16 as i16;
            Ok(RegisterValue::Number(f64::from(raw) / 10.0))
        }
        Kind::Power => Ok(RegisterValue::Number(f64::from(parse_hex(raw)?) * 100.0)),
        Kind::Energy | Kind::Counter => Ok(RegisterValue::Number(f64::from(parse_hex(raw)?))),
        Kind::Mode => translated(format!("opmode{}", parse_hex(raw)?), language),
        Kind::Select => {
            let prefix = registers::select_prefix(register.name());
            translated(format!("{prefix}{}", parse_hex(raw)?), language)
        }
        Kind::TimeProgram => Ok(RegisterValue::TimeProgram(match timeprogram::decode(raw) {
            Ok(program) => program,
            Err(error) => {
                tracing::warn!(
                    register = register.name(),
                    error = &error as &dyn std::error::Error,
                    "could not decode the schedule blob, treating it as empty",
                );
                TimeProgram::default()
            }
        })),
        Kind::GeneratedStatus => Err(DecodeError::NotWire),
    }
}

/// Renders a typed value as the payload string a write command carries.
///
/// Selects are transmitted as two decimal digits (with the room climate mode
/// shifted up by one), everything else as hexadecimal.
pub fn encode(register: RegisterIndex, value: &RegisterValue) -> Result<String, EncodeError> {
    match (register.kind(), value) {
        (Kind::TimeProgram, RegisterValue::TimeProgram(program)) => {
            Ok(timeprogram::encode(program))
        }
        (Kind::TemperatureInput, RegisterValue::Number(number)) => {
            check_range(register, *number)?;
            let tenths = (number * 10.0).round() as i64;
            Ok(format!("{:04X}", tenths as u16))
        }
        (Kind::Select, RegisterValue::Number(number)) => {
            let shift = i64::from(register.name() == "main_mode");
            Ok(format!("{:02}", *number as i64 + shift))
        }
        (Kind::Switch | Kind::Action, RegisterValue::Bool(state)) => {
            Ok(format!("{:02X}", u8::from(*state)))
        }
        (Kind::GeneratedStatus, _) => Err(EncodeError::NotWritable),
        _ => Err(EncodeError::InvalidValue { register: register.name() }),
    }
}

fn parse_hex(raw: &str) -> Result<u32, DecodeError> {
    u32::from_str_radix(raw, 16).map_err(|_| DecodeError::BadHex { raw: raw.to_string() })
}

fn translated(key: String, language: Language) -> Result<RegisterValue, DecodeError> {
    match registers::translate(&key, language) {
        Some(label) => Ok(RegisterValue::Text(label.to_string())),
        None => Err(DecodeError::UnknownEnum { key }),
    }
}

fn check_range(register: RegisterIndex, value: f64) -> Result<(), EncodeError> {
    let minimum = register.minimum().unwrap_or(f64::NEG_INFINITY);
    let maximum = register.maximum().unwrap_or(f64::INFINITY);
    // A NaN comparison is always false, so the guard must be phrased as
    // membership in the range rather than as its complement.
    if !(value >= minimum && value <= maximum) {
        return Err(EncodeError::OutOfRange {
            register: register.name(),
            value,
            minimum,
            maximum,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(name: &str) -> RegisterIndex {
        RegisterIndex::from_name(name).unwrap()
    }

    #[test]
    fn temperatures_are_signed_tenths() {
        let out_temp = register("out_temp");
        let decode = |raw| decode(out_temp, raw, Language::En).unwrap();
        assert_eq!(decode("0064"), RegisterValue::Number(10.0));
        assert_eq!(decode("00C8"), RegisterValue::Number(20.0));
        assert_eq!(decode("FFF6"), RegisterValue::Number(-1.0));
        assert_eq!(decode("fff6"), RegisterValue::Number(-1.0));
    }

    #[test]
    fn switches_decode_any_nonzero_as_on() {
        let party = register("party_mode");
        assert_eq!(decode(party, "00", Language::En), Ok(RegisterValue::Bool(false)));
        assert_eq!(decode(party, "01", Language::En), Ok(RegisterValue::Bool(true)));
        assert_eq!(decode(party, "02", Language::En), Ok(RegisterValue::Bool(true)));
    }

    #[test]
    fn power_is_reported_in_hundredths() {
        let consumption = register("el_consumption");
        assert_eq!(
            decode(consumption, "0002", Language::En),
            Ok(RegisterValue::Number(200.0))
        );
    }

    #[test]
    fn modes_decode_to_translated_labels() {
        let opmode = register("opmode");
        assert_eq!(
            decode(opmode, "06", Language::En),
            Ok(RegisterValue::Text("Heating".into()))
        );
        assert_eq!(
            decode(opmode, "06", Language::De),
            Ok(RegisterValue::Text("Heizen".into()))
        );
        assert_eq!(
            decode(opmode, "FF", Language::En),
            Err(DecodeError::UnknownEnum { key: "opmode255".into() })
        );
    }

    #[test]
    fn selects_decode_through_their_own_prefix() {
        assert_eq!(
            decode(register("main_mode"), "02", Language::En),
            Ok(RegisterValue::Text("Heating".into()))
        );
        assert_eq!(
            decode(register("dhw_opmode"), "01", Language::En),
            Ok(RegisterValue::Text("Automatic eco".into()))
        );
    }

    #[test]
    fn bad_hex_is_rejected() {
        assert_eq!(
            decode(register("out_temp"), "zz", Language::En),
            Err(DecodeError::BadHex { raw: "zz".into() })
        );
    }

    #[test]
    fn corrupt_schedule_blobs_decode_to_an_empty_program() {
        assert_eq!(
            decode(register("heating_timeprogram"), "nonsense", Language::En),
            Ok(RegisterValue::TimeProgram(TimeProgram::default()))
        );
    }

    #[test]
    fn temperature_inputs_encode_as_hex_tenths() {
        let target = register("water_temp_req");
        assert_eq!(encode(target, &RegisterValue::Number(52.0)), Ok("0208".into()));
        assert_eq!(encode(target, &RegisterValue::Number(21.56)), Ok("00D8".into()));
        assert!(matches!(
            encode(target, &RegisterValue::Number(10.0)),
            Err(EncodeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn non_finite_temperature_inputs_are_out_of_range() {
        let target = register("water_temp_req");
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                encode(target, &RegisterValue::Number(value)),
                Err(EncodeError::OutOfRange { .. })
            ));
        }
    }

    #[test]
    fn selects_encode_as_decimal_with_the_main_mode_shift() {
        assert_eq!(
            encode(register("main_mode"), &RegisterValue::Number(2.0)),
            Ok("03".into())
        );
        assert_eq!(
            encode(register("dhw_opmode"), &RegisterValue::Number(2.0)),
            Ok("02".into())
        );
    }

    #[test]
    fn switches_encode_as_two_hex_digits() {
        assert_eq!(encode(register("party_mode"), &RegisterValue::Bool(true)), Ok("01".into()));
        assert_eq!(encode(register("dhw_heating"), &RegisterValue::Bool(false)), Ok("00".into()));
    }

    #[test]
    fn mismatched_value_types_are_rejected() {
        assert!(matches!(
            encode(register("water_temp_req"), &RegisterValue::Bool(true)),
            Err(EncodeError::InvalidValue { .. })
        ));
        assert!(matches!(
            encode(register("communication_status"), &RegisterValue::Bool(true)),
            Err(EncodeError::NotWritable)
        ));
    }
}
