use crate::prelude::*;

use nom_derive::{Nom, Parse};
use serde::Serialize;
use std::fmt;

use super::labels::decode_day_of_week;
use super::SensorCodec;

const ALL_DAYS: i8 = 0x7f;

fn check_hour(id: &str, field: &'static str, value: i8) -> Result<()> {
    if (0..=23).contains(&value) || value == 48 {
        Ok(())
    } else {
        Err(Error::out_of_range(id, field, value))
    }
}

fn check_minute(id: &str, field: &'static str, value: i8) -> Result<()> {
    if (0..=59).contains(&value) {
        Ok(())
    } else {
        Err(Error::out_of_range(id, field, value))
    }
}

fn check_range<T: PartialOrd + fmt::Display>(
    id: &str,
    field: &'static str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(Error::out_of_range(id, field, value))
    }
}

fn check_times(id: &str, start_h: i8, start_m: i8, end_h: i8, end_m: i8) -> Result<()> {
    check_hour(id, "start_h", start_h)?;
    check_minute(id, "start_m", start_m)?;
    check_hour(id, "end_h", end_h)?;
    check_minute(id, "end_m", end_m)
}

// all day, every day
fn is_full_time(start_h: i8, start_m: i8, end_h: i8, end_m: i8, day_bits: i8) -> bool {
    start_h == 0 && start_m == 0 && end_h == 23 && end_m == 59 && day_bits == ALL_DAYS
}

fn parse_error(id: &str, bytes: &[u8]) -> Error {
    Error::invalid_value(id, bytes)
}

// {{{ EcoModeV1
#[derive(Nom)]
#[nom(BigEndian)]
struct EcoModeV1Raw {
    start_h: i8,
    start_m: i8,
    end_h: i8,
    end_m: i8,
    power: i16,
    on_off: i8,
    day_bits: i8,
}

/// Battery power group, 8 byte layout. Negative power charges, positive
/// discharges.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EcoModeV1 {
    pub start_h: i8,
    pub start_m: i8,
    pub end_h: i8,
    pub end_m: i8,
    pub power: i16,
    pub on_off: i8,
    pub day_bits: i8,
    pub days: String,
}

impl EcoModeV1 {
    pub const SIZE: usize = 8;

    pub fn decode(id: &str, bytes: &[u8]) -> Result<Self> {
        let (_, raw) = EcoModeV1Raw::parse(bytes).map_err(|_| parse_error(id, bytes))?;
        check_times(id, raw.start_h, raw.start_m, raw.end_h, raw.end_m)?;
        check_range(id, "power", raw.power, -100, 100)?;
        if !matches!(raw.on_off, 0 | -1) {
            return Err(Error::out_of_range(id, "on_off", raw.on_off));
        }
        check_range(id, "day_bits", raw.day_bits, 0, i8::MAX)?;

        Ok(Self {
            start_h: raw.start_h,
            start_m: raw.start_m,
            end_h: raw.end_h,
            end_m: raw.end_m,
            power: raw.power,
            on_off: raw.on_off,
            day_bits: raw.day_bits,
            days: decode_day_of_week(raw.day_bits as i64),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![
            self.start_h as u8,
            self.start_m as u8,
            self.end_h as u8,
            self.end_m as u8,
        ];
        out.extend_from_slice(&self.power.to_be_bytes());
        out.push(self.on_off as u8);
        out.push(self.day_bits as u8);
        out
    }

    pub fn is_eco_charge_mode(&self) -> bool {
        is_full_time(self.start_h, self.start_m, self.end_h, self.end_m, self.day_bits)
            && self.on_off != 0
            && self.power < 0
    }

    pub fn is_eco_discharge_mode(&self) -> bool {
        is_full_time(self.start_h, self.start_m, self.end_h, self.end_m, self.day_bits)
            && self.on_off != 0
            && self.power > 0
    }

    /// Same group in the 12 byte layout, with SoC 100.
    pub fn as_eco_mode_v2(&self) -> EcoModeV2 {
        EcoModeV2 {
            start_h: self.start_h,
            start_m: self.start_m,
            end_h: self.end_h,
            end_m: self.end_m,
            on_off: self.on_off,
            day_bits: self.day_bits,
            power: self.power,
            soc: 100,
            days: decode_day_of_week(self.day_bits as i64),
        }
    }
}

impl fmt::Display for EcoModeV1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{} {} {}% {}",
            self.start_h,
            self.start_m,
            self.end_h,
            self.end_m,
            self.days,
            self.power,
            if self.on_off != 0 { "On" } else { "Off" }
        )
    }
}
// }}}

// {{{ EcoModeV2
#[derive(Nom)]
#[nom(BigEndian)]
struct EcoModeV2Raw {
    start_h: i8,
    start_m: i8,
    end_h: i8,
    end_m: i8,
    on_off: i8,
    day_bits: i8,
    power: i16,
    soc: i16,
    _reserved: u16,
}

/// Battery power group, 12 byte layout with a target SoC.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EcoModeV2 {
    pub start_h: i8,
    pub start_m: i8,
    pub end_h: i8,
    pub end_m: i8,
    pub on_off: i8,
    pub day_bits: i8,
    pub power: i16,
    pub soc: i16,
    pub days: String,
}

impl EcoModeV2 {
    pub const SIZE: usize = 12;

    pub fn decode(id: &str, bytes: &[u8]) -> Result<Self> {
        let (_, raw) = EcoModeV2Raw::parse(bytes).map_err(|_| parse_error(id, bytes))?;
        check_times(id, raw.start_h, raw.start_m, raw.end_h, raw.end_m)?;
        if !matches!(raw.on_off, 0 | -1 | 85) {
            return Err(Error::out_of_range(id, "on_off", raw.on_off));
        }
        check_range(id, "day_bits", raw.day_bits, 0, i8::MAX)?;
        check_range(id, "power", raw.power, -100, 100)?;
        check_range(id, "soc", raw.soc, 0, 100)?;

        Ok(Self {
            start_h: raw.start_h,
            start_m: raw.start_m,
            end_h: raw.end_h,
            end_m: raw.end_m,
            on_off: raw.on_off,
            day_bits: raw.day_bits,
            power: raw.power,
            soc: raw.soc,
            days: decode_day_of_week(raw.day_bits as i64),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![
            self.start_h as u8,
            self.start_m as u8,
            self.end_h as u8,
            self.end_m as u8,
            self.on_off as u8,
            self.day_bits as u8,
        ];
        out.extend_from_slice(&self.power.to_be_bytes());
        out.extend_from_slice(&self.soc.to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        out
    }

    pub fn is_eco_charge_mode(&self) -> bool {
        is_full_time(self.start_h, self.start_m, self.end_h, self.end_m, self.day_bits)
            && self.on_off == -1
            && self.power < 0
    }

    pub fn is_eco_discharge_mode(&self) -> bool {
        is_full_time(self.start_h, self.start_m, self.end_h, self.end_m, self.day_bits)
            && self.on_off == -1
            && self.power > 0
    }

    /// Same group in the 8 byte layout; anything but enabled becomes disabled
    /// and the SoC is dropped.
    pub fn as_eco_mode_v1(&self) -> EcoModeV1 {
        EcoModeV1 {
            start_h: self.start_h,
            start_m: self.start_m,
            end_h: self.end_h,
            end_m: self.end_m,
            power: self.power,
            on_off: if self.on_off == -1 { -1 } else { 0 },
            day_bits: self.day_bits,
            days: self.days.clone(),
        }
    }
}

impl fmt::Display for EcoModeV2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{} {} {}% (SoC {}%) {}",
            self.start_h,
            self.start_m,
            self.end_h,
            self.end_m,
            self.days,
            self.power,
            self.soc,
            match self.on_off {
                -1 => "On",
                0 => "Off",
                _ => "Unset",
            }
        )
    }
}
// }}}

// {{{ PeakShavingMode
#[derive(Nom)]
#[nom(BigEndian)]
struct PeakShavingRaw {
    start_h: i8,
    start_m: i8,
    end_h: i8,
    end_m: i8,
    on_off: i8,
    day_bits: i8,
    import_power: i16,
    soc: i16,
    _reserved: u16,
}

/// Grid import cap (kW, two decimals on the wire) for a time window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeakShavingMode {
    pub start_h: i8,
    pub start_m: i8,
    pub end_h: i8,
    pub end_m: i8,
    pub on_off: i8,
    pub day_bits: i8,
    pub import_power: f64,
    pub soc: i16,
    pub days: String,
}

impl PeakShavingMode {
    pub const SIZE: usize = 12;

    pub fn decode(id: &str, bytes: &[u8]) -> Result<Self> {
        let (_, raw) = PeakShavingRaw::parse(bytes).map_err(|_| parse_error(id, bytes))?;
        check_times(id, raw.start_h, raw.start_m, raw.end_h, raw.end_m)?;
        if !matches!(raw.on_off, -4 | 3 | 85) {
            return Err(Error::out_of_range(id, "on_off", raw.on_off));
        }
        check_range(id, "day_bits", raw.day_bits, 0, i8::MAX)?;
        let import_power = raw.import_power as f64 / 100.0;
        check_range(id, "import_power", import_power, 0.0, 500.0)?;
        check_range(id, "soc", raw.soc, 0, 100)?;

        Ok(Self {
            start_h: raw.start_h,
            start_m: raw.start_m,
            end_h: raw.end_h,
            end_m: raw.end_m,
            on_off: raw.on_off,
            day_bits: raw.day_bits,
            import_power,
            soc: raw.soc,
            days: decode_day_of_week(raw.day_bits as i64),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![
            self.start_h as u8,
            self.start_m as u8,
            self.end_h as u8,
            self.end_m as u8,
            self.on_off as u8,
            self.day_bits as u8,
        ];
        out.extend_from_slice(&((self.import_power * 100.0).round() as i16).to_be_bytes());
        out.extend_from_slice(&self.soc.to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        out
    }
}

impl fmt::Display for PeakShavingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{} {} {}kW (SoC {}%) {}",
            self.start_h,
            self.start_m,
            self.end_h,
            self.end_m,
            self.days,
            self.import_power,
            self.soc,
            match self.on_off {
                -4 => "On",
                3 => "Off",
                _ => "Unset",
            }
        )
    }
}
// }}}

// {{{ codecs
/// Fixed-pattern encodings used to emulate the full-time charge and
/// discharge operation modes.
pub trait EcoModeLayout: Send + Sync {
    fn encode_charge(&self, power: i16, soc: i16) -> Vec<u8>;
    fn encode_discharge(&self, power: i16) -> Vec<u8>;
    fn encode_off(&self) -> Vec<u8>;
}

fn charge_power(power: i16) -> [u8; 2] {
    (-power.saturating_abs()).to_be_bytes()
}

fn discharge_power(power: i16) -> [u8; 2] {
    power.saturating_abs().to_be_bytes()
}

fn composite_bytes<'a>(id: &str, value: &'a Value, size: usize) -> Option<&'a [u8]> {
    match value {
        Value::Bytes(bytes) if bytes.len() == size => Some(bytes),
        _ => {
            debug!("{}: {:?} is not a {} byte structure", id, value, size);
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct EcoModeV1Codec;

impl SensorCodec for EcoModeV1Codec {
    fn size(&self) -> usize {
        EcoModeV1::SIZE
    }

    fn read_value(&self, id: &str, data: &mut ProtocolResponse) -> Result<Value> {
        let bytes = data.read_array::<{ EcoModeV1::SIZE }>()?;
        EcoModeV1::decode(id, &bytes).map(Value::EcoModeV1)
    }

    fn encode_value(&self, id: &str, value: &Value, _register: Option<[u8; 2]>) -> Result<Vec<u8>> {
        let bytes = match value {
            Value::EcoModeV1(mode) => mode.to_bytes(),
            Value::EcoModeV2(mode) => mode.as_eco_mode_v1().to_bytes(),
            other => composite_bytes(id, other, EcoModeV1::SIZE)
                .ok_or_else(|| Error::invalid_value(id, other))?
                .to_vec(),
        };
        EcoModeV1::decode(id, &bytes)?;
        Ok(bytes)
    }

    fn is_composite(&self) -> bool {
        true
    }
}

impl EcoModeLayout for EcoModeV1Codec {
    fn encode_charge(&self, power: i16, _soc: i16) -> Vec<u8> {
        let mut out = vec![0x00, 0x00, 0x17, 0x3b];
        out.extend_from_slice(&charge_power(power));
        out.extend_from_slice(&[0xff, 0x7f]);
        out
    }

    fn encode_discharge(&self, power: i16) -> Vec<u8> {
        let mut out = vec![0x00, 0x00, 0x17, 0x3b];
        out.extend_from_slice(&discharge_power(power));
        out.extend_from_slice(&[0xff, 0x7f]);
        out
    }

    fn encode_off(&self) -> Vec<u8> {
        vec![0x30, 0x00, 0x30, 0x00, 0x00, 0x64, 0x00, 0x00]
    }
}

#[derive(Clone, Debug)]
pub struct EcoModeV2Codec;

impl SensorCodec for EcoModeV2Codec {
    fn size(&self) -> usize {
        EcoModeV2::SIZE
    }

    fn read_value(&self, id: &str, data: &mut ProtocolResponse) -> Result<Value> {
        let bytes = data.read_array::<{ EcoModeV2::SIZE }>()?;
        EcoModeV2::decode(id, &bytes).map(Value::EcoModeV2)
    }

    fn encode_value(&self, id: &str, value: &Value, _register: Option<[u8; 2]>) -> Result<Vec<u8>> {
        let bytes = match value {
            Value::EcoModeV2(mode) => mode.to_bytes(),
            Value::EcoModeV1(mode) => mode.as_eco_mode_v2().to_bytes(),
            other => composite_bytes(id, other, EcoModeV2::SIZE)
                .ok_or_else(|| Error::invalid_value(id, other))?
                .to_vec(),
        };
        EcoModeV2::decode(id, &bytes)?;
        Ok(bytes)
    }

    fn is_composite(&self) -> bool {
        true
    }
}

impl EcoModeLayout for EcoModeV2Codec {
    fn encode_charge(&self, power: i16, soc: i16) -> Vec<u8> {
        let mut out = vec![0x00, 0x00, 0x17, 0x3b, 0xff, 0x7f];
        out.extend_from_slice(&charge_power(power));
        out.extend_from_slice(&soc.to_be_bytes());
        out.extend_from_slice(&[0x00, 0x00]);
        out
    }

    fn encode_discharge(&self, power: i16) -> Vec<u8> {
        let mut out = vec![0x00, 0x00, 0x17, 0x3b, 0xff, 0x7f];
        out.extend_from_slice(&discharge_power(power));
        out.extend_from_slice(&[0x00, 0x64, 0x00, 0x00]);
        out
    }

    fn encode_off(&self) -> Vec<u8> {
        vec![0x30, 0x00, 0x30, 0x00, 0x00, 0x00, 0x00, 0x64, 0x00, 0x64, 0x00, 0x00]
    }
}

#[derive(Clone, Debug)]
pub struct PeakShavingCodec;

impl PeakShavingCodec {
    /// Empty and disabled group.
    pub fn encode_off(&self) -> Vec<u8> {
        vec![0x30, 0x00, 0x30, 0x00, 0x03, 0x00, 0x00, 0x64, 0x00, 0x64, 0x00, 0x00]
    }
}

impl SensorCodec for PeakShavingCodec {
    fn size(&self) -> usize {
        PeakShavingMode::SIZE
    }

    fn read_value(&self, id: &str, data: &mut ProtocolResponse) -> Result<Value> {
        let bytes = data.read_array::<{ PeakShavingMode::SIZE }>()?;
        PeakShavingMode::decode(id, &bytes).map(Value::PeakShaving)
    }

    fn encode_value(&self, id: &str, value: &Value, _register: Option<[u8; 2]>) -> Result<Vec<u8>> {
        let bytes = match value {
            Value::PeakShaving(mode) => mode.to_bytes(),
            other => composite_bytes(id, other, PeakShavingMode::SIZE)
                .ok_or_else(|| Error::invalid_value(id, other))?
                .to_vec(),
        };
        PeakShavingMode::decode(id, &bytes)?;
        Ok(bytes)
    }

    fn is_composite(&self) -> bool {
        true
    }
}
// }}}
