use crate::prelude::*;

use chrono::NaiveDateTime;
use enum_dispatch::*;
use indexmap::IndexMap;
use serde::{Serialize, Serializer};

pub mod derived;
pub mod eco_mode;
pub mod labels;
pub mod scalar;

pub use derived::{Calculated, Input};
pub use eco_mode::{
    EcoModeLayout, EcoModeV1, EcoModeV1Codec, EcoModeV2, EcoModeV2Codec, PeakShavingCodec,
    PeakShavingMode,
};
pub use labels::{decode_bitmap, decode_day_of_week, Bitmap, Enumeration, Labels};
pub use scalar::{Byte, Energy, Float, Half, Numeric, Timestamp};

// {{{ SensorKind
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SensorKind {
    /// photo-voltaic side, e.g. dc voltage of the panels
    Pv,
    /// grid connected ac output
    Ac,
    /// ups/eps/backup output
    Ups,
    /// battery pack
    Bat,
    /// power grid / smart meter
    Grid,
}
// }}}

// {{{ Value
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
    /// enumeration code with no label
    Unrecognized(i64),
    Timestamp(NaiveDateTime),
    EcoModeV1(EcoModeV1),
    EcoModeV2(EcoModeV2),
    PeakShaving(PeakShavingMode),
    Bytes(Vec<u8>),
    Absent,
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) | Self::Unrecognized(v) => Some(*v),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Float(f) => Some(*f),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn is_eco_charge_mode(&self) -> bool {
        match self {
            Self::EcoModeV1(m) => m.is_eco_charge_mode(),
            Self::EcoModeV2(m) => m.is_eco_charge_mode(),
            _ => false,
        }
    }

    pub fn is_eco_discharge_mode(&self) -> bool {
        match self {
            Self::EcoModeV1(m) => m.is_eco_discharge_mode(),
            Self::EcoModeV2(m) => m.is_eco_discharge_mode(),
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

/// Command line values: integers, decimals, `0x` prefixed hex bytes, or text.
impl std::str::FromStr for Value {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Ok(v) = s.parse::<i64>() {
            return Ok(Self::Integer(v));
        }
        if let Ok(v) = s.parse::<f64>() {
            return Ok(Self::Float(v));
        }
        if let Some(hex) = s.strip_prefix("0x") {
            if let Some(bytes) = decode_hex(hex) {
                return Ok(Self::Bytes(bytes));
            }
        }
        Ok(Self::Text(s.to_string()))
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "{}", v),
            Self::Unrecognized(v) => write!(f, "unrecognized({})", v),
            Self::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%dT%H:%M:%S")),
            Self::EcoModeV1(v) => write!(f, "{}", v),
            Self::EcoModeV2(v) => write!(f, "{}", v),
            Self::PeakShaving(v) => write!(f, "{}", v),
            Self::Bytes(v) => {
                for b in v {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Self::Absent => write!(f, "-"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Integer(v) | Self::Unrecognized(v) => serializer.serialize_i64(*v),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::Text(v) => serializer.serialize_str(v),
            Self::EcoModeV1(v) => v.serialize(serializer),
            Self::EcoModeV2(v) => v.serialize(serializer),
            Self::PeakShaving(v) => v.serialize(serializer),
            Self::Absent => serializer.serialize_none(),
            Self::Timestamp(_) | Self::Bytes(_) => serializer.collect_str(self),
        }
    }
}
// }}}

// {{{ SensorCodec
#[enum_dispatch]
pub trait SensorCodec {
    /// Bytes occupied in the register buffer.
    fn size(&self) -> usize;

    /// Decodes at the current cursor position.
    fn read_value(&self, id: &str, data: &mut ProtocolResponse) -> Result<Value>;

    /// Decodes at a register offset.
    fn read_at(&self, id: &str, offset: u16, data: &mut ProtocolResponse) -> Result<Value> {
        data.seek(offset)?;
        self.read_value(id, data)
    }

    /// Encodes a setting value to raw register bytes. `register` carries the
    /// current register content for codecs that occupy half of one.
    fn encode_value(&self, id: &str, _value: &Value, _register: Option<[u8; 2]>) -> Result<Vec<u8>> {
        Err(Error::NotWritable(id.to_string()))
    }

    /// True when encoding merges into the existing register content.
    fn needs_register(&self) -> bool {
        false
    }

    /// Multi-field structures whose decode failures are never swallowed.
    fn is_composite(&self) -> bool {
        false
    }
}

#[enum_dispatch(SensorCodec)]
#[derive(Clone, Debug)]
pub enum Codec {
    Numeric(Numeric),
    Energy(Energy),
    Float(Float),
    Timestamp(Timestamp),
    Byte(Byte),
    Enumeration(Enumeration),
    Bitmap(Bitmap),
    Calculated(Calculated),
    EcoModeV1Codec(EcoModeV1Codec),
    EcoModeV2Codec(EcoModeV2Codec),
    PeakShavingCodec(PeakShavingCodec),
}
// }}}

// {{{ Sensor
/// A named value bound to a register offset, decoded by its codec.
#[derive(Clone, Debug)]
pub struct Sensor {
    pub id: &'static str,
    pub offset: u16,
    pub name: &'static str,
    pub unit: &'static str,
    pub kind: Option<SensorKind>,
    codec: Codec,
}

impl Sensor {
    pub fn new(
        id: &'static str,
        offset: u16,
        name: &'static str,
        unit: &'static str,
        kind: Option<SensorKind>,
        codec: impl Into<Codec>,
    ) -> Self {
        Self {
            id,
            offset,
            name,
            unit,
            kind,
            codec: codec.into(),
        }
    }

    pub fn voltage(id: &'static str, offset: u16, name: &'static str, kind: impl Into<Option<SensorKind>>) -> Self {
        Self::new(id, offset, name, "V", kind.into(), Numeric::writable(2, 10))
    }

    pub fn current(id: &'static str, offset: u16, name: &'static str, kind: impl Into<Option<SensorKind>>) -> Self {
        Self::new(id, offset, name, "A", kind.into(), Numeric::writable(2, 10))
    }

    pub fn frequency(id: &'static str, offset: u16, name: &'static str, kind: impl Into<Option<SensorKind>>) -> Self {
        Self::new(id, offset, name, "Hz", kind.into(), Numeric::read_only(2, 100))
    }

    pub fn temp(id: &'static str, offset: u16, name: &'static str, kind: impl Into<Option<SensorKind>>) -> Self {
        Self::new(id, offset, name, "C", kind.into(), Numeric::read_only(2, 10))
    }

    pub fn power(id: &'static str, offset: u16, name: &'static str, kind: impl Into<Option<SensorKind>>) -> Self {
        Self::new(id, offset, name, "W", kind.into(), Numeric::read_only(2, 1))
    }

    pub fn power4(id: &'static str, offset: u16, name: &'static str, kind: impl Into<Option<SensorKind>>) -> Self {
        Self::new(id, offset, name, "W", kind.into(), Numeric::read_only(4, 1))
    }

    pub fn apparent(id: &'static str, offset: u16, name: &'static str, kind: impl Into<Option<SensorKind>>) -> Self {
        Self::new(id, offset, name, "VA", kind.into(), Numeric::read_only(2, 1))
    }

    pub fn apparent4(id: &'static str, offset: u16, name: &'static str, kind: impl Into<Option<SensorKind>>) -> Self {
        Self::new(id, offset, name, "VA", kind.into(), Numeric::read_only(4, 1))
    }

    pub fn reactive(id: &'static str, offset: u16, name: &'static str, kind: impl Into<Option<SensorKind>>) -> Self {
        Self::new(id, offset, name, "var", kind.into(), Numeric::read_only(2, 1))
    }

    pub fn reactive4(id: &'static str, offset: u16, name: &'static str, kind: impl Into<Option<SensorKind>>) -> Self {
        Self::new(id, offset, name, "var", kind.into(), Numeric::read_only(4, 1))
    }

    pub fn energy(id: &'static str, offset: u16, name: &'static str, kind: impl Into<Option<SensorKind>>) -> Self {
        Self::new(id, offset, name, "kWh", kind.into(), Energy { size: 2 })
    }

    pub fn energy4(id: &'static str, offset: u16, name: &'static str, kind: impl Into<Option<SensorKind>>) -> Self {
        Self::new(id, offset, name, "kWh", kind.into(), Energy { size: 4 })
    }

    pub fn byte(
        id: &'static str,
        offset: u16,
        name: &'static str,
        unit: &'static str,
        kind: impl Into<Option<SensorKind>>,
    ) -> Self {
        Self::new(id, offset, name, unit, kind.into(), Byte { half: Half::Whole })
    }

    pub fn byte_h(
        id: &'static str,
        offset: u16,
        name: &'static str,
        unit: &'static str,
        kind: impl Into<Option<SensorKind>>,
    ) -> Self {
        Self::new(id, offset, name, unit, kind.into(), Byte { half: Half::High })
    }

    pub fn byte_l(
        id: &'static str,
        offset: u16,
        name: &'static str,
        unit: &'static str,
        kind: impl Into<Option<SensorKind>>,
    ) -> Self {
        Self::new(id, offset, name, unit, kind.into(), Byte { half: Half::Low })
    }

    pub fn integer(
        id: &'static str,
        offset: u16,
        name: &'static str,
        unit: &'static str,
        kind: impl Into<Option<SensorKind>>,
    ) -> Self {
        Self::new(id, offset, name, unit, kind.into(), Numeric::writable(2, 1))
    }

    pub fn long(
        id: &'static str,
        offset: u16,
        name: &'static str,
        unit: &'static str,
        kind: impl Into<Option<SensorKind>>,
    ) -> Self {
        Self::new(id, offset, name, unit, kind.into(), Numeric::writable(4, 1))
    }

    pub fn decimal(
        id: &'static str,
        offset: u16,
        scale: u32,
        name: &'static str,
        unit: &'static str,
        kind: impl Into<Option<SensorKind>>,
    ) -> Self {
        Self::new(id, offset, name, unit, kind.into(), Numeric::writable(2, scale))
    }

    pub fn float(
        id: &'static str,
        offset: u16,
        scale: u32,
        name: &'static str,
        unit: &'static str,
        kind: impl Into<Option<SensorKind>>,
    ) -> Self {
        Self::new(id, offset, name, unit, kind.into(), Float { scale })
    }

    pub fn timestamp(id: &'static str, offset: u16, name: &'static str, kind: impl Into<Option<SensorKind>>) -> Self {
        Self::new(id, offset, name, "", kind.into(), Timestamp)
    }

    pub fn enum1(
        id: &'static str,
        offset: u16,
        labels: Labels,
        name: &'static str,
        kind: impl Into<Option<SensorKind>>,
    ) -> Self {
        Self::new(id, offset, name, "", kind.into(), Enumeration::new(Half::Whole, 1, labels))
    }

    pub fn enum_h(
        id: &'static str,
        offset: u16,
        labels: Labels,
        name: &'static str,
        kind: impl Into<Option<SensorKind>>,
    ) -> Self {
        Self::new(id, offset, name, "", kind.into(), Enumeration::new(Half::High, 1, labels))
    }

    pub fn enum_l(
        id: &'static str,
        offset: u16,
        labels: Labels,
        name: &'static str,
        kind: impl Into<Option<SensorKind>>,
    ) -> Self {
        Self::new(id, offset, name, "", kind.into(), Enumeration::new(Half::Low, 1, labels))
    }

    pub fn enum2(
        id: &'static str,
        offset: u16,
        labels: Labels,
        name: &'static str,
        kind: impl Into<Option<SensorKind>>,
    ) -> Self {
        Self::new(id, offset, name, "", kind.into(), Enumeration::new(Half::Whole, 2, labels))
    }

    pub fn bitmap4(
        id: &'static str,
        offset: u16,
        labels: Labels,
        name: &'static str,
        kind: impl Into<Option<SensorKind>>,
    ) -> Self {
        Self::new(id, offset, name, "", kind.into(), Bitmap::wide(labels))
    }

    pub fn bitmap22(
        id: &'static str,
        offset_high: u16,
        offset_low: u16,
        labels: Labels,
        name: &'static str,
        kind: impl Into<Option<SensorKind>>,
    ) -> Self {
        Self::new(id, offset_high, name, "", kind.into(), Bitmap::split(offset_low, labels))
    }

    pub fn calculated(
        id: &'static str,
        inputs: Vec<Input>,
        combine: fn(&[f64]) -> Value,
        name: &'static str,
        unit: &'static str,
        kind: impl Into<Option<SensorKind>>,
    ) -> Self {
        Self::new(id, 0, name, unit, kind.into(), Calculated::new(inputs, combine))
    }

    pub fn enum_calculated(
        id: &'static str,
        inputs: Vec<Input>,
        combine: fn(&[f64]) -> Value,
        labels: Labels,
        name: &'static str,
        kind: impl Into<Option<SensorKind>>,
    ) -> Self {
        Self::new(id, 0, name, "", kind.into(), Calculated::new(inputs, combine).with_labels(labels))
    }

    pub fn eco_mode_v1(id: &'static str, offset: u16, name: &'static str) -> Self {
        Self::new(id, offset, name, "", Some(SensorKind::Bat), EcoModeV1Codec)
    }

    pub fn eco_mode_v2(id: &'static str, offset: u16, name: &'static str) -> Self {
        Self::new(id, offset, name, "", Some(SensorKind::Bat), EcoModeV2Codec)
    }

    pub fn peak_shaving(id: &'static str, offset: u16, name: &'static str) -> Self {
        Self::new(id, offset, name, "", Some(SensorKind::Bat), PeakShavingCodec)
    }

    pub fn size(&self) -> usize {
        self.codec.size()
    }

    /// Register count covering the value, rounded up to whole registers.
    pub fn register_count(&self) -> u16 {
        let size = self.size();
        ((size + size % 2) / 2) as u16
    }

    /// Sensors whose meaning has not been identified yet.
    pub fn is_unknown(&self) -> bool {
        self.id.starts_with("xx")
    }

    pub fn is_composite(&self) -> bool {
        self.codec.is_composite()
    }

    pub fn needs_register(&self) -> bool {
        self.codec.needs_register()
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// The eco mode encoding helpers, for eco mode groups only.
    pub fn eco_mode(&self) -> Option<&dyn EcoModeLayout> {
        match &self.codec {
            Codec::EcoModeV1Codec(c) => Some(c as &dyn EcoModeLayout),
            Codec::EcoModeV2Codec(c) => Some(c as &dyn EcoModeLayout),
            _ => None,
        }
    }

    pub fn read(&self, data: &mut ProtocolResponse) -> Result<Value> {
        self.codec.read_at(self.id, self.offset, data)
    }

    pub fn read_value(&self, data: &mut ProtocolResponse) -> Result<Value> {
        self.codec.read_value(self.id, data)
    }

    pub fn encode(&self, value: &Value, register: Option<[u8; 2]>) -> Result<Vec<u8>> {
        self.codec.encode_value(self.id, value, register)
    }

    /// Command line text as a value for this sensor. `0x` prefixed text is raw
    /// bytes for composite structures and a hex integer for everything else.
    pub fn parse_value(&self, text: &str) -> Value {
        let text = text.trim();
        if !self.is_composite() {
            let hex = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"));
            if let Some(v) = hex.and_then(|hex| i64::from_str_radix(hex, 16).ok()) {
                return Value::Integer(v);
            }
        }
        text.parse().unwrap_or_else(|never| match never {})
    }
}
// }}}

/// Decoded values keyed by sensor id, in registry order.
pub type SensorValues = IndexMap<String, Option<Value>>;

/// Decodes every sensor from one response. A sensor that fails to decode is
/// reported as `None`, except composite structures whose errors propagate.
/// Sensors with unidentified meaning are skipped unless `include_unknown`.
pub fn read_sensors(
    sensors: &[Sensor],
    data: &mut ProtocolResponse,
    include_unknown: bool,
) -> Result<SensorValues> {
    let mut result = SensorValues::new();
    for sensor in sensors {
        if sensor.is_unknown() && !include_unknown {
            continue;
        }
        let value = match sensor.read(data) {
            Ok(Value::Absent) => None,
            Ok(value) => Some(value),
            Err(err) if sensor.is_composite() => return Err(err),
            Err(err) => {
                warn!("error reading sensor {}: {}", sensor.id, err);
                None
            }
        };
        result.insert(sensor.id.to_string(), value);
    }
    Ok(result)
}
