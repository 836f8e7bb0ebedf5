use crate::prelude::*;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};

use super::SensorCodec;

/// Which part of a 16-bit register a one byte codec occupies.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Half {
    /// a lone byte at the cursor
    Whole,
    High,
    Low,
}

/// Big-endian signed integer of 1, 2 or 4 bytes at the cursor.
pub(crate) fn read_signed(data: &mut ProtocolResponse, size: usize) -> Result<i64> {
    Ok(match size {
        1 => i8::from_be_bytes(data.read_array::<1>()?) as i64,
        4 => i32::from_be_bytes(data.read_array::<4>()?) as i64,
        _ => i16::from_be_bytes(data.read_array::<2>()?) as i64,
    })
}

fn encode_signed(id: &str, value: i64, size: usize) -> Result<Vec<u8>> {
    let out_of_range = || Error::out_of_range(id, "value", value);
    Ok(match size {
        1 => i8::try_from(value).map_err(|_| out_of_range())?.to_be_bytes().to_vec(),
        4 => i32::try_from(value).map_err(|_| out_of_range())?.to_be_bytes().to_vec(),
        _ => i16::try_from(value).map_err(|_| out_of_range())?.to_be_bytes().to_vec(),
    })
}

fn numeric_input(id: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| Error::invalid_value(id, value))
}

// {{{ Numeric
/// Integers and scaled decimals. A scale of 1 decodes to an integer, any other
/// scale to the raw value divided by it.
#[derive(Clone, Debug)]
pub struct Numeric {
    pub size: usize,
    pub scale: u32,
    pub writable: bool,
}

impl Numeric {
    pub fn writable(size: usize, scale: u32) -> Self {
        Self {
            size,
            scale,
            writable: true,
        }
    }

    pub fn read_only(size: usize, scale: u32) -> Self {
        Self {
            size,
            scale,
            writable: false,
        }
    }
}

impl SensorCodec for Numeric {
    fn size(&self) -> usize {
        self.size
    }

    fn read_value(&self, _id: &str, data: &mut ProtocolResponse) -> Result<Value> {
        let raw = read_signed(data, self.size)?;
        Ok(match self.scale {
            1 => Value::Integer(raw),
            scale => Value::Float(raw as f64 / scale as f64),
        })
    }

    fn encode_value(&self, id: &str, value: &Value, _register: Option<[u8; 2]>) -> Result<Vec<u8>> {
        if !self.writable {
            return Err(Error::NotWritable(id.to_string()));
        }
        let raw = (numeric_input(id, value)? * self.scale as f64).round();
        if raw < i64::MIN as f64 || raw > i64::MAX as f64 {
            return Err(Error::out_of_range(id, "value", raw));
        }
        encode_signed(id, raw as i64, self.size)
    }
}
// }}}

// {{{ Energy
/// kWh in tenths; a raw value of -1 means the device has no reading.
#[derive(Clone, Debug)]
pub struct Energy {
    pub size: usize,
}

impl SensorCodec for Energy {
    fn size(&self) -> usize {
        self.size
    }

    fn read_value(&self, _id: &str, data: &mut ProtocolResponse) -> Result<Value> {
        Ok(match read_signed(data, self.size)? {
            -1 => Value::Absent,
            raw => Value::Float(raw as f64 / 10.0),
        })
    }
}
// }}}

// {{{ Float
#[derive(Clone, Debug)]
pub struct Float {
    pub scale: u32,
}

impl SensorCodec for Float {
    fn size(&self) -> usize {
        4
    }

    fn read_value(&self, _id: &str, data: &mut ProtocolResponse) -> Result<Value> {
        let raw = f32::from_be_bytes(data.read_array::<4>()?) as f64;
        Ok(Value::Float((raw / self.scale as f64 * 1000.0).round() / 1000.0))
    }
}
// }}}

// {{{ Timestamp
/// Six bytes: year since 2000, month, day, hour, minute, second.
#[derive(Clone, Debug)]
pub struct Timestamp;

impl Timestamp {
    /// ISO 8601 forms: date only (midnight), date and time with optional
    /// fraction, optionally followed by `Z` or a UTC offset. An offset is
    /// dropped and the wall clock time kept, as the device clock has no zone.
    fn parse_text(text: &str) -> Option<NaiveDateTime> {
        let text = text.trim();
        text.parse::<NaiveDateTime>()
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|ts| ts.naive_local()))
            .or_else(|| {
                DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z")
                    .ok()
                    .map(|ts| ts.naive_local())
            })
            .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").ok())
            .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M").ok())
            .or_else(|| {
                text.parse::<NaiveDate>()
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
    }
}

impl SensorCodec for Timestamp {
    fn size(&self) -> usize {
        6
    }

    fn read_value(&self, id: &str, data: &mut ProtocolResponse) -> Result<Value> {
        let [year, month, day, hour, minute, second] = data.read_array::<6>()?;
        NaiveDate::from_ymd_opt(2000 + year as i32, month as u32, day as u32)
            .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
            .map(Value::Timestamp)
            .ok_or_else(|| Error::invalid_value(id, [year, month, day, hour, minute, second]))
    }

    fn encode_value(&self, id: &str, value: &Value, _register: Option<[u8; 2]>) -> Result<Vec<u8>> {
        let timestamp = match value {
            Value::Timestamp(ts) => *ts,
            Value::Text(text) => Self::parse_text(text).ok_or_else(|| Error::invalid_value(id, text))?,
            other => return Err(Error::invalid_value(id, other)),
        };
        let year = u8::try_from(timestamp.year() - 2000)
            .map_err(|_| Error::out_of_range(id, "year", timestamp.year()))?;

        Ok(vec![
            year,
            timestamp.month() as u8,
            timestamp.day() as u8,
            timestamp.hour() as u8,
            timestamp.minute() as u8,
            timestamp.second() as u8,
        ])
    }
}
// }}}

// {{{ Byte
/// Signed single byte; the register halves are writable by merging into the
/// current register content.
#[derive(Clone, Debug)]
pub struct Byte {
    pub half: Half,
}

/// Reads the byte of `half`, leaving the cursor after it.
pub(crate) fn read_half(data: &mut ProtocolResponse, half: Half) -> Result<u8> {
    Ok(match half {
        Half::Whole | Half::High => data.read_array::<1>()?[0],
        Half::Low => data.read_array::<2>()?[1],
    })
}

impl SensorCodec for Byte {
    fn size(&self) -> usize {
        1
    }

    fn read_value(&self, _id: &str, data: &mut ProtocolResponse) -> Result<Value> {
        Ok(Value::Integer(read_half(data, self.half)? as i8 as i64))
    }

    fn encode_value(&self, id: &str, value: &Value, register: Option<[u8; 2]>) -> Result<Vec<u8>> {
        let index = match self.half {
            Half::Whole => return Err(Error::NotWritable(id.to_string())),
            Half::High => 0,
            Half::Low => 1,
        };
        let mut word = register.ok_or_else(|| Error::NotWritable(id.to_string()))?;
        let raw = numeric_input(id, value)?.round() as i64;
        word[index] = encode_signed(id, raw, 1)?[0];
        Ok(word.to_vec())
    }

    fn needs_register(&self) -> bool {
        self.half != Half::Whole
    }
}
// }}}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(data: &[u8]) -> ProtocolResponse {
        ProtocolResponse::new(data.to_vec(), None)
    }

    #[test]
    fn reads_signed_big_endian() {
        let mut data = response(&[0xff, 0xfe, 0x12, 0x34, 0x56, 0x78]);
        assert_eq!(
            Numeric::writable(2, 1).read_value("x", &mut data).unwrap(),
            Value::Integer(-2)
        );
        assert_eq!(
            Numeric::writable(4, 1).read_value("x", &mut data).unwrap(),
            Value::Integer(0x12345678)
        );
    }

    #[test]
    fn scaled_round_trip() {
        let voltage = Numeric::writable(2, 10);
        let raw = voltage.encode_value("v", &Value::Float(230.4), None).unwrap();
        assert_eq!(raw, vec![0x09, 0x00]);
        assert_eq!(
            voltage.read_value("v", &mut response(&raw)).unwrap(),
            Value::Float(230.4)
        );

        let decimal = Numeric::writable(2, 100);
        let raw = decimal.encode_value("d", &Value::Float(-1.25), None).unwrap();
        assert_eq!(
            decimal.read_value("d", &mut response(&raw)).unwrap(),
            Value::Float(-1.25)
        );
    }

    #[test]
    fn encode_checks_width() {
        let integer = Numeric::writable(2, 1);
        assert!(matches!(
            integer.encode_value("i", &Value::Integer(40000), None),
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            Numeric::read_only(2, 100).encode_value("f", &Value::Integer(1), None),
            Err(Error::NotWritable(_))
        ));
        assert_eq!(
            Numeric::writable(4, 1)
                .encode_value("l", &Value::Integer(10000), None)
                .unwrap(),
            vec![0x00, 0x00, 0x27, 0x10]
        );
    }

    #[test]
    fn integer_round_trips_across_its_width() {
        let integer = Numeric::writable(2, 1);
        let values = (i16::MIN as i64..=i16::MAX as i64)
            .step_by(257)
            .chain([i16::MIN as i64, -1, 0, 1, i16::MAX as i64]);
        for v in values {
            let raw = integer.encode_value("i", &Value::Integer(v), None).unwrap();
            assert_eq!(raw, (v as i16).to_be_bytes().to_vec(), "{}", v);
            assert_eq!(integer.read_value("i", &mut response(&raw)).unwrap(), Value::Integer(v));
        }

        for v in [i16::MAX as i64 + 1, i16::MIN as i64 - 1, u16::MAX as i64] {
            assert!(
                matches!(
                    integer.encode_value("i", &Value::Integer(v), None),
                    Err(Error::OutOfRange { .. })
                ),
                "{}",
                v
            );
        }
    }

    #[test]
    fn long_round_trips_across_its_width() {
        let long = Numeric::writable(4, 1);
        let values = (i32::MIN as i64..=i32::MAX as i64)
            .step_by(16_777_259)
            .chain([i32::MIN as i64, -65536, 65536, i32::MAX as i64]);
        for v in values {
            let raw = long.encode_value("l", &Value::Integer(v), None).unwrap();
            assert_eq!(raw, (v as i32).to_be_bytes().to_vec(), "{}", v);
            assert_eq!(long.read_value("l", &mut response(&raw)).unwrap(), Value::Integer(v));
        }

        for v in [i32::MAX as i64 + 1, i32::MIN as i64 - 1, u32::MAX as i64] {
            assert!(matches!(
                long.encode_value("l", &Value::Integer(v), None),
                Err(Error::OutOfRange { .. })
            ));
        }
    }

    #[test]
    fn scaled_values_round_trip_across_raw_range() {
        // voltage and current use tenths, decimals any scale
        for scale in [10, 100, 1000] {
            let codec = Numeric::writable(2, scale);
            let raws = (i16::MIN..=i16::MAX).step_by(131).chain([i16::MIN, -1, 0, 1, i16::MAX]);
            for raw in raws {
                let value = Value::Float(raw as f64 / scale as f64);
                let bytes = codec.encode_value("d", &value, None).unwrap();
                assert_eq!(bytes, raw.to_be_bytes().to_vec(), "{} / {}", raw, scale);
                assert_eq!(codec.read_value("d", &mut response(&bytes)).unwrap(), value);
            }

            let above = Value::Float((i16::MAX as f64 + 1.0) / scale as f64);
            let below = Value::Float((i16::MIN as f64 - 1.0) / scale as f64);
            for value in [above, below] {
                assert!(matches!(
                    codec.encode_value("d", &value, None),
                    Err(Error::OutOfRange { .. })
                ));
            }
        }
    }

    #[test]
    fn timestamps_round_trip_over_calendar() {
        for year in (2000..=2255).step_by(17) {
            for month in 1..=12 {
                for (day, hour, minute, second) in [(1, 0, 0, 0), (15, 12, 30, 30), (28, 23, 59, 59)] {
                    let ts = NaiveDate::from_ymd_opt(year, month, day)
                        .unwrap()
                        .and_hms_opt(hour, minute, second)
                        .unwrap();
                    let raw = Timestamp.encode_value("t", &Value::Timestamp(ts), None).unwrap();
                    assert_eq!(
                        raw,
                        vec![(year - 2000) as u8, month as u8, day as u8, hour as u8, minute as u8, second as u8]
                    );
                    assert_eq!(
                        Timestamp.read_value("t", &mut response(&raw)).unwrap(),
                        Value::Timestamp(ts)
                    );

                    let text = ts.format("%Y-%m-%dT%H:%M:%S").to_string();
                    assert_eq!(Timestamp.encode_value("t", &Value::Text(text), None).unwrap(), raw);
                }
            }
        }
    }

    #[test]
    fn timestamp_year_outside_device_range() {
        for year in [1999, 2256] {
            let ts = NaiveDate::from_ymd_opt(year, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap();
            assert!(matches!(
                Timestamp.encode_value("t", &Value::Timestamp(ts), None),
                Err(Error::OutOfRange { .. })
            ));
        }
    }

    #[test]
    fn timestamp_accepts_iso_forms() {
        let encode = |text: &str| Timestamp.encode_value("t", &Value::from(text), None).unwrap();

        assert_eq!(encode("2024-03-05"), vec![24, 3, 5, 0, 0, 0]);
        assert_eq!(encode("2024-03-05T10:20:30Z"), vec![24, 3, 5, 10, 20, 30]);
        assert_eq!(encode("2024-03-05T10:20:30+01:00"), vec![24, 3, 5, 10, 20, 30]);
        assert_eq!(encode("2024-03-05T23:20:30-05:30"), vec![24, 3, 5, 23, 20, 30]);
        assert_eq!(encode("2024-03-05 10:20:30+02:00"), vec![24, 3, 5, 10, 20, 30]);
        assert_eq!(encode("2024-03-05T10:20:30.750"), vec![24, 3, 5, 10, 20, 30]);
        assert_eq!(encode("2024-03-05 10:20:30"), vec![24, 3, 5, 10, 20, 30]);
        assert_eq!(encode(" 2024-03-05T10:20 "), vec![24, 3, 5, 10, 20, 0]);

        for text in ["2024-03-05T", "05.03.2024", "2024-02-30", "yesterday"] {
            assert!(matches!(
                Timestamp.encode_value("t", &Value::from(text), None),
                Err(Error::InvalidValue { .. })
            ));
        }
    }

    #[test]
    fn energy_minus_one_is_absent() {
        let energy = Energy { size: 4 };
        assert_eq!(
            energy.read_value("e", &mut response(&[0xff; 4])).unwrap(),
            Value::Absent
        );
        assert_eq!(
            energy.read_value("e", &mut response(&[0, 0, 0x30, 0x39])).unwrap(),
            Value::Float(1234.5)
        );
    }

    #[test]
    fn float_rounds_to_three_places() {
        let raw = (12.34567f32).to_be_bytes();
        assert_eq!(
            Float { scale: 1 }.read_value("f", &mut response(&raw)).unwrap(),
            Value::Float(12.346)
        );
        assert!(Float { scale: 1 }
            .read_value("f", &mut response(&raw[..3]))
            .is_err());
    }

    #[test]
    fn timestamp_round_trip() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let raw = Timestamp.encode_value("time", &Value::Timestamp(ts), None).unwrap();
        assert_eq!(raw, vec![24, 3, 5, 10, 0, 0]);
        assert_eq!(
            Timestamp.read_value("time", &mut response(&raw)).unwrap(),
            Value::Timestamp(ts)
        );

        let from_text = Timestamp
            .encode_value("time", &Value::from("2024-03-05T10:00:00"), None)
            .unwrap();
        assert_eq!(from_text, raw);
    }

    #[test]
    fn timestamp_rejects_invalid_date() {
        assert!(matches!(
            Timestamp.read_value("time", &mut response(&[24, 13, 5, 10, 0, 0])),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn byte_halves_merge_into_register() {
        let high = Byte { half: Half::High };
        let low = Byte { half: Half::Low };
        let register = Some([0x12, 0x34]);

        assert_eq!(
            high.encode_value("h", &Value::Integer(-1), register).unwrap(),
            vec![0xff, 0x34]
        );
        assert_eq!(
            low.encode_value("l", &Value::Integer(5), register).unwrap(),
            vec![0x12, 0x05]
        );
        assert_eq!(
            low.read_value("l", &mut response(&[0x12, 0x34])).unwrap(),
            Value::Integer(0x34)
        );
        assert!(Byte { half: Half::Whole }
            .encode_value("b", &Value::Integer(1), register)
            .is_err());
    }
}
