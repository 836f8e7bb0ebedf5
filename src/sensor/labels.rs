use crate::prelude::*;

use super::scalar::{read_half, Half};
use super::SensorCodec;

pub type Labels = &'static [(i64, &'static str)];

pub const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

pub fn label_of(labels: Labels, code: i64) -> Option<&'static str> {
    labels
        .iter()
        .find(|(value, _)| *value == code)
        .map(|(_, label)| *label)
}

/// Labels of the set bits in ascending bit order, `err{bit}` for bits without
/// a label.
pub fn decode_bitmap(bits: u32, labels: Labels) -> String {
    (0..32)
        .filter(|bit| bits & (1 << bit) != 0)
        .map(|bit| match label_of(labels, bit as i64) {
            Some(label) => label.to_string(),
            None => format!("err{}", bit),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Day names of a week bitmask with Sunday in bit 0.
pub fn decode_day_of_week(bits: i64) -> String {
    DAY_NAMES
        .iter()
        .enumerate()
        .filter(|(bit, _)| bits & (1 << bit) != 0)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(",")
}

// {{{ Enumeration
#[derive(Clone, Debug)]
pub struct Enumeration {
    pub half: Half,
    pub size: usize,
    pub labels: Labels,
}

impl Enumeration {
    pub fn new(half: Half, size: usize, labels: Labels) -> Self {
        Self { half, size, labels }
    }
}

impl SensorCodec for Enumeration {
    fn size(&self) -> usize {
        self.size
    }

    fn read_value(&self, _id: &str, data: &mut ProtocolResponse) -> Result<Value> {
        let code = match self.size {
            2 => i16::from_be_bytes(data.read_array::<2>()?) as i64,
            _ => read_half(data, self.half)? as i8 as i64,
        };
        Ok(match label_of(self.labels, code) {
            Some(label) => Value::Text(label.to_string()),
            None => Value::Unrecognized(code),
        })
    }
}
// }}}

// {{{ Bitmap
/// 32-bit flag word, either 4 consecutive bytes or two registers at separate
/// offsets combined as `high << 16 | low`.
#[derive(Clone, Debug)]
pub struct Bitmap {
    pub low_offset: Option<u16>,
    pub labels: Labels,
}

impl Bitmap {
    pub fn wide(labels: Labels) -> Self {
        Self {
            low_offset: None,
            labels,
        }
    }

    pub fn split(low_offset: u16, labels: Labels) -> Self {
        Self {
            low_offset: Some(low_offset),
            labels,
        }
    }
}

impl SensorCodec for Bitmap {
    fn size(&self) -> usize {
        match self.low_offset {
            Some(_) => 2,
            None => 4,
        }
    }

    fn read_value(&self, _id: &str, data: &mut ProtocolResponse) -> Result<Value> {
        let bits = u32::from_be_bytes(data.read_array::<4>()?);
        Ok(Value::Text(decode_bitmap(bits, self.labels)))
    }

    fn read_at(&self, id: &str, offset: u16, data: &mut ProtocolResponse) -> Result<Value> {
        let Some(low_offset) = self.low_offset else {
            data.seek(offset)?;
            return self.read_value(id, data);
        };
        data.seek(offset)?;
        let high = u16::from_be_bytes(data.read_array::<2>()?) as u32;
        data.seek(low_offset)?;
        let low = u16::from_be_bytes(data.read_array::<2>()?) as u32;
        Ok(Value::Text(decode_bitmap(high << 16 | low, self.labels)))
    }
}
// }}}

#[cfg(test)]
mod tests {
    use super::*;

    const FLAGS: Labels = &[(0, "A"), (1, "B"), (2, "C")];

    #[test]
    fn bitmap_labels_in_bit_order() {
        assert_eq!(decode_bitmap(0b101, FLAGS), "A, C");
        assert_eq!(decode_bitmap(0, FLAGS), "");
        assert_eq!(decode_bitmap(1 << 31 | 0b10, FLAGS), "B, err31");
    }

    #[test]
    fn days_of_week() {
        assert_eq!(decode_day_of_week(0b0000011), "Sun,Mon");
        assert_eq!(decode_day_of_week(127), "Sun,Mon,Tue,Wed,Thu,Fri,Sat");
        assert_eq!(decode_day_of_week(0), "");
    }

    #[test]
    fn enumeration_falls_back_to_code() {
        let codec = Enumeration::new(Half::Whole, 2, FLAGS);
        let mut data = ProtocolResponse::new(vec![0x00, 0x02, 0x00, 0x09], None);
        assert_eq!(codec.read_value("e", &mut data).unwrap(), Value::from("C"));
        assert_eq!(codec.read_value("e", &mut data).unwrap(), Value::Unrecognized(9));
    }

    #[test]
    fn enumeration_of_low_half() {
        let codec = Enumeration::new(Half::Low, 1, FLAGS);
        let mut data = ProtocolResponse::new(vec![0x07, 0x01], None);
        assert_eq!(codec.read_value("e", &mut data).unwrap(), Value::from("B"));
    }

    #[test]
    fn split_bitmap_combines_high_and_low() {
        let codec = Bitmap::split(4, &[(0, "low0"), (16, "high0")]);
        let mut data = ProtocolResponse::new(vec![0x00, 0x01, 0xaa, 0xaa, 0x00, 0x01], None);
        assert_eq!(
            codec.read_at("b", 0, &mut data).unwrap(),
            Value::from("low0, high0")
        );
    }
}
