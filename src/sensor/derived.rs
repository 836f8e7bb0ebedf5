use crate::prelude::*;

use super::labels::{label_of, Labels};
use super::scalar::read_signed;
use super::SensorCodec;

/// One source value of a calculated sensor: a signed integer at a register
/// offset, divided by `scale`.
#[derive(Clone, Copy, Debug)]
pub struct Input {
    pub offset: u16,
    pub size: usize,
    pub scale: f64,
}

impl Input {
    pub fn integer(offset: u16) -> Self {
        Self {
            offset,
            size: 2,
            scale: 1.0,
        }
    }

    pub fn long(offset: u16) -> Self {
        Self {
            offset,
            size: 4,
            scale: 1.0,
        }
    }

    pub fn voltage(offset: u16) -> Self {
        Self {
            offset,
            size: 2,
            scale: 10.0,
        }
    }

    pub fn current(offset: u16) -> Self {
        Self::voltage(offset)
    }

    fn read(&self, data: &mut ProtocolResponse) -> Result<f64> {
        data.seek(self.offset)?;
        Ok(read_signed(data, self.size)? as f64 / self.scale)
    }
}

/// Rounded product of all inputs, e.g. voltage times current.
pub fn product(values: &[f64]) -> Value {
    Value::Integer(values.iter().product::<f64>().round() as i64)
}

/// Rounded sum of all inputs.
pub fn sum(values: &[f64]) -> Value {
    Value::Integer(values.iter().sum::<f64>().round() as i64)
}

// {{{ Calculated
/// Decode-only value computed from other registers of the same response.
#[derive(Clone)]
pub struct Calculated {
    pub inputs: Vec<Input>,
    pub combine: fn(&[f64]) -> Value,
    pub labels: Option<Labels>,
}

impl Calculated {
    pub fn new(inputs: Vec<Input>, combine: fn(&[f64]) -> Value) -> Self {
        Self {
            inputs,
            combine,
            labels: None,
        }
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = Some(labels);
        self
    }
}

impl std::fmt::Debug for Calculated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Calculated")
            .field("inputs", &self.inputs)
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}

impl SensorCodec for Calculated {
    fn size(&self) -> usize {
        0
    }

    fn read_value(&self, _id: &str, data: &mut ProtocolResponse) -> Result<Value> {
        let values = self
            .inputs
            .iter()
            .map(|input| input.read(data))
            .collect::<Result<Vec<_>>>()?;
        let value = (self.combine)(&values);

        Ok(match (self.labels, value.as_i64()) {
            (Some(labels), Some(code)) => match label_of(labels, code) {
                Some(label) => Value::Text(label.to_string()),
                None => Value::Unrecognized(code),
            },
            _ => value,
        })
    }

    fn read_at(&self, id: &str, _offset: u16, data: &mut ProtocolResponse) -> Result<Value> {
        self.read_value(id, data)
    }
}
// }}}
