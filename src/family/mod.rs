use crate::prelude::*;

use serde::{Deserialize, Serialize};

pub mod dt;

pub use dt::Dt;

// {{{ Registry
/// Ordered runtime sensors and settings of one device, ids unique within each.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    sensors: Vec<Sensor>,
    settings: Vec<Sensor>,
}

impl Registry {
    pub fn new(sensors: Vec<Sensor>, settings: Vec<Sensor>) -> Self {
        let mut registry = Self::default();
        for sensor in sensors {
            registry.push_sensor(sensor);
        }
        for setting in settings {
            registry.set_setting(setting);
        }
        registry
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn settings(&self) -> &[Sensor] {
        &self.settings
    }

    pub fn sensor(&self, id: &str) -> Result<&Sensor> {
        self.sensors
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::UnknownSensor(id.to_string()))
    }

    pub fn setting(&self, id: &str) -> Result<&Sensor> {
        self.settings
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::UnknownSetting(id.to_string()))
    }

    pub fn has_setting(&self, id: &str) -> bool {
        self.settings.iter().any(|s| s.id == id)
    }

    fn push_sensor(&mut self, sensor: Sensor) {
        match self.sensors.iter_mut().find(|s| s.id == sensor.id) {
            Some(existing) => {
                warn!("duplicate sensor {} replaced", sensor.id);
                *existing = sensor;
            }
            None => self.sensors.push(sensor),
        }
    }

    /// Adds a setting, replacing one with the same id in place.
    pub fn set_setting(&mut self, setting: Sensor) {
        match self.settings.iter_mut().find(|s| s.id == setting.id) {
            Some(existing) => *existing = setting,
            None => self.settings.push(setting),
        }
    }

    pub fn retain_sensors(&mut self, keep: impl Fn(&Sensor) -> bool) {
        self.sensors.retain(|s| keep(s));
    }
}
// }}}

// {{{ DeviceInfo
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub model_name: Option<String>,
    pub serial_number: String,
    pub firmware: String,
    pub dsp1_version: u16,
    pub dsp2_version: u16,
    pub arm_version: u16,
}

/// Text field of a device info block: UTF-16BE if it contains control bytes,
/// ASCII otherwise, hex when neither decodes.
pub fn decode_text(data: &[u8]) -> String {
    if data.iter().any(|b| *b < 32) {
        let units: Vec<u16> = data
            .chunks(2)
            .map(|c| u16::from_be_bytes([c[0], c.get(1).copied().unwrap_or_default()]))
            .collect();
        if let Ok(text) = String::from_utf16(&units) {
            return text.trim_end().replace('\0', "");
        }
    } else if data.is_ascii() {
        if let Ok(text) = std::str::from_utf8(data) {
            return text.trim_end().to_string();
        }
    }
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn read_unsigned(data: &[u8], offset: usize) -> Result<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(Error::ShortRead {
            wanted: 2,
            position: offset,
            length: data.len(),
        })
}
// }}}

#[derive(Clone, Debug, Default)]
pub struct Capabilities {
    pub batteries: bool,
    /// Empty when the device has no switchable operation modes.
    pub operation_modes: &'static [OperationMode],
}

/// A device family: its register map and how to make sense of it.
pub trait Family: Send + Sync {
    fn name(&self) -> &'static str;

    fn default_comm_addr(&self) -> u8;

    /// First register and register count of the runtime data block.
    fn runtime_data_registers(&self) -> (u16, u16);

    /// First register and register count of the device info block.
    fn device_info_registers(&self) -> (u16, u16);

    fn parse_device_info(&self, data: &[u8]) -> Result<DeviceInfo>;

    /// Sensors and settings, narrowed to the device once its info is known.
    fn registry(&self, info: Option<&DeviceInfo>) -> Registry;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FamilyName {
    #[default]
    Dt,
}

impl FamilyName {
    pub fn build(&self) -> Box<dyn Family> {
        match self {
            Self::Dt => Box::new(Dt),
        }
    }
}
