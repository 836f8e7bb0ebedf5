use crate::prelude::*;

use indexmap::IndexMap;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;
use std::time::Duration;

use crate::protocol::UdpTransport;
use crate::sensor::{read_sensors, SensorValues};

const WORK_MODE: &str = "work_mode";
const BATTERY_DOD: &str = "battery_discharge_depth";
const GRID_EXPORT_LIMIT: &str = "grid_export_limit";
const ECO_MODE_GROUPS: [&str; 4] = ["eco_mode_1", "eco_mode_2", "eco_mode_3", "eco_mode_4"];

// {{{ OperationMode
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u8)]
pub enum OperationMode {
    General = 0,
    OffGrid = 1,
    Backup = 2,
    Eco = 3,
    PeakShaving = 4,
    /// Eco mode with a single charging group valid 00:00-23:59, Sun-Sat
    EcoCharge = 5,
    /// Eco mode with a single discharging group valid 00:00-23:59, Sun-Sat
    EcoDischarge = 6,
}

impl OperationMode {
    pub fn is_emulated(&self) -> bool {
        matches!(self, Self::EcoCharge | Self::EcoDischarge)
    }
}
// }}}

/// Session with one inverter: the protocol engine plus the register map of its
/// family.
pub struct Inverter {
    engine: Engine,
    family: Box<dyn Family>,
    comm_addr: u8,
    registry: Registry,
    info: Option<DeviceInfo>,
}

impl Inverter {
    pub fn new(
        transport: Box<dyn Transport>,
        family: Box<dyn Family>,
        comm_addr: Option<u8>,
        timeout: Duration,
        retries: u32,
    ) -> Self {
        let comm_addr = comm_addr.unwrap_or_else(|| family.default_comm_addr());
        let registry = family.registry(None);
        Self {
            engine: Engine::new(transport, timeout, retries),
            family,
            comm_addr,
            registry,
            info: None,
        }
    }

    pub async fn connect(
        host: &str,
        port: u16,
        family: Box<dyn Family>,
        comm_addr: Option<u8>,
        timeout: Duration,
        retries: u32,
    ) -> Result<Self> {
        let transport = UdpTransport::connect(host, port).await?;
        info!(
            "{} inverter at {} ({}:{})",
            family.name(),
            transport.peer(),
            host,
            port
        );
        Ok(Self::new(Box::new(transport), family, comm_addr, timeout, retries))
    }

    pub fn family(&self) -> &dyn Family {
        self.family.as_ref()
    }

    pub fn comm_addr(&self) -> u8 {
        self.comm_addr
    }

    pub fn info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    pub fn sensors(&self) -> &[Sensor] {
        self.registry.sensors()
    }

    pub fn settings(&self) -> &[Sensor] {
        self.registry.settings()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.engine.consecutive_failures()
    }

    async fn execute(&self, command: ProtocolCommand) -> Result<ProtocolResponse> {
        self.engine.execute(&command).await
    }

    /// Reads the device info block and narrows the sensors and settings to
    /// the detected model.
    pub async fn read_device_info(&mut self) -> Result<&DeviceInfo> {
        let (register, count) = self.family.device_info_registers();
        let response = self
            .execute(ProtocolCommand::read(self.comm_addr, register, count)?)
            .await?;
        let info = self.family.parse_device_info(response.response_data())?;
        info!(
            "inverter {} model {} firmware {}",
            info.serial_number,
            info.model_name.as_deref().unwrap_or("unknown"),
            info.firmware
        );

        self.registry = self.family.registry(Some(&info));
        Ok(&*self.info.insert(info))
    }

    pub async fn read_runtime_data(&self, include_unknown: bool) -> Result<SensorValues> {
        let (register, count) = self.family.runtime_data_registers();
        let mut response = self
            .execute(ProtocolCommand::read(self.comm_addr, register, count)?)
            .await?;
        read_sensors(self.registry.sensors(), &mut response, include_unknown)
    }

    pub async fn read_setting(&self, id: &str) -> Result<Value> {
        let setting = self.registry.setting(id)?;
        let mut response = self
            .execute(ProtocolCommand::read(
                self.comm_addr,
                setting.offset,
                setting.register_count(),
            )?)
            .await?;
        setting.read(&mut response)
    }

    /// Interprets command line text for setting `id`.
    pub fn parse_setting(&self, id: &str, text: &str) -> Result<Value> {
        Ok(self.registry.setting(id)?.parse_value(text))
    }

    /// Encodes and writes a setting. Values of at most one register go out as
    /// a single register write, longer ones as a multi register write.
    pub async fn write_setting(&self, id: &str, value: &Value) -> Result<()> {
        let setting = self.registry.setting(id)?;

        let register = if setting.needs_register() {
            let mut current = self
                .execute(ProtocolCommand::read(self.comm_addr, setting.offset, 1)?)
                .await?;
            Some(current.read_array::<2>()?)
        } else {
            None
        };

        let raw = setting.encode(value, register)?;
        debug!("writing {} = {} as {:02x?}", id, value, raw);

        let command = match raw.as_slice() {
            [byte] => ProtocolCommand::write(self.comm_addr, setting.offset, *byte as i8 as i16 as u16),
            [high, low] => ProtocolCommand::write(self.comm_addr, setting.offset, u16::from_be_bytes([*high, *low])),
            _ => ProtocolCommand::write_multi(self.comm_addr, setting.offset, &raw)?,
        };
        self.execute(command).await?;
        Ok(())
    }

    pub async fn read_settings_data(&self) -> Result<IndexMap<String, Value>> {
        let mut data = IndexMap::new();
        for setting in self.registry.settings() {
            let value = self.read_setting(setting.id).await?;
            data.insert(setting.id.to_string(), value);
        }
        Ok(data)
    }

    /// Sends a caller-built frame, accepting the reply `expectation` allows.
    pub async fn send_command(
        &self,
        frame: Vec<u8>,
        expectation: Expectation,
    ) -> Result<ProtocolResponse> {
        self.execute(ProtocolCommand::raw(frame, expectation)).await
    }

    // {{{ grid export limit
    pub async fn get_grid_export_limit(&self) -> Result<i64> {
        let value = self.read_setting(GRID_EXPORT_LIMIT).await?;
        value
            .as_i64()
            .ok_or_else(|| Error::invalid_value(GRID_EXPORT_LIMIT, &value))
    }

    /// Negative limits are ignored.
    pub async fn set_grid_export_limit(&self, limit: i64) -> Result<()> {
        if limit < 0 {
            debug!("ignoring negative grid export limit {}", limit);
            return Ok(());
        }
        self.write_setting(GRID_EXPORT_LIMIT, &Value::Integer(limit))
            .await
    }
    // }}}

    // {{{ battery
    fn require_batteries(&self) -> Result<()> {
        if self.family.capabilities().batteries {
            Ok(())
        } else {
            Err(Error::Unsupported("inverter has no batteries"))
        }
    }

    /// On-grid battery depth of discharge, 0-89 %.
    pub async fn get_ongrid_battery_dod(&self) -> Result<i64> {
        self.require_batteries()?;
        let value = self.read_setting(BATTERY_DOD).await?;
        value
            .as_i64()
            .map(|depth| 100 - depth)
            .ok_or_else(|| Error::invalid_value(BATTERY_DOD, &value))
    }

    pub async fn set_ongrid_battery_dod(&self, dod: i64) -> Result<()> {
        self.require_batteries()?;
        if !(0..=89).contains(&dod) {
            return Err(Error::out_of_range(BATTERY_DOD, "dod", dod));
        }
        self.write_setting(BATTERY_DOD, &Value::Integer(100 - dod))
            .await
    }
    // }}}

    // {{{ operation modes
    pub fn get_operation_modes(&self, include_emulated: bool) -> Vec<OperationMode> {
        self.family
            .capabilities()
            .operation_modes
            .iter()
            .filter(|mode| include_emulated || !mode.is_emulated())
            .copied()
            .collect()
    }

    fn require_operation_modes(&self) -> Result<&'static [OperationMode]> {
        let modes = self.family.capabilities().operation_modes;
        if modes.is_empty() {
            Err(Error::Unsupported("inverter has no operation modes"))
        } else {
            Ok(modes)
        }
    }

    pub async fn get_operation_mode(&self) -> Result<OperationMode> {
        self.require_operation_modes()?;

        let value = self.read_setting(WORK_MODE).await?;
        let mode = value
            .as_i64()
            .and_then(|code| u8::try_from(code).ok())
            .and_then(|code| OperationMode::try_from(code).ok())
            .ok_or_else(|| Error::invalid_value(WORK_MODE, &value))?;
        if mode != OperationMode::Eco {
            return Ok(mode);
        }

        let group = self.read_setting(ECO_MODE_GROUPS[0]).await?;
        Ok(if group.is_eco_charge_mode() {
            OperationMode::EcoCharge
        } else if group.is_eco_discharge_mode() {
            OperationMode::EcoDischarge
        } else {
            mode
        })
    }

    /// Switches the operation mode. The emulated eco charge/discharge modes
    /// program the first eco mode group for all day, every day with
    /// `eco_power` % (and `eco_soc` % target when charging), disable the other
    /// groups and then select eco mode.
    pub async fn set_operation_mode(
        &self,
        mode: OperationMode,
        eco_power: i16,
        eco_soc: i16,
    ) -> Result<()> {
        if !self.require_operation_modes()?.contains(&mode) {
            return Err(Error::Unsupported("operation mode not available on this inverter"));
        }

        match mode {
            OperationMode::EcoCharge | OperationMode::EcoDischarge => {
                if !(0..=100).contains(&eco_power) {
                    return Err(Error::out_of_range(ECO_MODE_GROUPS[0], "power", eco_power));
                }
                if !(0..=100).contains(&eco_soc) {
                    return Err(Error::out_of_range(ECO_MODE_GROUPS[0], "soc", eco_soc));
                }

                let first = self.registry.setting(ECO_MODE_GROUPS[0])?;
                let layout = first
                    .eco_mode()
                    .ok_or(Error::Unsupported("first eco mode group has no known layout"))?;
                let group = match mode {
                    OperationMode::EcoCharge => layout.encode_charge(eco_power, eco_soc),
                    _ => layout.encode_discharge(eco_power),
                };
                self.write_setting(first.id, &Value::Bytes(group)).await?;

                for id in &ECO_MODE_GROUPS[1..] {
                    let Ok(setting) = self.registry.setting(id) else {
                        continue;
                    };
                    if let Some(layout) = setting.eco_mode() {
                        self.write_setting(id, &Value::Bytes(layout.encode_off()))
                            .await?;
                    }
                }

                self.write_setting(WORK_MODE, &Value::Integer(OperationMode::Eco as i64))
                    .await
            }
            _ => {
                self.write_setting(WORK_MODE, &Value::Integer(u8::from(mode) as i64))
                    .await
            }
        }
    }
    // }}}
}
