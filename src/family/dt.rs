use crate::prelude::*;

use crate::sensor::derived::product;
use crate::sensor::{Input, Labels};
use crate::sensor::SensorKind::{Ac, Grid, Pv};

use super::{decode_text, read_unsigned, DeviceInfo, Family, Registry};

// 30100, 73 registers
const RUNTIME_DATA: (u16, u16) = (0x7594, 0x0049);
// 30001, 40 registers
const DEVICE_INFO: (u16, u16) = (0x7531, 0x0028);

const SINGLE_PHASE_MODELS: [&str; 9] = ["DSN", "DST", "NSU", "SSN", "SST", "SSX", "SSY", "PSB", "PSC"];
const THREE_MPPT_MODELS: [&str; 7] = ["MSU", "MST", "PSC", "MSC", "25KET", "29K9ET", "30KET"];

pub const WORK_MODES: Labels = &[
    (0, "Wait Mode"),
    (1, "Normal (On-Grid)"),
    (2, "Normal (Off-Grid)"),
    (3, "Fault Mode"),
    (4, "Flash Mode"),
    (5, "Check Mode"),
];

pub const SAFETY_COUNTRIES: Labels = &[
    (0, "Italy"),
    (1, "Czech"),
    (2, "Germany"),
    (3, "Spain"),
    (4, "Greece"),
    (5, "Denmark"),
    (6, "Belgium"),
    (7, "Romania"),
    (8, "G83/G59"),
    (9, "Australia"),
    (10, "France"),
    (11, "China"),
    (13, "Poland"),
    (14, "South Africa"),
    (15, "AustraliaL"),
    (16, "Brazil"),
    (17, "Thailand MEA"),
    (18, "Thailand PEA"),
    (19, "Mauritius"),
    (20, "Holland"),
    (21, "Northern Ireland"),
    (22, "China Higher"),
    (23, "French 50Hz"),
    (24, "French 60Hz"),
    (25, "Australia Ergon"),
    (26, "Australia Energex"),
    (27, "Holland 16/20A"),
    (28, "Korea"),
    (29, "China Station"),
    (30, "Austria"),
    (31, "India"),
    (32, "50Hz Grid Default"),
    (33, "Warehouse"),
    (34, "Philippines"),
    (35, "Ireland"),
    (36, "Taiwan"),
    (37, "Bulgaria"),
    (38, "Barbados"),
    (39, "China Highest"),
    (40, "G59/3"),
    (41, "Sweden"),
    (42, "Chile"),
    (43, "Brazil LV"),
    (44, "NewZealand"),
    (45, "IEEE1547 208VAC"),
    (46, "IEEE1547 220VAC"),
    (47, "IEEE1547 240VAC"),
    (48, "60Hz LV Default"),
    (49, "50Hz LV Default"),
];

pub fn is_single_phase(info: &DeviceInfo) -> bool {
    SINGLE_PHASE_MODELS
        .iter()
        .any(|model| info.serial_number.contains(model))
}

pub fn is_3_mppt(info: &DeviceInfo) -> bool {
    THREE_MPPT_MODELS
        .iter()
        .any(|model| info.serial_number.contains(model))
}

fn power(voltage: u16, current: u16) -> Vec<Input> {
    vec![Input::voltage(voltage), Input::current(current)]
}

/// DT, MS, D-NS and XS inverters, without batteries.
#[derive(Clone, Copy, Debug, Default)]
pub struct Dt;

impl Dt {
    pub fn sensors() -> Vec<Sensor> {
        vec![
            Sensor::timestamp("timestamp", 30100, "Timestamp", None),
            Sensor::voltage("vpv1", 30103, "PV1 Voltage", Pv),
            Sensor::current("ipv1", 30104, "PV1 Current", Pv),
            Sensor::calculated("ppv1", power(30103, 30104), product, "PV1 Power", "W", Pv),
            Sensor::voltage("vpv2", 30105, "PV2 Voltage", Pv),
            Sensor::current("ipv2", 30106, "PV2 Current", Pv),
            Sensor::calculated("ppv2", power(30105, 30106), product, "PV2 Power", "W", Pv),
            Sensor::voltage("vpv3", 30107, "PV3 Voltage", Pv),
            Sensor::current("ipv3", 30108, "PV3 Current", Pv),
            Sensor::calculated("ppv3", power(30107, 30108), product, "PV3 Power", "W", Pv),
            Sensor::voltage("vline1", 30115, "On-grid L1-L2 Voltage", Ac),
            Sensor::voltage("vline2", 30116, "On-grid L2-L3 Voltage", Ac),
            Sensor::voltage("vline3", 30117, "On-grid L3-L1 Voltage", Ac),
            Sensor::voltage("vgrid1", 30118, "On-grid L1 Voltage", Ac),
            Sensor::voltage("vgrid2", 30119, "On-grid L2 Voltage", Ac),
            Sensor::voltage("vgrid3", 30120, "On-grid L3 Voltage", Ac),
            Sensor::current("igrid1", 30121, "On-grid L1 Current", Ac),
            Sensor::current("igrid2", 30122, "On-grid L2 Current", Ac),
            Sensor::current("igrid3", 30123, "On-grid L3 Current", Ac),
            Sensor::frequency("fgrid1", 30124, "On-grid L1 Frequency", Ac),
            Sensor::frequency("fgrid2", 30125, "On-grid L2 Frequency", Ac),
            Sensor::frequency("fgrid3", 30126, "On-grid L3 Frequency", Ac),
            Sensor::calculated("pgrid1", power(30118, 30121), product, "On-grid L1 Power", "W", Ac),
            Sensor::calculated("pgrid2", power(30119, 30122), product, "On-grid L2 Power", "W", Ac),
            Sensor::calculated("pgrid3", power(30120, 30123), product, "On-grid L3 Power", "W", Ac),
            unknown("xx54", 30127),
            Sensor::power("ppv", 30128, "PV Power", Pv),
            Sensor::integer("work_mode", 30129, "Work Mode code", "", None),
            Sensor::enum2("work_mode_label", 30129, WORK_MODES, "Work Mode", None),
            Sensor::long("error_codes", 30130, "Error Codes", "", None),
            Sensor::integer("warning_code", 30132, "Warning code", "", None),
            unknown("xx66", 30133),
            unknown("xx68", 30134),
            unknown("xx70", 30135),
            unknown("xx72", 30136),
            unknown("xx74", 30137),
            unknown("xx76", 30138),
            unknown("xx78", 30139),
            unknown("xx80", 30140),
            Sensor::temp("temperature", 30141, "Inverter Temperature", Ac),
            unknown("xx84", 30142),
            unknown("xx86", 30143),
            Sensor::energy("e_day", 30144, "Today's PV Generation", Pv),
            Sensor::energy4("e_total", 30145, "Total PV Generation", Pv),
            Sensor::long("h_total", 30147, "Hours Total", "h", Pv),
            Sensor::integer("safety_country", 30149, "Safety Country code", "", Ac),
            Sensor::enum2("safety_country_label", 30149, SAFETY_COUNTRIES, "Safety Country", Ac),
            unknown("xx100", 30150),
            unknown("xx102", 30151),
            unknown("xx104", 30152),
            unknown("xx106", 30153),
            unknown("xx108", 30154),
            unknown("xx110", 30155),
            unknown("xx112", 30156),
            unknown("xx114", 30157),
            unknown("xx116", 30158),
            unknown("xx118", 30159),
            unknown("xx120", 30160),
            unknown("xx122", 30161),
            Sensor::integer("funbit", 30162, "FunBit", "", Pv),
            Sensor::voltage("vbus", 30163, "Bus Voltage", Pv),
            Sensor::voltage("vnbus", 30164, "NBus Voltage", Pv),
            unknown("xx130", 30165),
            unknown("xx132", 30166),
            unknown("xx134", 30167),
            unknown("xx136", 30168),
            unknown("xx138", 30169),
            unknown("xx140", 30170),
            unknown("xx142", 30171),
            unknown("xx144", 30172),
        ]
    }

    pub fn settings() -> Vec<Sensor> {
        vec![
            Sensor::timestamp("time", 40313, "Inverter time", None),
            Sensor::integer("shadow_scan", 40326, "Shadow Scan", "", Pv),
            Sensor::integer("grid_export", 40327, "Grid Export Enabled", "", Grid),
            Sensor::integer("grid_export_limit", 40328, "Grid Export Limit", "%", Grid),
        ]
    }

    /// False for second and third phase sensors.
    fn is_single_phase_sensor(sensor: &Sensor) -> bool {
        let id = sensor.id;
        !((id.ends_with('2') || id.ends_with('3')) && !id.contains("pv") && !id.starts_with("xx"))
    }
}

/// Register whose meaning is not identified yet, named by its byte offset in
/// the runtime data block.
fn unknown(id: &'static str, register: u16) -> Sensor {
    Sensor::integer(id, register, "Unknown sensor", "", None)
}

impl Family for Dt {
    fn name(&self) -> &'static str {
        "dt"
    }

    fn default_comm_addr(&self) -> u8 {
        0x7f
    }

    fn runtime_data_registers(&self) -> (u16, u16) {
        RUNTIME_DATA
    }

    fn device_info_registers(&self) -> (u16, u16) {
        DEVICE_INFO
    }

    fn parse_device_info(&self, data: &[u8]) -> Result<DeviceInfo> {
        if data.len() < 72 {
            return Err(Error::ShortRead {
                wanted: 72,
                position: 0,
                length: data.len(),
            });
        }

        let model_name = match std::str::from_utf8(&data[22..32]) {
            Ok(name) if data[22..32].is_ascii() => Some(name.trim_end().to_string()),
            _ => {
                warn!("no model name sent from the inverter");
                None
            }
        };
        let dsp1_version = read_unsigned(data, 66)?;
        let dsp2_version = read_unsigned(data, 68)?;
        let arm_version = read_unsigned(data, 70)?;

        Ok(DeviceInfo {
            model_name,
            serial_number: decode_text(&data[6..22]),
            firmware: format!("{}.{}.{:02x}", dsp1_version, dsp2_version, arm_version),
            dsp1_version,
            dsp2_version,
            arm_version,
        })
    }

    fn registry(&self, info: Option<&DeviceInfo>) -> Registry {
        let mut registry = Registry::new(Self::sensors(), Self::settings());
        let Some(info) = info else {
            return registry;
        };

        if is_single_phase(info) {
            registry.retain_sensors(Self::is_single_phase_sensor);
            registry.set_setting(Sensor::long("grid_export_limit", 40328, "Grid Export Limit", "W", Grid));
        } else {
            registry.set_setting(Sensor::integer("grid_export_limit", 40336, "Grid Export Limit", "%", Grid));
        }

        if !is_3_mppt(info) {
            registry.retain_sensors(|s| !s.id.ends_with("pv3"));
        }

        registry
    }
}
