#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub use goodwe_udp::prelude::*;

use goodwe_udp::protocol::frame::checksum;
use goodwe_udp::sensor::derived::{product, sum};
use goodwe_udp::sensor::Input;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// {{{ frames
fn seal(mut frame: Vec<u8>) -> Vec<u8> {
    let crc = checksum(&frame);
    frame.extend_from_slice(&crc);
    frame
}

pub fn read_reply(comm_addr: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![comm_addr, 0x03, payload.len() as u8];
    frame.extend_from_slice(payload);
    seal(frame)
}

pub fn write_multi_reply(comm_addr: u8, register: u16, count: u16) -> Vec<u8> {
    let mut frame = vec![comm_addr, 0x10];
    frame.extend_from_slice(&register.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    seal(frame)
}

pub fn exception_reply(comm_addr: u8, function: u8, code: u8) -> Vec<u8> {
    seal(vec![comm_addr, function | 0x80, code])
}

fn word(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}
// }}}

// {{{ MockTransport
pub enum Reply {
    Frame(Vec<u8>),
    /// Arrives only after the given delay.
    Late(Duration, Vec<u8>),
    /// Nothing comes back.
    Silence,
    Fail(io::ErrorKind),
}

#[derive(Clone, Debug)]
pub struct Exchange {
    pub request: Vec<u8>,
    pub sent_at: Instant,
    pub replied_at: Option<Instant>,
}

type Responder = Box<dyn FnMut(&[u8]) -> Reply + Send>;

struct Shared {
    responder: Mutex<Responder>,
    /// Replies in arrival order, each with the instant it arrives.
    inbox: Mutex<VecDeque<(Instant, Reply)>>,
    exchanges: Mutex<Vec<Exchange>>,
    renewals: Mutex<usize>,
    delay: Duration,
}

/// Transport double: every sent frame is handed to a responder whose reply
/// is queued for receiving. Renewing the endpoint drops whatever is queued,
/// including replies still on their way.
#[derive(Clone)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

impl MockTransport {
    pub fn new(responder: impl FnMut(&[u8]) -> Reply + Send + 'static, delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                responder: Mutex::new(Box::new(responder)),
                inbox: Mutex::new(VecDeque::new()),
                exchanges: Mutex::new(Vec::new()),
                renewals: Mutex::new(0),
                delay,
            }),
        }
    }

    /// Replies in order, one per sent frame, then silence.
    pub fn scripted(replies: Vec<Reply>) -> Self {
        let mut replies = VecDeque::from(replies);
        Self::new(move |_| replies.pop_front().unwrap_or(Reply::Silence), Duration::ZERO)
    }

    pub fn device(device: MockDevice, delay: Duration) -> Self {
        Self::new(move |request| device.answer(request), delay)
    }

    pub fn boxed(&self) -> Box<dyn Transport> {
        Box::new(self.clone())
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.shared.exchanges.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.exchanges().into_iter().map(|e| e.request).collect()
    }

    pub fn function_codes(&self) -> Vec<u8> {
        self.requests().iter().map(|r| r[1]).collect()
    }

    pub fn sent(&self) -> usize {
        self.shared.exchanges.lock().unwrap().len()
    }

    pub fn renewals(&self) -> usize {
        *self.shared.renewals.lock().unwrap()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, frame: &[u8]) -> io::Result<()> {
        let now = Instant::now();
        self.shared.exchanges.lock().unwrap().push(Exchange {
            request: frame.to_vec(),
            sent_at: now,
            replied_at: None,
        });
        let reply = {
            let mut responder = self.shared.responder.lock().unwrap();
            (*responder)(frame)
        };
        let arrival = match &reply {
            Reply::Silence => return Ok(()),
            Reply::Late(delay, _) => now + *delay,
            Reply::Frame(_) => now + self.shared.delay,
            Reply::Fail(_) => now,
        };
        self.shared.inbox.lock().unwrap().push_back((arrival, reply));
        Ok(())
    }

    async fn recv(&self) -> io::Result<Vec<u8>> {
        loop {
            let next = self.shared.inbox.lock().unwrap().front().map(|(at, _)| *at);
            match next {
                None => return std::future::pending().await,
                Some(at) if at > Instant::now() => tokio::time::sleep_until(at).await,
                Some(_) => break,
            }
        }

        let reply = self.shared.inbox.lock().unwrap().pop_front().map(|(_, r)| r);
        match reply {
            Some(Reply::Frame(frame)) | Some(Reply::Late(_, frame)) => {
                if let Some(last) = self.shared.exchanges.lock().unwrap().last_mut() {
                    last.replied_at = Some(Instant::now());
                }
                Ok(frame)
            }
            Some(Reply::Fail(kind)) => Err(io::Error::new(kind, "mock transport failure")),
            Some(Reply::Silence) | None => std::future::pending().await,
        }
    }

    async fn renew(&self) -> io::Result<()> {
        self.shared.inbox.lock().unwrap().clear();
        *self.shared.renewals.lock().unwrap() += 1;
        Ok(())
    }
}
// }}}

// {{{ MockDevice
/// Register file answering read, write single and write multi requests.
#[derive(Clone, Default)]
pub struct MockDevice {
    registers: Arc<Mutex<BTreeMap<u16, u16>>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, register: u16, value: u16) {
        self.registers.lock().unwrap().insert(register, value);
    }

    pub fn set_bytes(&self, register: u16, bytes: &[u8]) {
        for (i, pair) in bytes.chunks(2).enumerate() {
            let value = u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]);
            self.set(register + i as u16, value);
        }
    }

    pub fn get(&self, register: u16) -> u16 {
        self.registers
            .lock()
            .unwrap()
            .get(&register)
            .copied()
            .unwrap_or(0)
    }

    pub fn bytes(&self, register: u16, count: u16) -> Vec<u8> {
        (register..register + count)
            .flat_map(|r| self.get(r).to_be_bytes())
            .collect()
    }

    fn answer(&self, request: &[u8]) -> Reply {
        let addr = request[0];
        let register = word(request, 2);
        match request[1] {
            0x03 => Reply::Frame(read_reply(addr, &self.bytes(register, word(request, 4)))),
            0x06 => {
                self.set(register, word(request, 4));
                Reply::Frame(request.to_vec())
            }
            0x10 => {
                let count = word(request, 4);
                self.set_bytes(register, &request[7..7 + count as usize * 2]);
                Reply::Frame(write_multi_reply(addr, register, count))
            }
            other => Reply::Frame(exception_reply(addr, other, 1)),
        }
    }
}
// }}}

// {{{ battery family
pub const WORK_MODE: u16 = 47000;
pub const ECO_MODE_1: u16 = 47547;
pub const BATTERY_DOD: u16 = 45356;
pub const OPTIONS_REGISTER: u16 = 45400;
const RUNTIME: (u16, u16) = (35100, 16);

const ALL_MODES: [OperationMode; 7] = [
    OperationMode::General,
    OperationMode::OffGrid,
    OperationMode::Backup,
    OperationMode::Eco,
    OperationMode::PeakShaving,
    OperationMode::EcoCharge,
    OperationMode::EcoDischarge,
];

/// Hybrid inverter with a battery and the 12 byte eco mode groups.
pub struct BatteryFamily;

impl Family for BatteryFamily {
    fn name(&self) -> &'static str {
        "battery"
    }

    fn default_comm_addr(&self) -> u8 {
        0xf7
    }

    fn runtime_data_registers(&self) -> (u16, u16) {
        RUNTIME
    }

    fn device_info_registers(&self) -> (u16, u16) {
        (35000, 4)
    }

    fn parse_device_info(&self, data: &[u8]) -> Result<DeviceInfo> {
        Ok(DeviceInfo {
            serial_number: goodwe_udp::family::decode_text(data),
            ..Default::default()
        })
    }

    fn registry(&self, _info: Option<&DeviceInfo>) -> Registry {
        use SensorKind::{Bat, Pv};

        let sensors = vec![
            Sensor::voltage("vpv1", 35103, "PV1 Voltage", Pv),
            Sensor::current("ipv1", 35104, "PV1 Current", Pv),
            Sensor::voltage("vpv2", 35107, "PV2 Voltage", Pv),
            Sensor::current("ipv2", 35108, "PV2 Current", Pv),
            Sensor::calculated(
                "ppv",
                vec![Input::integer(35105), Input::integer(35109)],
                sum,
                "PV Power",
                "W",
                Pv,
            ),
            Sensor::voltage("vbattery1", 35110, "Battery Voltage", Bat),
            Sensor::current("ibattery1", 35111, "Battery Current", Bat),
            Sensor::calculated(
                "pbattery1",
                vec![Input::voltage(35110), Input::current(35111)],
                product,
                "Battery Power",
                "W",
                Bat,
            ),
            Sensor::energy("e_bat_charge_day", 35112, "Today Battery Charge", Bat),
        ];
        let settings = vec![
            Sensor::integer("work_mode", WORK_MODE, "Work Mode", "", None),
            Sensor::eco_mode_v2("eco_mode_1", ECO_MODE_1, "Eco Mode Group 1"),
            Sensor::eco_mode_v2("eco_mode_2", ECO_MODE_1 + 6, "Eco Mode Group 2"),
            Sensor::eco_mode_v2("eco_mode_3", ECO_MODE_1 + 12, "Eco Mode Group 3"),
            Sensor::eco_mode_v2("eco_mode_4", ECO_MODE_1 + 18, "Eco Mode Group 4"),
            Sensor::integer("battery_discharge_depth", BATTERY_DOD, "DoD", "%", Bat),
            Sensor::byte_h("backup_priority", OPTIONS_REGISTER, "Backup Priority", "", None),
            Sensor::byte_l("cold_start", OPTIONS_REGISTER, "Cold Start", "", None),
        ];
        Registry::new(sensors, settings)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            batteries: true,
            operation_modes: &ALL_MODES,
        }
    }
}
// }}}

pub struct Factory;

impl Factory {
    pub fn timeout() -> Duration {
        Duration::from_millis(500)
    }

    pub fn engine(transport: &MockTransport, retries: u32) -> Engine {
        Engine::new(transport.boxed(), Self::timeout(), retries)
    }

    pub fn battery_inverter(transport: &MockTransport) -> Inverter {
        Inverter::new(transport.boxed(), Box::new(BatteryFamily), None, Self::timeout(), 3)
    }

    pub fn dt_inverter(transport: &MockTransport) -> Inverter {
        Inverter::new(
            transport.boxed(),
            goodwe_udp::family::FamilyName::Dt.build(),
            None,
            Self::timeout(),
            3,
        )
    }

    /// 40 register DT device info block.
    pub fn dt_device_info(serial: &str, model: &str) -> Vec<u8> {
        let mut data = vec![0u8; 80];
        data[6..6 + serial.len()].copy_from_slice(serial.as_bytes());
        let model = format!("{:<10}", model);
        data[22..32].copy_from_slice(&model.as_bytes()[..10]);
        data[66..68].copy_from_slice(&3u16.to_be_bytes());
        data[68..70].copy_from_slice(&4u16.to_be_bytes());
        data[70..72].copy_from_slice(&0x1au16.to_be_bytes());
        data
    }

    /// DT device with a plausible runtime data block.
    pub fn dt_device(serial: &str) -> MockDevice {
        let device = MockDevice::new();
        device.set_bytes(30001, &Self::dt_device_info(serial, "GW5K-DT"));

        // 2024-03-05 10:00:00
        device.set_bytes(30100, &[24, 3, 5, 10, 0, 0]);
        device.set(30103, 3000);
        device.set(30104, 52);
        device.set(30118, 2301);
        device.set(30121, 43);
        device.set(30124, 5000);
        device.set(30127, 7);
        device.set(30128, 1560);
        device.set(30129, 1);
        device.set(30141, 452);
        device.set(30144, 0xffff);
        device.set_bytes(30145, &12345i32.to_be_bytes());
        device.set(30149, 2);
        device
    }
}
