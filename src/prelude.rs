pub use log::{debug, error, info, trace, warn};

pub use crate::error::{Error, Result};
pub use crate::family::{Capabilities, DeviceInfo, Family, Registry};
pub use crate::inverter::{Inverter, OperationMode};
pub use crate::protocol::{Engine, Expectation, ProtocolCommand, ProtocolResponse, Transport};
pub use crate::sensor::{Sensor, SensorKind, Value};
