use std::io;

/// Errors raised by the protocol engine, the codecs and the device session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // transport: surfaced only after the retry loop gave up
    #[error("no valid response received even after {attempts} retries")]
    MaxRetries {
        attempts: u32,
        consecutive_failures: u32,
    },
    #[error("request failed: {source}")]
    RequestFailed {
        #[source]
        source: io::Error,
        consecutive_failures: u32,
    },

    // decoding / encoding
    #[error("{sensor}: {field} value {value} out of range")]
    OutOfRange {
        sensor: String,
        field: &'static str,
        value: String,
    },
    #[error("read of {wanted} bytes at position {position} exceeds response length {length}")]
    ShortRead {
        wanted: usize,
        position: usize,
        length: usize,
    },
    #[error("offset {offset} lies outside the response")]
    OffsetOutOfBounds { offset: u16 },
    #[error("{sensor}: invalid value {value}")]
    InvalidValue { sensor: String, value: String },
    #[error("{0}: value cannot be encoded")]
    NotWritable(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    // caller errors, no I/O performed
    #[error("unknown sensor \"{0}\"")]
    UnknownSensor(String),
    #[error("unknown setting \"{0}\"")]
    UnknownSetting(String),
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Number of back-to-back failed executions on the device, for the
    /// transport-level failures that carry it.
    pub fn consecutive_failures(&self) -> Option<u32> {
        match self {
            Self::MaxRetries {
                consecutive_failures,
                ..
            }
            | Self::RequestFailed {
                consecutive_failures,
                ..
            } => Some(*consecutive_failures),
            _ => None,
        }
    }

    /// True when the error came from the wire rather than from decoding or
    /// from the caller.
    pub fn is_transport(&self) -> bool {
        self.consecutive_failures().is_some()
    }

    pub(crate) fn out_of_range(sensor: &str, field: &'static str, value: impl ToString) -> Self {
        Self::OutOfRange {
            sensor: sensor.to_string(),
            field,
            value: value.to_string(),
        }
    }

    pub(crate) fn invalid_value(sensor: &str, value: impl std::fmt::Debug) -> Self {
        Self::InvalidValue {
            sensor: sensor.to_string(),
            value: format!("{:?}", value),
        }
    }
}

/// Creates an anyhow error with the current file and line number
#[macro_export]
macro_rules! file_error {
    ($($arg:tt)*) => {
        anyhow::anyhow!(
            "[{}:{}] {}",
            std::path::Path::new(file!())
                .file_name()
                .map(|f| f.to_string_lossy())
                .unwrap_or_default(),
            line!(),
            format!($($arg)*)
        )
    };
}
