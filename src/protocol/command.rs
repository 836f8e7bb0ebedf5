use crate::prelude::*;

use bytes::Bytes;
use std::sync::Arc;

use super::frame::{self, FunctionCode, Rejection};
use super::response::ProtocolResponse;

pub type Validator = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// What a reply has to look like to be accepted for a given request.
#[derive(Clone)]
pub enum Expectation {
    Read {
        comm_addr: u8,
        register: u16,
        count: u16,
    },
    WriteSingle {
        comm_addr: u8,
        register: u16,
        value: u16,
    },
    WriteMulti {
        comm_addr: u8,
        register: u16,
        count: u16,
    },
    /// Any datagram is accepted as the reply.
    Any,
    Custom(Validator),
}

impl Expectation {
    pub fn custom(validator: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(validator))
    }
}

impl std::fmt::Debug for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read {
                comm_addr,
                register,
                count,
            } => write!(f, "Read({:#04x}, {}, {})", comm_addr, register, count),
            Self::WriteSingle {
                comm_addr,
                register,
                value,
            } => write!(f, "WriteSingle({:#04x}, {}, {})", comm_addr, register, value),
            Self::WriteMulti {
                comm_addr,
                register,
                count,
            } => write!(f, "WriteMulti({:#04x}, {}, {})", comm_addr, register, count),
            Self::Any => write!(f, "Any"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// An outbound frame together with the rule its reply must satisfy.
#[derive(Clone, Debug)]
pub struct ProtocolCommand {
    request: Bytes,
    expectation: Expectation,
}

impl ProtocolCommand {
    pub fn read(comm_addr: u8, register: u16, count: u16) -> Result<Self> {
        Ok(Self {
            request: frame::read_request(comm_addr, register, count)?.into(),
            expectation: Expectation::Read {
                comm_addr,
                register,
                count,
            },
        })
    }

    pub fn write(comm_addr: u8, register: u16, value: u16) -> Self {
        Self {
            request: frame::write_single_request(comm_addr, register, value).into(),
            expectation: Expectation::WriteSingle {
                comm_addr,
                register,
                value,
            },
        }
    }

    pub fn write_multi(comm_addr: u8, register: u16, payload: &[u8]) -> Result<Self> {
        Ok(Self {
            request: frame::write_multi_request(comm_addr, register, payload)?.into(),
            expectation: Expectation::WriteMulti {
                comm_addr,
                register,
                count: (payload.len() / 2) as u16,
            },
        })
    }

    /// A caller-built frame, sent verbatim.
    pub fn raw(request: impl Into<Bytes>, expectation: Expectation) -> Self {
        Self {
            request: request.into(),
            expectation,
        }
    }

    pub fn request(&self) -> &[u8] {
        &self.request
    }

    pub fn expectation(&self) -> &Expectation {
        &self.expectation
    }

    /// First register covered by the reply payload, for read commands only.
    pub fn first_register(&self) -> Option<u16> {
        match self.expectation {
            Expectation::Read { register, .. } => Some(register),
            _ => None,
        }
    }

    pub fn check(&self, response: &[u8]) -> Result<(), Rejection> {
        match &self.expectation {
            Expectation::Read {
                comm_addr, count, ..
            } => frame::check_read_response(response, *comm_addr, *count).map(|_| ()),
            Expectation::WriteSingle {
                comm_addr,
                register,
                value,
            } => frame::check_write_response(
                response,
                *comm_addr,
                FunctionCode::WriteSingle,
                *register,
                *value,
            )
            .map(|_| ()),
            Expectation::WriteMulti {
                comm_addr,
                register,
                count,
            } => frame::check_write_response(
                response,
                *comm_addr,
                FunctionCode::WriteMulti,
                *register,
                *count,
            )
            .map(|_| ()),
            Expectation::Any => Ok(()),
            Expectation::Custom(validator) => {
                if validator(response) {
                    Ok(())
                } else {
                    Err(Rejection::Custom)
                }
            }
        }
    }

    pub fn validate(&self, response: &[u8]) -> bool {
        self.check(response).is_ok()
    }

    /// Wraps an accepted reply. Read replies are reduced to their register
    /// payload; every other reply is kept whole.
    pub fn response(&self, frame: Vec<u8>) -> ProtocolResponse {
        let data = match self.expectation {
            Expectation::Read { .. } if frame.len() >= 5 => {
                let end = frame.len() - 2;
                Bytes::from(frame).slice(3..end)
            }
            _ => Bytes::from(frame),
        };
        ProtocolResponse::new(data, Some(self.clone()))
    }
}
