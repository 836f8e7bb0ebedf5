use crate::prelude::*;

use bytes::{BufMut, BytesMut};
use nom::{
    bytes::complete::take,
    number::complete::{be_u16, be_u8},
    IResult,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Largest register count a single read may ask for.
pub const MAX_READ_REGISTERS: u16 = 125;
/// Largest register count a single multi-register write may carry.
pub const MAX_WRITE_REGISTERS: u16 = 123;

const EXCEPTION_FLAG: u8 = 0x80;

// {{{ FunctionCode
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    ReadHolding = 0x03,
    WriteSingle = 0x06,
    WriteMulti = 0x10,
}
// }}}

// {{{ ExceptionCode
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 1,
    IllegalDataAddress = 2,
    IllegalDataValue = 3,
    DeviceFailure = 4,
    Acknowledge = 5,
    DeviceBusy = 6,
}
// }}}

/// Why a received datagram was not accepted as the answer to a request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Rejection {
    Truncated(usize),
    Checksum { expected: [u8; 2], got: [u8; 2] },
    Address { expected: u8, got: u8 },
    Function { expected: u8, got: u8 },
    Exception { function: u8, code: u8 },
    Echo { field: &'static str, expected: u16, got: u16 },
    Length { expected: usize, got: usize },
    Custom,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated(len) => write!(f, "frame too short ({} bytes)", len),
            Self::Checksum { expected, got } => {
                write!(f, "checksum mismatch - got {:02x?}, expected {:02x?}", got, expected)
            }
            Self::Address { expected, got } => {
                write!(f, "address mismatch - got {:#04x}, expected {:#04x}", got, expected)
            }
            Self::Function { expected, got } => {
                write!(f, "function code mismatch - got {:#04x}, expected {:#04x}", got, expected)
            }
            Self::Exception { function, code } => match ExceptionCode::try_from(*code) {
                Ok(exception) => write!(f, "device exception {:?} for function {:#04x}", exception, function),
                Err(_) => write!(f, "device exception {} for function {:#04x}", code, function),
            },
            Self::Echo {
                field,
                expected,
                got,
            } => write!(f, "{} echo mismatch - got {}, expected {}", field, got, expected),
            Self::Length { expected, got } => {
                write!(f, "length mismatch - got {} bytes, expected {}", got, expected)
            }
            Self::Custom => write!(f, "rejected by command validator"),
        }
    }
}

pub fn checksum(data: &[u8]) -> [u8; 2] {
    crc16::State::<crc16::MODBUS>::calculate(data).to_le_bytes()
}

fn finish(mut frame: BytesMut) -> Vec<u8> {
    let crc = checksum(&frame);
    frame.put_slice(&crc);
    frame.to_vec()
}

pub fn read_request(comm_addr: u8, register: u16, count: u16) -> Result<Vec<u8>> {
    if count == 0 || count > MAX_READ_REGISTERS {
        return Err(Error::InvalidFrame(format!(
            "cannot read {} registers, allowed range is 1..={}",
            count, MAX_READ_REGISTERS
        )));
    }

    let mut frame = BytesMut::with_capacity(8);
    frame.put_u8(comm_addr);
    frame.put_u8(FunctionCode::ReadHolding.into());
    frame.put_u16(register);
    frame.put_u16(count);
    Ok(finish(frame))
}

pub fn write_single_request(comm_addr: u8, register: u16, value: u16) -> Vec<u8> {
    let mut frame = BytesMut::with_capacity(8);
    frame.put_u8(comm_addr);
    frame.put_u8(FunctionCode::WriteSingle.into());
    frame.put_u16(register);
    frame.put_u16(value);
    finish(frame)
}

pub fn write_multi_request(comm_addr: u8, register: u16, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.is_empty() || payload.len() % 2 != 0 {
        return Err(Error::InvalidFrame(format!(
            "write payload must be a non-empty whole number of registers, got {} bytes",
            payload.len()
        )));
    }
    let count = (payload.len() / 2) as u16;
    if count > MAX_WRITE_REGISTERS {
        return Err(Error::InvalidFrame(format!(
            "cannot write {} registers, allowed range is 1..={}",
            count, MAX_WRITE_REGISTERS
        )));
    }

    let mut frame = BytesMut::with_capacity(9 + payload.len());
    frame.put_u8(comm_addr);
    frame.put_u8(FunctionCode::WriteMulti.into());
    frame.put_u16(register);
    frame.put_u16(count);
    frame.put_u8(payload.len() as u8);
    frame.put_slice(payload);
    Ok(finish(frame))
}

/// Splits a frame into its body and trailing checksum, verifying the latter.
fn verify_checksum(frame: &[u8]) -> Result<&[u8], Rejection> {
    if frame.len() < 4 {
        return Err(Rejection::Truncated(frame.len()));
    }
    let (body, crc) = frame.split_at(frame.len() - 2);
    let expected = checksum(body);
    if crc != expected {
        return Err(Rejection::Checksum {
            expected,
            got: [crc[0], crc[1]],
        });
    }
    Ok(body)
}

fn parse_header(input: &[u8]) -> IResult<&[u8], (u8, u8)> {
    let (input, addr) = be_u8(input)?;
    let (input, function) = be_u8(input)?;
    Ok((input, (addr, function)))
}

fn parse_read_body(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, byte_count) = be_u8(input)?;
    take(byte_count)(input)
}

fn parse_write_echo(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
    let (input, register) = be_u16(input)?;
    let (input, value) = be_u16(input)?;
    Ok((input, (register, value)))
}

/// Checks address, function code, checksum and the device exception flag,
/// answering the frame body after the two header bytes.
fn check_envelope(frame: &[u8], comm_addr: u8, function: FunctionCode) -> Result<&[u8], Rejection> {
    let body = verify_checksum(frame)?;
    let (rest, (addr, got)) = parse_header(body).map_err(|_| Rejection::Truncated(frame.len()))?;

    let expected: u8 = function.into();
    if got == expected | EXCEPTION_FLAG {
        return Err(Rejection::Exception {
            function: expected,
            code: rest.first().copied().unwrap_or_default(),
        });
    }
    if got != expected {
        return Err(Rejection::Function { expected, got });
    }
    if addr != comm_addr {
        return Err(Rejection::Address {
            expected: comm_addr,
            got: addr,
        });
    }
    Ok(rest)
}

/// Validates a read-holding-registers response, answering its register payload.
pub fn check_read_response(frame: &[u8], comm_addr: u8, count: u16) -> Result<&[u8], Rejection> {
    let rest = check_envelope(frame, comm_addr, FunctionCode::ReadHolding)?;
    let expected = count as usize * 2;
    match parse_read_body(rest) {
        Ok((trailing, payload)) if trailing.is_empty() && payload.len() == expected => Ok(payload),
        Ok((trailing, payload)) => Err(Rejection::Length {
            expected,
            got: payload.len() + trailing.len(),
        }),
        Err(_) => Err(Rejection::Length {
            expected,
            got: rest.len().saturating_sub(1),
        }),
    }
}

/// Validates the echo of a single or multi register write, answering the
/// echoed register/value bytes.
pub fn check_write_response(
    frame: &[u8],
    comm_addr: u8,
    function: FunctionCode,
    register: u16,
    value: u16,
) -> Result<&[u8], Rejection> {
    let rest = check_envelope(frame, comm_addr, function)?;
    let field = match function {
        FunctionCode::WriteMulti => "register count",
        _ => "value",
    };
    match parse_write_echo(rest) {
        Ok((trailing, _)) if !trailing.is_empty() => Err(Rejection::Length {
            expected: 4,
            got: rest.len(),
        }),
        Ok((_, (got, _))) if got != register => Err(Rejection::Echo {
            field: "register",
            expected: register,
            got,
        }),
        Ok((_, (_, got))) if got != value => Err(Rejection::Echo {
            field,
            expected: value,
            got,
        }),
        Ok(_) => Ok(rest),
        Err(_) => Err(Rejection::Length {
            expected: 4,
            got: rest.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // captured from a DT inverter: 2 registers at 0x7594
    fn read_reply() -> Vec<u8> {
        let mut frame = vec![0x7f, 0x03, 0x04, 0x18, 0x03, 0x05, 0x0a];
        let crc = checksum(&frame);
        frame.extend_from_slice(&crc);
        frame
    }

    #[test]
    fn builds_read_request() {
        assert_eq!(
            read_request(0x7f, 0x7594, 0x0049).unwrap(),
            vec![0x7f, 0x03, 0x75, 0x94, 0x00, 0x49, 0xd5, 0xc2]
        );
    }

    #[test]
    fn checksum_is_modbus_crc_low_byte_first() {
        // well-known "read 1 register at 0 from unit 1" frame
        assert_eq!(checksum(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), [0x84, 0x0a]);
    }

    #[test]
    fn rejects_out_of_range_read_count() {
        assert!(read_request(0x7f, 0, 0).is_err());
        assert!(read_request(0x7f, 0, MAX_READ_REGISTERS + 1).is_err());
    }

    #[test]
    fn builds_write_single_request() {
        let frame = write_single_request(0x7f, 40328, 0x1234);
        assert_eq!(&frame[..6], &[0x7f, 0x06, 0x9d, 0x88, 0x12, 0x34]);
        assert_eq!(&frame[6..], &checksum(&frame[..6]));
    }

    #[test]
    fn builds_write_multi_request() {
        let frame = write_multi_request(0x7f, 40313, &[24, 3, 5, 10, 0, 0]).unwrap();
        assert_eq!(
            &frame[..13],
            &[0x7f, 0x10, 0x9d, 0x79, 0x00, 0x03, 0x06, 24, 3, 5, 10, 0, 0]
        );
        assert_eq!(frame.len(), 15);
        assert!(write_multi_request(0x7f, 40313, &[1, 2, 3]).is_err());
        assert!(write_multi_request(0x7f, 40313, &[]).is_err());
    }

    #[test]
    fn accepts_valid_read_response() {
        let frame = read_reply();
        assert_eq!(
            check_read_response(&frame, 0x7f, 2),
            Ok(&[0x18, 0x03, 0x05, 0x0a][..])
        );
    }

    #[test]
    fn any_single_byte_mutation_is_rejected() {
        let frame = read_reply();
        for i in 0..frame.len() {
            for delta in [0x01u8, 0x80, 0xff] {
                let mut corrupt = frame.clone();
                corrupt[i] ^= delta;
                assert!(
                    check_read_response(&corrupt, 0x7f, 2).is_err(),
                    "mutation of byte {} by {:#04x} accepted",
                    i,
                    delta
                );
            }
        }
    }

    #[test]
    fn rejects_address_and_function_mismatch() {
        let frame = read_reply();
        assert_eq!(
            check_read_response(&frame, 0xf7, 2),
            Err(Rejection::Address {
                expected: 0xf7,
                got: 0x7f
            })
        );

        let mut other = vec![0x7f, 0x06, 0x00, 0x01, 0x00, 0x02];
        let crc = checksum(&other);
        other.extend_from_slice(&crc);
        assert_eq!(
            check_read_response(&other, 0x7f, 2),
            Err(Rejection::Function {
                expected: 0x03,
                got: 0x06
            })
        );
    }

    #[test]
    fn rejects_wrong_payload_length() {
        let frame = read_reply();
        assert_eq!(
            check_read_response(&frame, 0x7f, 3),
            Err(Rejection::Length {
                expected: 6,
                got: 4
            })
        );
    }

    #[test]
    fn recognises_device_exception() {
        let mut frame = vec![0x7f, 0x83, 0x02];
        let crc = checksum(&frame);
        frame.extend_from_slice(&crc);
        let rejection = check_read_response(&frame, 0x7f, 2).unwrap_err();
        assert_eq!(
            rejection,
            Rejection::Exception {
                function: 0x03,
                code: 0x02
            }
        );
        assert_eq!(
            rejection.to_string(),
            "device exception IllegalDataAddress for function 0x03"
        );
    }

    #[test]
    fn write_single_response_is_an_echo() {
        let request = write_single_request(0x7f, 40327, 1);
        assert!(check_write_response(&request, 0x7f, FunctionCode::WriteSingle, 40327, 1).is_ok());
        assert_eq!(
            check_write_response(&request, 0x7f, FunctionCode::WriteSingle, 40327, 0),
            Err(Rejection::Echo {
                field: "value",
                expected: 0,
                got: 1
            })
        );
    }

    #[test]
    fn write_multi_response_echoes_register_and_count() {
        let mut frame = vec![0x7f, 0x10, 0x9d, 0x79, 0x00, 0x03];
        let crc = checksum(&frame);
        frame.extend_from_slice(&crc);
        assert!(check_write_response(&frame, 0x7f, FunctionCode::WriteMulti, 40313, 3).is_ok());
        assert!(check_write_response(&frame, 0x7f, FunctionCode::WriteMulti, 40314, 3).is_err());
    }
}
