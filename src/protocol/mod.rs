pub mod command;
pub mod engine;
pub mod frame;
pub mod response;
pub mod transport;

pub use command::{Expectation, ProtocolCommand};
pub use engine::Engine;
pub use frame::{ExceptionCode, FunctionCode, Rejection};
pub use response::ProtocolResponse;
pub use transport::{Transport, UdpTransport};
