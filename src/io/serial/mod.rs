// src/io/serial/mod.rs
//
// Serial port transport for slcan adapters.

mod port;
pub(crate) mod utils;

pub use port::{list_ports, SerialPortInfo, SerialPortTransport};
pub use utils::Parity;
