// src/lib.rs
//
// slcan-link: driver for CAN adapters speaking the Lawicel/slcan ASCII protocol
// over a serial line.

#[macro_use]
pub mod logging;

pub mod io;
pub mod settings;

pub use io::{
    FrameMessage, IOCapabilities, IOState, InterfaceStats, IoError, SlcanConfig, SlcanInterface,
    SourceMessage, TransmitRequest, TransmitResult, Transport,
};
pub use settings::Settings;
