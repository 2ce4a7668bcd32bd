// src/io/error.rs
//
// Error type shared by the SLCAN codec, the interface and the transports.
//
// Transport failures (Connection/Read/Write) are surfaced to callers of
// open/send. Protocol, LineOverflow and RxOverrun stay on the receive path: the
// offending line or bytes are dropped and only the statistics counters see them.

use std::fmt;

/// IO error with the device it came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IoError {
    /// Could not open or talk to the device at all
    Connection { device: String, message: String },
    /// Reading from the transport failed
    Read { device: String, message: String },
    /// Writing to the transport failed
    Write { device: String, message: String },
    /// A received line is not a valid frame
    Protocol { device: String, message: String },
    /// A line grew past the accumulator capacity and was abandoned
    LineOverflow { device: String, limit: usize },
    /// The receive ring buffer was full; `dropped` bytes were discarded
    RxOverrun { device: String, dropped: usize },
    /// Invalid configuration
    Configuration { message: String },
}

impl IoError {
    pub fn connection(device: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Connection {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn read(device: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Read {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn write(device: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Write {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn protocol(device: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Protocol {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn line_overflow(device: impl Into<String>, limit: usize) -> Self {
        IoError::LineOverflow {
            device: device.into(),
            limit,
        }
    }

    pub fn rx_overrun(device: impl Into<String>, dropped: usize) -> Self {
        IoError::RxOverrun {
            device: device.into(),
            dropped,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        IoError::Configuration {
            message: message.into(),
        }
    }

    /// True for errors raised by the transport itself (as opposed to bad data on the wire)
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            IoError::Connection { .. } | IoError::Read { .. }
                | IoError::Write { .. }
        )
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::Connection { device, message } => {
                write!(f, "{}: connection failed: {}", device, message)
            }
            IoError::Read { device, message } => write!(f, "{}: read error: {}", device, message),
            IoError::Write { device, message } => {
                write!(f, "{}: write error: {}", device, message)
            }
            IoError::Protocol { device, message } => {
                write!(f, "{}: protocol error: {}", device, message)
            }
            IoError::LineOverflow { device, limit } => {
                write!(f, "{}: line exceeded {} bytes and was discarded", device, limit)
            }
            IoError::RxOverrun { device, dropped } => {
                write!(f, "{}: receive buffer full, dropped {} bytes", device, dropped)
            }
            IoError::Configuration { message } => write!(f, "configuration error: {}", message),
        }
    }
}

impl std::error::Error for IoError {}

impl From<IoError> for String {
    fn from(e: IoError) -> Self {
        e.to_string()
    }
}
