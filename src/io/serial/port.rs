// src/io/serial/port.rs
//
// serialport-backed transport for slcan adapters.
//
// Writes go straight to the port. Receiving happens on a dedicated thread that
// reads from a cloned handle (short timeout so the stop flag is noticed) and
// pushes every chunk into the interface's RxQueue.

use serde::Serialize;
use std::io::{self, Read, Write};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serialport::{ClearBuffer, FlowControl, SerialPort};

use crate::io::error::IoError;
use crate::io::slcan::{RxQueue, SlcanConfig};
use crate::io::transport::Transport;

use super::utils::{
    parity_str_to_serialport, to_serialport_data_bits, to_serialport_stop_bits, Parity,
};

/// Read timeout of the receive thread, bounds how long `stop_rx` waits
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Serial port info for listing
#[derive(Clone, Debug, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

/// Byte transport over a local serial port
pub struct SerialPortTransport {
    device: String,
    port: Box<dyn SerialPort>,
    rx_stop: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
}

impl SerialPortTransport {
    /// Open the port named in `config` (8N1 unless configured otherwise, no
    /// flow control) and discard anything already buffered.
    pub fn open(config: &SlcanConfig) -> Result<Self, IoError> {
        let device = config.device_name();

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(to_serialport_data_bits(config.data_bits))
            .stop_bits(to_serialport_stop_bits(config.stop_bits))
            .parity(parity_str_to_serialport(&config.parity))
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| IoError::connection(&device, e.to_string()))?;

        if let Err(e) = port.clear(ClearBuffer::All) {
            tlog!("[serial] {}: could not clear buffers: {}", device, e);
        }

        tlog!(
            "[serial] Opened {} at {} baud ({}-{}-{})",
            config.port,
            config.baud_rate,
            config.data_bits,
            config.parity.parse::<Parity>().unwrap_or_default().letter(),
            config.stop_bits
        );

        Ok(Self {
            device,
            port,
            rx_stop: Arc::new(AtomicBool::new(false)),
            rx_thread: None,
        })
    }
}

impl Transport for SerialPortTransport {
    fn device(&self) -> String {
        self.device.clone()
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.port.write(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn start_rx(&mut self, sink: RxQueue) -> io::Result<()> {
        self.stop_rx();

        let mut reader = self.port.try_clone().map_err(io::Error::from)?;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();
        let device = self.device.clone();

        let handle = thread::Builder::new()
            .name(format!("{}-rx", device))
            .spawn(move || {
                let mut buf = [0u8; 256];
                while !stop_clone.load(Ordering::SeqCst) {
                    match reader.read(&mut buf) {
                        Ok(0) => thread::sleep(Duration::from_millis(10)),
                        Ok(n) => {
                            if let Err(e) = sink.push(&buf[..n]) {
                                tlog!("[serial] {}", e);
                            }
                        }
                        Err(ref e)
                            if e.kind() == io::ErrorKind::TimedOut
                                || e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            let err = IoError::read(&device, e.to_string());
                            tlog!("[serial] {}", err);
                            sink.fail(err);
                            break;
                        }
                    }
                }
            })?;

        self.rx_stop = stop;
        self.rx_thread = Some(handle);
        Ok(())
    }

    fn stop_rx(&mut self) {
        self.rx_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.rx_thread.take() {
            if handle.join().is_err() {
                tlog!("[serial] {}: receive thread panicked", self.device);
            }
        }
    }
}

impl Drop for SerialPortTransport {
    fn drop(&mut self) {
        self.stop_rx();
    }
}

/// List available serial ports
///
/// On macOS, filters out /dev/tty.* devices and only shows /dev/cu.* devices.
/// The cu (calling unit) devices are non-blocking and preferred for outgoing connections.
pub fn list_ports() -> Result<Vec<SerialPortInfo>, IoError> {
    let ports = serialport::available_ports()
        .map_err(|e| IoError::configuration(format!("failed to enumerate ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    "USB",
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::BluetoothPort => {
                    ("Bluetooth", None, None, None, None, None)
                }
                serialport::SerialPortType::PciPort => ("PCI", None, None, None, None, None),
                serialport::SerialPortType::Unknown => ("Unknown", None, None, None, None, None),
            };
            SerialPortInfo {
                port_name: p.port_name,
                port_type: port_type.to_string(),
                manufacturer,
                product,
                serial_number,
                vid,
                pid,
            }
        })
        .collect())
}
