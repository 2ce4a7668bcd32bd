// src/io/transport.rs
//
// Byte transport underneath an slcan interface (normally a serial port).
//
// Writes are issued by the interface while it holds its transport lock. Received
// bytes flow the other way: once `start_rx` is called the transport pushes every
// chunk it reads into the given RxQueue from its own execution context.

use std::io;

use crate::io::slcan::RxQueue;

/// Narrow interface to the byte transport
pub trait Transport: Send {
    /// Human readable device name used in errors and logs
    fn device(&self) -> String;

    /// Write bytes, returning how many were accepted
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Push buffered output onto the wire
    fn flush(&mut self) -> io::Result<()>;

    /// Start delivering received chunks into `sink`
    fn start_rx(&mut self, sink: RxQueue) -> io::Result<()>;

    /// Stop delivering received chunks. Idempotent.
    fn stop_rx(&mut self);

    /// Write the whole buffer (one call per slcan command)
    fn write_all(&mut self, mut bytes: &[u8]) -> io::Result<()> {
        while !bytes.is_empty() {
            match self.write(bytes) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "transport accepted no bytes",
                    ))
                }
                Ok(n) => bytes = &bytes[n..],
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
