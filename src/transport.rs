//! Byte-level transports: one endpoint pair, no framing knowledge.

use crate::error::TransportError;
use crate::usb::UsbDevice;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Send/receive raw byte buffers to one endpoint pair (USB bulk in/out or
/// TCP). The only suspension points in the whole protocol are calls here.
pub trait Transport {
    fn send(&mut self, buf: &[u8]) -> Result<(), TransportError>;
    /// Reads exactly `buf.len()` bytes.
    fn recv(&mut self, buf: &mut [u8]) -> Result<(), TransportError>;
    fn set_timeout(&mut self, timeout: Duration);
}

pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(10)))?;
        stream.set_write_timeout(Some(Duration::from_secs(10)))?;
        log::debug!("transport: tcp connected to {:?}", stream.peer_addr().ok());
        Ok(Self { stream })
    }
}

fn classify_io(err: std::io::Error) -> TransportError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => TransportError::Timeout,
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::UnexpectedEof => TransportError::Disconnected,
        _ => TransportError::Io(err),
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(buf).map_err(classify_io)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        self.stream.read_exact(buf).map_err(classify_io)
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.stream.set_read_timeout(Some(timeout)).ok();
    }
}

pub struct UsbTransport {
    device: UsbDevice,
    timeout: Duration,
}

impl UsbTransport {
    pub fn connect(serial: Option<&str>) -> Result<Self, TransportError> {
        let device = UsbDevice::open(serial).map_err(usb_to_transport)?;
        log::debug!("transport: usb connected to {:?}", device.serial());
        Ok(Self {
            device,
            timeout: Duration::from_secs(10),
        })
    }
}

fn usb_to_transport(err: crate::error::AdbError) -> TransportError {
    match err {
        crate::error::AdbError::Timeout => TransportError::Timeout,
        crate::error::AdbError::Io(e) => TransportError::Io(e),
        other => TransportError::Io(std::io::Error::other(other.to_string())),
    }
}

impl Transport for UsbTransport {
    fn send(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let n = self.device.send(buf, self.timeout).map_err(usb_to_transport)?;
        if n != buf.len() {
            return Err(TransportError::Io(std::io::Error::other(format!(
                "short USB write: sent {n} of {} bytes",
                buf.len()
            ))));
        }
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .device
                .recv(&mut buf[filled..], self.timeout)
                .map_err(usb_to_transport)?;
            if n == 0 {
                return Err(TransportError::Disconnected);
            }
            filled += n;
        }
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}
