//! Minimal serial port abstraction shared by the AGC worker and the fix emitter, so both can
//! run against a loopback test double instead of a real `/dev/tty*`.

use std::io;
use std::time::Duration;

/// Read/write/flush surface both serial consumers need. Implemented for a real
/// `serialport::SerialPort` and for [`LoopbackSerialPort`] in tests.
pub trait SerialLink: Send {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

/// Wraps a real `serialport::SerialPort` trait object.
pub struct SerialPortLink(Box<dyn serialport::SerialPort>);

impl SerialPortLink {
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> io::Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(Self(port))
    }
}

impl SerialLink for SerialPortLink {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.0, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.0)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        io::Read::read_exact(&mut self.0, buf)
    }
}

/// A test double that echoes every byte written back out, optionally mangling the echo or
/// injecting transient errors to exercise the retry/mismatch paths of the AGC worker and fix
/// emitter.
#[derive(Default)]
pub struct LoopbackSerialPort {
    pending_echo: std::collections::VecDeque<u8>,
    pub mangle_echo: bool,
    pub transient_failures_remaining: usize,
}

impl LoopbackSerialPort {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SerialLink for LoopbackSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.transient_failures_remaining > 0 {
            self.transient_failures_remaining -= 1;
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        for &byte in buf {
            let echoed = if self.mangle_echo { byte ^ 0xFF } else { byte };
            self.pending_echo.push_back(echoed);
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if self.pending_echo.len() < buf.len() {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }
        for slot in buf.iter_mut() {
            *slot = self.pending_echo.pop_front().unwrap();
        }
        Ok(())
    }
}
