//! Serial fix emitter: formats position fixes as ASCII NMEA-style records and writes them
//! byte-by-byte to the fix serial port.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use usbl_core::{PositionFix, Queue, UsblError, UsblResult};

use crate::serial::SerialLink;

const MAX_WRITE_RETRIES: u32 = 5;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub struct FixEmitter {
    port: Box<dyn SerialLink>,
}

impl FixEmitter {
    pub fn new(port: Box<dyn SerialLink>) -> Self {
        Self { port }
    }

    /// `$USBL,,T,X,Y,Z,F,D*HH\r\n`: `T,X,Y,Z,F` as `%012.6f`, `D` as `%07.3f`, checksum
    /// the XOR of every byte strictly between `$` and `*`.
    pub fn format_record(fix: &PositionFix) -> String {
        let body = format!(
            "USBL,,{:012.6},{:012.6},{:012.6},{:012.6},{:012.6},{:07.3}",
            fix.time, fix.x, fix.y, fix.z, fix.tof, fix.doa
        );
        let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        format!("${body}*{checksum:02X}\r\n")
    }

    pub fn emit(&mut self, fix: &PositionFix) -> UsblResult<()> {
        let record = Self::format_record(fix);
        for byte in record.bytes() {
            self.write_byte_with_retry(byte)?;
        }
        Ok(())
    }

    fn write_byte_with_retry(&mut self, byte: u8) -> UsblResult<()> {
        let mut attempts = 0;
        loop {
            match self.port.write_all(&[byte]) {
                Ok(()) => return Ok(()),
                Err(e) if is_transient(&e) => {
                    attempts += 1;
                    if attempts >= MAX_WRITE_RETRIES {
                        return Err(UsblError::TransientIo(e.to_string()));
                    }
                    log::warn!("serial write retry {attempts}/{MAX_WRITE_RETRIES}: {e}");
                    std::thread::sleep(RETRY_BACKOFF);
                }
                Err(e) => return Err(UsblError::Io(e)),
            }
        }
    }

    /// Drain `queue` until `enabled` is cleared; per-fix failures are logged, not fatal.
    pub fn run(&mut self, queue: &Queue<PositionFix>, enabled: &AtomicBool) {
        while enabled.load(Ordering::Acquire) {
            let Some(fix) = queue.try_pop() else {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            };
            if let Err(err) = self.emit(&fix) {
                log::error!("fix emitter failed: {err}");
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::LoopbackSerialPort;

    #[test]
    fn format_record_has_expected_shape_and_checksum() {
        let fix = PositionFix::new(1.0, 0.2, 3.0);
        let record = FixEmitter::format_record(&fix);
        assert!(record.starts_with("$USBL,,"));
        assert!(record.ends_with("\r\n"));
        let star = record.find('*').unwrap();
        let body = &record[1..star];
        let expected_checksum: u8 = body.bytes().fold(0, |acc, b| acc ^ b);
        let checksum_str = &record[star + 1..star + 3];
        assert_eq!(checksum_str, format!("{expected_checksum:02X}"));
    }

    #[test]
    fn emit_writes_every_byte_of_the_record() {
        let port = Box::new(LoopbackSerialPort::new());
        let mut emitter = FixEmitter::new(port);
        let fix = PositionFix::new(123.456, 0.012, 45.6);
        assert!(emitter.emit(&fix).is_ok());
    }

    #[test]
    fn transient_write_failure_is_retried() {
        let mut port = LoopbackSerialPort::new();
        port.transient_failures_remaining = 1;
        let mut emitter = FixEmitter::new(Box::new(port));
        let fix = PositionFix::new(123.456, 0.012, 45.6);
        assert!(emitter.emit(&fix).is_ok());
    }

    #[test]
    fn fourth_transient_failure_still_succeeds_within_five_attempts() {
        let mut port = LoopbackSerialPort::new();
        port.transient_failures_remaining = 4;
        let mut emitter = FixEmitter::new(Box::new(port));
        let fix = PositionFix::new(123.456, 0.012, 45.6);
        assert!(emitter.emit(&fix).is_ok());
    }

    #[test]
    fn fifth_consecutive_transient_failure_exhausts_retries() {
        let mut port = LoopbackSerialPort::new();
        port.transient_failures_remaining = 5;
        let mut emitter = FixEmitter::new(Box::new(port));
        let fix = PositionFix::new(123.456, 0.012, 45.6);
        let err = emitter.emit(&fix).unwrap_err();
        assert!(matches!(err, UsblError::TransientIo(_)));
    }
}
