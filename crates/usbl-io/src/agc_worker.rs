//! AGC worker: drains gain-voltage targets and drives the external amplifier's DAC over a
//! serial loopback-verified command protocol.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use usbl_core::{Queue, UsblError, UsblResult};

use crate::serial::SerialLink;

/// Five-byte DAC command: `5A 01 II DD A5`.
pub fn format_dac_command(gain: f64) -> [u8; 5] {
    let clamped = gain.clamp(0.0, 99.0);
    let int_part = clamped.trunc() as u8;
    let frac_hundredths = ((clamped.fract() * 100.0).floor() as u32).min(99) as u8;
    [0x5A, 0x01, int_part, frac_hundredths, 0xA5]
}

fn to_upper_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

pub struct AgcWorker {
    port: Box<dyn SerialLink>,
    gain_min: f64,
    gain_max: f64,
    initial_gain: f64,
}

impl AgcWorker {
    pub fn new(port: Box<dyn SerialLink>, gain_min: f64, gain_max: f64, initial_gain: f64) -> Self {
        Self {
            port,
            gain_min,
            gain_max,
            initial_gain,
        }
    }

    /// Format, send, and loopback-verify the command for one gain target. Failures are returned
    /// to the caller for logging; they never terminate the run loop.
    pub fn process_one(&mut self, gain_target: f64) -> UsblResult<()> {
        let effective = if gain_target >= self.gain_min && gain_target <= self.gain_max {
            gain_target
        } else {
            self.initial_gain
        };
        let command = format_dac_command(effective);

        self.port.write_all(&command)?;
        self.port.flush()?;
        std::thread::sleep(Duration::from_millis(10));

        let mut echo = [0u8; 5];
        self.port.read_exact(&mut echo)?;

        if to_upper_hex(&command) != to_upper_hex(&echo) {
            return Err(UsblError::ProtocolMismatch);
        }
        Ok(())
    }

    /// Drain `queue` until `enabled` is cleared. Per-iteration failures are logged and do not
    /// stop the loop, matching the persistence and TCP workers' shutdown convention.
    pub fn run(&mut self, queue: &Queue<f64>, enabled: &AtomicBool) {
        while enabled.load(Ordering::Acquire) {
            let Some(gain) = queue.try_pop() else {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            };
            if let Err(err) = self.process_one(gain) {
                log::warn!("AGC command failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::LoopbackSerialPort;

    #[test]
    fn dac_command_encodes_integer_and_fractional_parts() {
        let cmd = format_dac_command(2.5);
        assert_eq!(cmd, [0x5A, 0x01, 0x02, 0x32, 0xA5]);
    }

    #[test]
    fn dac_command_clamps_fractional_hundredths_to_99() {
        let cmd = format_dac_command(1.999);
        assert_eq!(cmd[3], 99);
    }

    #[test]
    fn agc_loopback_round_trip_succeeds() {
        let port = Box::new(LoopbackSerialPort::new());
        let mut worker = AgcWorker::new(port, 0.0, 3.3, 1.0);
        assert!(worker.process_one(1.5).is_ok());
    }

    #[test]
    fn mismatched_echo_reports_protocol_mismatch() {
        let mut port = LoopbackSerialPort::new();
        port.mangle_echo = true;
        let mut worker = AgcWorker::new(Box::new(port), 0.0, 3.3, 1.0);
        let err = worker.process_one(1.5).unwrap_err();
        assert!(matches!(err, UsblError::ProtocolMismatch));
    }

    #[test]
    fn out_of_range_gain_falls_back_to_initial_gain() {
        let port = Box::new(LoopbackSerialPort::new());
        let mut worker = AgcWorker::new(port, 0.0, 3.3, 1.0);
        // 10.0 is outside [0, 3.3]; the emitted command should encode the initial gain (1.0),
        // not the out-of-range target, and still pass loopback verification.
        assert!(worker.process_one(10.0).is_ok());
    }
}
