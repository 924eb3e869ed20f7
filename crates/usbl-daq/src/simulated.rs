//! A deterministic `DaqDevice` test double. Replays pre-loaded interleaved buffers through the
//! completion callback on a background thread, cycling through them for as long as the scan is
//! armed, so ingest's completeness check and fan-out can be exercised without real hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use usbl_core::{UsblError, UsblResult};

use crate::device::{DaqDevice, InputMode, ScanCallback, ScanEvent, ScanInfo};

pub struct SimulatedDaqDevice {
    buffers: Vec<Vec<f64>>,
    replay_interval: Duration,
    connected: bool,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SimulatedDaqDevice {
    /// `buffers` are played back in order, then repeated, one per "scan", each already sized
    /// `channel_count * samples_per_channel` in the caller's chosen interleaving.
    pub fn new(buffers: Vec<Vec<f64>>, replay_interval: Duration) -> Self {
        Self {
            buffers,
            replay_interval,
            connected: false,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl DaqDevice for SimulatedDaqDevice {
    fn connect(&mut self) -> UsblResult<()> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> UsblResult<()> {
        self.connected = false;
        Ok(())
    }

    fn has_analog_input(&self) -> bool {
        true
    }

    fn has_pacer(&self) -> bool {
        true
    }

    fn supports_input_mode(&self, _mode: InputMode) -> bool {
        true
    }

    fn start_scan(
        &mut self,
        scan: ScanInfo,
        buffer: Arc<Mutex<Vec<f64>>>,
        callback: ScanCallback,
    ) -> UsblResult<()> {
        if !self.connected {
            return Err(UsblError::DeviceAbsent);
        }
        if self.buffers.is_empty() {
            return Err(UsblError::InvalidArgument(
                "simulated device has no buffers loaded".into(),
            ));
        }

        let expected_len = scan.channel_count() * scan.samples_per_channel;
        for loaded in &self.buffers {
            if loaded.len() != expected_len {
                return Err(UsblError::InvalidArgument(format!(
                    "preloaded buffer length {} does not match scan shape {}",
                    loaded.len(),
                    expected_len
                )));
            }
        }

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let replay_buffers = self.buffers.clone();
        let interval = self.replay_interval;

        self.thread = Some(std::thread::spawn(move || {
            let mut next = 0usize;
            while running.load(Ordering::Acquire) {
                {
                    let mut raw = buffer.lock();
                    raw.copy_from_slice(&replay_buffers[next]);
                }
                callback(ScanEvent::DataAvailable);
                next = (next + 1) % replay_buffers.len();
                std::thread::sleep(interval);
            }
        }));

        Ok(())
    }

    fn stop_scan(&mut self) -> UsblResult<()> {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}
