//! The vendor DAQ surface, modeled as a trait so ingest can be exercised
//! against a simulated device instead of real hardware.

use std::sync::Arc;

use parking_lot::Mutex;

use usbl_core::UsblResult;

/// Input range/mode the caller asked the device to honor. Only equality matters here; the real
/// vendor driver's richer enumeration is out of scope past the hand-off boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputMode(pub u32);

/// Mirrors the vendor `scanInfo` struct: channel span, rate, and the hardware-trigger gating bit.
#[derive(Debug, Clone, Copy)]
pub struct ScanInfo {
    pub low_channel: usize,
    pub high_channel: usize,
    pub samples_per_channel: usize,
    pub sample_rate_hz: f64,
    pub duration_s: f64,
    pub interval_s: f64,
    pub scan_flags: u32,
    pub scan_options: u32,
    pub event_mask: u32,
    pub input_mode: InputMode,
}

/// Bit of `event_mask` that gates scans on the external hardware trigger.
pub const TRIGGER_EVENT_BIT: u32 = 0x1;

impl ScanInfo {
    pub fn channel_count(&self) -> usize {
        self.high_channel - self.low_channel + 1
    }

    pub fn triggered(&self) -> bool {
        self.event_mask & TRIGGER_EVENT_BIT != 0
    }
}

/// One of the three events the device may deliver.
#[derive(Debug, Clone, Copy)]
pub enum ScanEvent {
    DataAvailable,
    EndOfInputScan,
    InputScanError(i32),
}

pub type ScanCallback = Arc<dyn Fn(ScanEvent) + Send + Sync>;

/// The inventory/connect/scan/event surface consumed by ingest.
///
/// `start_scan` hands the device a pre-allocated interleaved buffer it writes samples into on
/// its own schedule (hardware pacer, or a background thread for [`crate::simulated`]); the
/// callback notifies ingest when a scan completes, ends, or errors.
pub trait DaqDevice: Send {
    fn connect(&mut self) -> UsblResult<()>;
    fn disconnect(&mut self) -> UsblResult<()>;
    fn has_analog_input(&self) -> bool;
    fn has_pacer(&self) -> bool;
    fn supports_input_mode(&self, mode: InputMode) -> bool;
    fn start_scan(
        &mut self,
        scan: ScanInfo,
        buffer: Arc<Mutex<Vec<f64>>>,
        callback: ScanCallback,
    ) -> UsblResult<()>;
    fn stop_scan(&mut self) -> UsblResult<()>;
}
