//! usbl-daq: the DAQ device contract and the ingest engine that turns completed scans
//! into channel frames fanned out to the DSP, persistence, and (optional) network queues.

mod device;
mod ingest;
mod simulated;

pub use device::{DaqDevice, InputMode, ScanCallback, ScanEvent, ScanInfo, TRIGGER_EVENT_BIT};
pub use ingest::{ConsumerQueues, IngestEngine};
pub use simulated::SimulatedDaqDevice;
