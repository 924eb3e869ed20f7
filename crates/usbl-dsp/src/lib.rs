//! usbl-dsp: signal synthesis, FFT/convolution primitives, the TOF/DOA estimators, and
//! the DSP worker that sequences them once per scan.

mod doa;
mod fft;
mod synthesis;
mod tof;
mod worker;

pub use doa::{estimate_doa, DoaParams, DoaResult};
pub use fft::{conv_full, conv_full_row, conv_valid, fft_forward, fft_inverse, Cplx};
pub use synthesis::{synthesize, SignalKind, SignalPartial};
pub use tof::{estimate_tof, TofResult};
pub use worker::{DoaScanConfig, DspQueues, DspWorker};
