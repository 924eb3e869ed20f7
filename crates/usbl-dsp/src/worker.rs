//! DSP worker: pulls one frame at a time from the DSP queue, sequences TOF -> DOA -> AGC
//! update, and publishes every derived artifact to whichever downstream queues the supervisor
//! bound. TOF must run before DOA (DOA's start index comes from TOF's `min(tau)`), and AGC's
//! update depends on TOF's correlation peak — so within one frame the three never run out of
//! order, but across frames there is no parallelism to get wrong.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use usbl_core::{AgcState, ChannelFrame, PositionFix, Queue, UsblResult};

const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(20);

use crate::doa::{estimate_doa, DoaParams};
use crate::tof::estimate_tof;

/// Fixed per-run parameters for the DOA scan; only `start_index` (derived from TOF) changes
/// frame to frame.
#[derive(Debug, Clone, Copy)]
pub struct DoaScanConfig {
    pub selection_duration_s: f64,
    pub freq_lo_hz: f64,
    pub freq_hi_hz: f64,
    pub angle_step_deg: f64,
    pub sound_speed_mps: f64,
    pub array_diameter_m: f64,
    pub element_count: usize,
}

/// The downstream queues the DSP worker may publish to. The worker holds non-owning handles
/// (`Option<Arc<Queue<_>>>`) to everything but `position`, which is always bound — a fix is the
/// one artifact the system exists to produce. Each optional queue is a "weak handle": it is
/// checked for presence before publishing rather than assumed to exist.
pub struct DspQueues {
    pub position: Arc<Queue<PositionFix>>,
    /// Second, independent subscriber to every fix, bound only when position persistence
    /// is enabled — the serial emitter's queue stays the sole consumer otherwise.
    pub position_save: Option<Arc<Queue<PositionFix>>>,
    pub agc: Option<Arc<Queue<f64>>>,
    pub tof: Option<Arc<Queue<ChannelFrame>>>,
    pub correlation: Option<Arc<Queue<ChannelFrame>>>,
    pub beam_pattern: Option<Arc<Queue<ChannelFrame>>>,
    pub side_amp_spectrum: Option<Arc<Queue<ChannelFrame>>>,
}

pub struct DspWorker {
    reference: ChannelFrame,
    reference_frequency_hz: f64,
    sample_rate_hz: f64,
    doa_scan: DoaScanConfig,
    agc: AgcState,
    queues: DspQueues,
}

impl DspWorker {
    pub fn new(
        reference: ChannelFrame,
        reference_frequency_hz: f64,
        sample_rate_hz: f64,
        doa_scan: DoaScanConfig,
        agc: AgcState,
        queues: DspQueues,
    ) -> Self {
        Self {
            reference,
            reference_frequency_hz,
            sample_rate_hz,
            doa_scan,
            agc,
            queues,
        }
    }

    /// Process one frame end to end, publishing to every bound queue. Returns the fix that was
    /// published, mostly for tests; callers running the loop only care that it didn't error.
    pub fn process_one(&mut self, frame: &ChannelFrame, wall_clock_time_s: f64) -> UsblResult<PositionFix> {
        let tof = estimate_tof(frame, &self.reference, self.reference_frequency_hz)?;

        let min_tau = tof
            .tof
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        let start_index = (min_tau * self.sample_rate_hz).round().max(0.0) as usize;

        let doa_params = DoaParams {
            start_index,
            selection_duration_s: self.doa_scan.selection_duration_s,
            sample_rate_hz: self.sample_rate_hz,
            freq_lo_hz: self.doa_scan.freq_lo_hz,
            freq_hi_hz: self.doa_scan.freq_hi_hz,
            angle_step_deg: self.doa_scan.angle_step_deg,
            sound_speed_mps: self.doa_scan.sound_speed_mps,
            array_diameter_m: self.doa_scan.array_diameter_m,
            element_count: self.doa_scan.element_count,
        };
        let doa = estimate_doa(frame, &doa_params)?;

        let peak_power = tof
            .correlation
            .rows()
            .iter()
            .flat_map(|row| row.iter())
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let new_gain = self.agc.update(peak_power);

        let fix = PositionFix::new(wall_clock_time_s, min_tau, doa.doa_deg);
        self.queues.position.push(fix);
        if let Some(q) = &self.queues.position_save {
            q.push(fix);
        }

        if let Some(q) = &self.queues.agc {
            q.push(new_gain);
        }
        if let Some(q) = &self.queues.tof {
            q.push(ChannelFrame::from_single_row(tof.tof.clone()));
        }
        if let Some(q) = &self.queues.correlation {
            q.push(tof.correlation.clone());
        }
        if let Some(q) = &self.queues.beam_pattern {
            q.push(doa.beam_pattern.clone());
        }
        if let Some(q) = &self.queues.side_amp_spectrum {
            q.push(doa.side_amp_spectrum.clone());
        }

        Ok(fix)
    }

    /// Drain `input` until `enabled` is cleared. `now` supplies wall-clock seconds; injected
    /// rather than read from `std::time` directly so tests can drive deterministic fixes.
    /// Frame-local failures (dimension mismatches surfaced as `InvalidArgument`) are logged at
    /// `warn` and drop only that frame — the loop never skips frames under load but tolerates a
    /// malformed one.
    ///
    /// Polls with `try_pop` rather than blocking on `wait_and_pop`: the queue has no shutdown
    /// signal of its own, so a blocking pop on an empty queue would never notice `enabled` going
    /// false and `stop()` would hang waiting to join this thread.
    pub fn run(&mut self, input: &Queue<ChannelFrame>, enabled: &AtomicBool, now: impl Fn() -> f64) {
        while enabled.load(Ordering::Acquire) {
            let Some(frame) = input.try_pop() else {
                std::thread::sleep(INPUT_POLL_INTERVAL);
                continue;
            };
            if let Err(err) = self.process_one(&frame, now()) {
                log::warn!("DSP worker dropped frame: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesis::{synthesize, SignalKind, SignalPartial};

    fn reference_and_config() -> (ChannelFrame, f64, f64, DoaScanConfig) {
        let f_s = 1_000_000.0;
        let partial = SignalPartial {
            kind: SignalKind::Sine,
            sample_rate_hz: f_s,
            freq_start_hz: 30_000.0,
            freq_end_hz: 0.0,
            amplitude: 2.0,
            phase_rad: 0.0,
            duration_s: 0.0005,
        };
        let reference = ChannelFrame::from_single_row(synthesize(&[partial], 10_000).unwrap());
        let scan = DoaScanConfig {
            selection_duration_s: 0.002,
            freq_lo_hz: 28_000.0,
            freq_hi_hz: 32_000.0,
            angle_step_deg: 1.0,
            sound_speed_mps: 1500.0,
            array_diameter_m: 0.1,
            element_count: 4,
        };
        (reference, f_s, 30_000.0, scan)
    }

    fn queues_with_position() -> (DspQueues, Arc<Queue<PositionFix>>) {
        let position = Arc::new(Queue::new());
        (
            DspQueues {
                position: Arc::clone(&position),
                position_save: None,
                agc: Some(Arc::new(Queue::new())),
                tof: Some(Arc::new(Queue::new())),
                correlation: Some(Arc::new(Queue::new())),
                beam_pattern: Some(Arc::new(Queue::new())),
                side_amp_spectrum: Some(Arc::new(Queue::new())),
            },
            position,
        )
    }

    #[test]
    fn process_one_publishes_a_finite_fix() {
        let (reference, f_s, f_ref, scan) = reference_and_config();
        let (queues, position) = queues_with_position();
        let agc = AgcState::new(1.0, 0.0, 3.3, 0.1, 0.2, 0.8);
        let mut worker = DspWorker::new(reference.clone(), f_ref, f_s, scan, agc, queues);

        // Build a 4-channel signal long enough for the DOA window, with the reference embedded
        // identically on every channel (no real geometry, just end-to-end wiring).
        let total_len = reference.samples_per_channel() + 4096;
        let mut rows = vec![vec![0.0; total_len]; 4];
        for row in rows.iter_mut() {
            row[100..100 + reference.samples_per_channel()].copy_from_slice(reference.row(0));
        }
        let signal = ChannelFrame::from_rows(rows).unwrap();

        let fix = worker.process_one(&signal, 42.0).unwrap();
        assert_eq!(fix.time, 42.0);
        assert!(fix.tof.is_finite());
        assert!(fix.doa.is_finite());
        assert!(fix.doa >= -180.0 && fix.doa <= 180.0);

        assert_eq!(position.size(), 1);
    }

    #[test]
    fn optional_queues_are_only_published_when_bound() {
        let (reference, f_s, f_ref, scan) = reference_and_config();
        let position = Arc::new(Queue::new());
        let queues = DspQueues {
            position: Arc::clone(&position),
            position_save: None,
            agc: None,
            tof: None,
            correlation: None,
            beam_pattern: None,
            side_amp_spectrum: None,
        };
        let agc = AgcState::new(1.0, 0.0, 3.3, 0.1, 0.2, 0.8);
        let mut worker = DspWorker::new(reference.clone(), f_ref, f_s, scan, agc, queues);

        let total_len = reference.samples_per_channel() + 4096;
        let mut rows = vec![vec![0.0; total_len]; 4];
        for row in rows.iter_mut() {
            row[100..100 + reference.samples_per_channel()].copy_from_slice(reference.row(0));
        }
        let signal = ChannelFrame::from_rows(rows).unwrap();

        assert!(worker.process_one(&signal, 1.0).is_ok());
        assert_eq!(position.size(), 1);
    }

    #[test]
    fn run_returns_promptly_when_disabled_with_an_empty_input_queue() {
        let (reference, f_s, f_ref, scan) = reference_and_config();
        let (queues, _position) = queues_with_position();
        let agc = AgcState::new(1.0, 0.0, 3.3, 0.1, 0.2, 0.8);
        let mut worker = DspWorker::new(reference, f_ref, f_s, scan, agc, queues);

        let input: Queue<ChannelFrame> = Queue::new();
        let enabled = AtomicBool::new(true);

        std::thread::scope(|s| {
            let handle = s.spawn(|| worker.run(&input, &enabled, || 0.0));
            std::thread::sleep(std::time::Duration::from_millis(50));
            enabled.store(false, Ordering::Release);
            handle.join().unwrap();
        });
    }
}
