//! Signal synthesis — builds the reference waveform shared with the DSP pipeline and the
//! transmit-mode composite waveform from the same typed partial-segment list.

use std::f64::consts::PI;

use usbl_core::{UsblError, UsblResult};

/// One segment of a composite waveform.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SignalPartial {
    pub kind: SignalKind,
    pub sample_rate_hz: f64,
    pub freq_start_hz: f64,
    pub freq_end_hz: f64,
    pub amplitude: f64,
    pub phase_rad: f64,
    pub duration_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Sine,
    Cosine,
    Chirp,
    RisingDc,
    FallingDc,
    Zero,
}

impl SignalPartial {
    fn validate(&self) -> UsblResult<()> {
        if self.sample_rate_hz <= 0.0 {
            return Err(UsblError::InvalidArgument(
                "signal partial sampleRate must be > 0".into(),
            ));
        }
        if self.duration_s <= 0.0 {
            return Err(UsblError::InvalidArgument(
                "signal partial duration must be > 0".into(),
            ));
        }
        if self.kind == SignalKind::Chirp
            && (!self.freq_start_hz.is_finite() || !self.freq_end_hz.is_finite())
        {
            return Err(UsblError::InvalidArgument(
                "chirp partial requires finite freqStart and freqEnd".into(),
            ));
        }
        Ok(())
    }

    fn sample_count(&self) -> usize {
        (self.sample_rate_hz * self.duration_s).round() as usize
    }
}

/// Concatenate the per-segment output of every partial into one contiguous sequence.
///
/// Fails with `CapacityExceeded` if the sum of segment lengths would exceed `max_length` — the
/// declared maximum a caller is willing to allocate for a reference or transmit buffer.
pub fn synthesize(partials: &[SignalPartial], max_length: usize) -> UsblResult<Vec<f64>> {
    for partial in partials {
        partial.validate()?;
    }
    let total: usize = partials.iter().map(SignalPartial::sample_count).sum();
    if total > max_length {
        return Err(UsblError::CapacityExceeded);
    }
    let mut signal = Vec::with_capacity(total);
    for partial in partials {
        signal.extend(generate_partial(partial));
    }
    Ok(signal)
}

fn generate_partial(partial: &SignalPartial) -> Vec<f64> {
    let n = partial.sample_count();
    let dt = 1.0 / partial.sample_rate_hz;
    let mut out = Vec::with_capacity(n);

    match partial.kind {
        SignalKind::Sine => {
            let mut phase = partial.phase_rad;
            for _ in 0..n {
                out.push(phase.sin() * partial.amplitude / 2.0);
                phase += 2.0 * PI * partial.freq_start_hz * dt;
                phase = wrap_phase(phase);
            }
        }
        SignalKind::Cosine => {
            let mut phase = partial.phase_rad;
            for _ in 0..n {
                out.push(phase.cos() * partial.amplitude / 2.0);
                phase += 2.0 * PI * partial.freq_start_hz * dt;
                phase = wrap_phase(phase);
            }
        }
        SignalKind::Chirp => {
            // Linear frequency ramp; initial phase offset matches one sample of the start
            // frequency so the first output sample is continuous with a preceding sine segment.
            let k = if n > 1 {
                (partial.freq_end_hz - partial.freq_start_hz) / (n as f64 - 1.0)
            } else {
                0.0
            };
            let mut phase = partial.phase_rad + 2.0 * PI * partial.freq_start_hz * dt;
            for i in 0..n {
                let current_freq = partial.freq_start_hz + k * i as f64;
                out.push(phase.sin() * partial.amplitude / 2.0);
                phase += 2.0 * PI * current_freq * dt;
                phase = wrap_phase(phase);
            }
        }
        SignalKind::RisingDc => out.resize(n, partial.amplitude / 2.0),
        SignalKind::FallingDc => out.resize(n, -partial.amplitude / 2.0),
        SignalKind::Zero => out.resize(n, 0.0),
    }

    out
}

/// Wrap a phase back into `(-2*PI, 2*PI]`, mirroring the single-subtraction wrap of the original
/// generator rather than a full modulo — per-sample phase increments never exceed one full turn.
fn wrap_phase(phase: f64) -> f64 {
    if phase > 2.0 * PI {
        phase - 2.0 * PI
    } else {
        phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn synthesis_round_trip() {
        // A sine partial followed by a chirp partial, checked sample by sample.
        let partial = SignalPartial {
            kind: SignalKind::Sine,
            sample_rate_hz: 100_000.0,
            freq_start_hz: 10_000.0,
            freq_end_hz: 0.0,
            amplitude: 2.0,
            phase_rad: 0.0,
            duration_s: 0.001,
        };
        let signal = synthesize(&[partial], 10_000).unwrap();
        assert_eq!(signal.len(), 100);
        let max = signal.iter().cloned().fold(f64::MIN, f64::max);
        assert_relative_eq!(max, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn capacity_exceeded_when_too_long() {
        let partial = SignalPartial {
            kind: SignalKind::Zero,
            sample_rate_hz: 1000.0,
            freq_start_hz: 0.0,
            freq_end_hz: 0.0,
            amplitude: 0.0,
            phase_rad: 0.0,
            duration_s: 10.0,
        };
        let err = synthesize(&[partial], 100).unwrap_err();
        assert!(matches!(err, UsblError::CapacityExceeded));
    }

    #[test]
    fn invalid_sample_rate_rejected() {
        let partial = SignalPartial {
            kind: SignalKind::Zero,
            sample_rate_hz: 0.0,
            freq_start_hz: 0.0,
            freq_end_hz: 0.0,
            amplitude: 0.0,
            phase_rad: 0.0,
            duration_s: 1.0,
        };
        assert!(synthesize(&[partial], 1000).is_err());
    }

    #[test]
    fn rising_and_falling_dc_are_constant_opposite_signs() {
        let rising = SignalPartial {
            kind: SignalKind::RisingDc,
            sample_rate_hz: 1000.0,
            freq_start_hz: 0.0,
            freq_end_hz: 0.0,
            amplitude: 4.0,
            phase_rad: 0.0,
            duration_s: 0.01,
        };
        let falling = SignalPartial {
            kind: SignalKind::FallingDc,
            ..rising
        };
        let rising_sig = synthesize(&[rising], 1000).unwrap();
        let falling_sig = synthesize(&[falling], 1000).unwrap();
        assert!(rising_sig.iter().all(|&s| s == 2.0));
        assert!(falling_sig.iter().all(|&s| s == -2.0));
    }

    #[test]
    fn concatenation_preserves_segment_order() {
        let zero = SignalPartial {
            kind: SignalKind::Zero,
            sample_rate_hz: 1000.0,
            freq_start_hz: 0.0,
            freq_end_hz: 0.0,
            amplitude: 0.0,
            phase_rad: 0.0,
            duration_s: 0.002,
        };
        let rising = SignalPartial {
            kind: SignalKind::RisingDc,
            amplitude: 2.0,
            ..zero
        };
        let signal = synthesize(&[zero, rising], 1000).unwrap();
        assert_eq!(signal.len(), 4);
        assert_eq!(&signal[..2], &[0.0, 0.0]);
        assert_eq!(&signal[2..], &[1.0, 1.0]);
    }
}
