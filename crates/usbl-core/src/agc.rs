//! Automatic Gain Control state shared between the DSP worker (produces gain targets) and the
//! AGC worker (drives the DAC).

/// Gain voltage and the thresholds that drive its updates.
///
/// Invariant upheld by [`AgcState::update`]: `0.0 <= gain <= gain_max` after every call,
/// regardless of the initial gain or the sequence of correlation peaks observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgcState {
    pub gain: f64,
    pub step: f64,
    pub power_min: f64,
    pub power_max: f64,
    pub gain_min: f64,
    pub gain_max: f64,
    pub initial_gain: f64,
}

impl AgcState {
    pub fn new(
        initial_gain: f64,
        gain_min: f64,
        gain_max: f64,
        step: f64,
        power_min: f64,
        power_max: f64,
    ) -> Self {
        Self {
            gain: initial_gain,
            step,
            power_min,
            power_max,
            gain_min,
            gain_max,
            initial_gain,
        }
    }

    /// Apply one step of the AGC law: decrease on overshoot, increase on undershoot,
    /// clamp to `[0, gain_max]` either way.
    pub fn update(&mut self, peak_correlation_power: f64) -> f64 {
        if peak_correlation_power > self.power_max {
            self.gain -= self.step;
        } else if peak_correlation_power < self.power_min {
            self.gain += self.step;
        }
        self.gain = self.gain.clamp(0.0, self.gain_max);
        self.gain
    }

    pub fn in_range(&self, voltage: f64) -> bool {
        voltage >= self.gain_min && voltage <= self.gain_max
    }
}
