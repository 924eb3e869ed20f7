//! Typed configuration: deserializes the on-disk YAML document into `AppConfig`, expands
//! `${TIME}` save-path tokens once at load time, and validates cross-field invariants before the
//! supervisor ever constructs a queue.

use std::path::Path;

use serde::{Deserialize, Serialize};

use usbl_core::{UsblError, UsblResult};
use usbl_dsp::SignalPartial;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkMode {
    Transmit,
    Receive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSink {
    pub enabled: bool,
    /// May contain a `${TIME}` token, expanded once at load time.
    pub path: String,
    #[serde(default)]
    pub mode: SinkModeConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkModeConfig {
    #[default]
    Text,
    Binary,
    Hex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaqConfig {
    pub low_channel: usize,
    pub high_channel: usize,
    pub sample_rate_hz: f64,
    pub samples_per_channel: usize,
    pub duration_s: f64,
    pub interval_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    pub enabled: bool,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayConfig {
    pub element_count: usize,
    pub diameter_m: f64,
    pub initial_receive_gain: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub sound_speed_mps: f64,
    pub process_duration_s: f64,
    pub freq_lo_hz: f64,
    pub freq_hi_hz: f64,
    pub doa_step_deg: f64,
    pub reference_frequency_hz: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgcConfig {
    pub enabled: bool,
    pub port: String,
    pub baud_rate: u32,
    pub initial_gain: f64,
    pub gain_min: f64,
    pub gain_max: f64,
    pub power_min: f64,
    pub power_max: f64,
    pub step: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSinks {
    pub analog: ArtifactSink,
    pub position: ArtifactSink,
    pub tof: ArtifactSink,
    pub correlation: ArtifactSink,
    pub beam_pattern: ArtifactSink,
    pub side_amp_spectrum: ArtifactSink,
}

/// The single source of truth every worker is wired from. Mirrors the on-disk document field-for-field; no
/// component reads environment variables or its own command-line flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub work_mode: WorkMode,
    pub artifacts: ArtifactSinks,
    pub signal_partials: Vec<SignalPartial>,
    pub daq: DaqConfig,
    pub fix_serial: SerialConfig,
    pub tcp: TcpConfig,
    pub array: ArrayConfig,
    pub process: ProcessConfig,
    pub agc: AgcConfig,
}

impl AppConfig {
    /// Load, expand `${TIME}` tokens, and validate. Fails fast with `CONFIG_INVALID` on the
    /// first violation; the supervisor never sees a config that didn't pass this gate.
    pub fn load(path: &Path) -> UsblResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| UsblError::ConfigInvalid(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> UsblResult<Self> {
        let mut config: AppConfig = serde_yml::from_str(text)
            .map_err(|e| UsblError::ConfigParse(e.to_string()))?;
        config.expand_time_tokens();
        config.validate()?;
        Ok(config)
    }

    /// Replace every `${TIME}` occurrence in every save path with one shared
    /// `YYYYMMDD_HHMMSS` timestamp, computed once so all of one run's artifacts share it.
    fn expand_time_tokens(&mut self) {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        for sink in self.artifacts.sinks_mut() {
            sink.path = sink.path.replace("${TIME}", &stamp);
        }
    }

    fn validate(&self) -> UsblResult<()> {
        if self.daq.sample_rate_hz <= 0.0 {
            return Err(invalid("daq.sampleRate must be > 0"));
        }
        if self.daq.high_channel < self.daq.low_channel {
            return Err(invalid("daq.highChannel must be >= daq.lowChannel"));
        }
        if self.daq.samples_per_channel == 0 {
            return Err(invalid("daq.samplesPerChannel must be > 0"));
        }
        if self.agc.gain_min > self.agc.gain_max {
            return Err(invalid("agc.gainMin must be <= agc.gainMax"));
        }
        if self.agc.power_min >= self.agc.power_max {
            return Err(invalid("agc.powerMin must be < agc.powerMax"));
        }
        if self.array.element_count == 0 {
            return Err(invalid("array.elementCount must be > 0"));
        }
        if self.array.diameter_m <= 0.0 {
            return Err(invalid("array.diameterM must be > 0"));
        }
        if self.process.freq_lo_hz > self.process.freq_hi_hz {
            return Err(invalid("process.freqLo must be <= process.freqHi"));
        }
        if self.process.doa_step_deg <= 0.0 || self.process.doa_step_deg > 180.0 {
            return Err(invalid("process.doaStep must be in (0, 180]"));
        }
        if self.process.reference_frequency_hz <= 0.0 {
            return Err(invalid("process.referenceFrequency must be > 0"));
        }
        // Resolved by requiring the reference signal's generation rate to
        // equal the DAQ sample rate, so TOF's `idx / f_ref` and DOA's `min(tau) * f_s` share one
        // time base instead of silently drifting when the two differ.
        if (self.process.reference_frequency_hz - self.daq.sample_rate_hz).abs() > 1e-6 {
            return Err(invalid(
                "process.referenceFrequency must equal daq.sampleRate (time-base consistency, see design notes)",
            ));
        }
        if self.signal_partials.is_empty() {
            return Err(invalid("signalPartials must not be empty"));
        }
        Ok(())
    }
}

impl ArtifactSinks {
    fn sinks_mut(&mut self) -> impl Iterator<Item = &mut ArtifactSink> {
        [
            &mut self.analog,
            &mut self.position,
            &mut self.tof,
            &mut self.correlation,
            &mut self.beam_pattern,
            &mut self.side_amp_spectrum,
        ]
        .into_iter()
    }
}

fn invalid(msg: &str) -> UsblError {
    UsblError::ConfigInvalid(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_yaml() -> String {
        r#"
work_mode: RECEIVE
artifacts:
  analog: { enabled: true, path: "analog_${TIME}.dat", mode: binary }
  position: { enabled: true, path: "position_${TIME}.txt" }
  tof: { enabled: false, path: "tof_${TIME}.txt" }
  correlation: { enabled: false, path: "corr_${TIME}.dat", mode: binary }
  beam_pattern: { enabled: false, path: "beam_${TIME}.dat", mode: binary }
  side_amp_spectrum: { enabled: false, path: "spec_${TIME}.dat", mode: binary }
signal_partials:
  - kind: sine
    sample_rate_hz: 100000.0
    freq_start_hz: 10000.0
    freq_end_hz: 0.0
    amplitude: 2.0
    phase_rad: 0.0
    duration_s: 0.001
daq:
  low_channel: 0
  high_channel: 3
  sample_rate_hz: 100000.0
  samples_per_channel: 4096
  duration_s: 0.04096
  interval_s: 0.0
fix_serial: { port: "/dev/ttyUSB0", baud_rate: 9600 }
tcp: { enabled: true, port: 9000, connect_timeout_ms: 1000, send_timeout_ms: 500 }
array: { element_count: 4, diameter_m: 0.1, initial_receive_gain: 1.0 }
process:
  sound_speed_mps: 1500.0
  process_duration_s: 0.002
  freq_lo_hz: 28000.0
  freq_hi_hz: 32000.0
  doa_step_deg: 1.0
  reference_frequency_hz: 100000.0
agc:
  enabled: true
  port: "/dev/ttyUSB1"
  baud_rate: 9600
  initial_gain: 1.0
  gain_min: 0.0
  gain_max: 3.3
  power_min: 0.2
  power_max: 0.8
  step: 0.1
"#
        .to_string()
    }

    #[test]
    fn valid_fixture_round_trips_every_field() {
        let config = AppConfig::from_yaml_str(&valid_yaml()).unwrap();
        assert_eq!(config.work_mode, WorkMode::Receive);
        assert_eq!(config.daq.high_channel, 3);
        assert_eq!(config.agc.gain_max, 3.3);
        assert!(!config.artifacts.analog.path.contains("${TIME}"));
    }

    #[test]
    fn time_tokens_share_one_timestamp() {
        let config = AppConfig::from_yaml_str(&valid_yaml()).unwrap();
        let stamp_of = |p: &str| p.split('_').nth(1).unwrap().split('.').next().unwrap().to_string();
        let a = stamp_of(&config.artifacts.analog.path);
        let b = stamp_of(&config.artifacts.position.path);
        assert_eq!(a, b);
    }

    #[test]
    fn out_of_range_agc_window_fails_to_load() {
        let bad = valid_yaml().replace("gain_max: 3.3", "gain_max: -1.0");
        let err = AppConfig::from_yaml_str(&bad).unwrap_err();
        assert!(matches!(err, UsblError::ConfigInvalid(_)));
    }

    #[test]
    fn mismatched_reference_and_daq_rate_is_rejected() {
        let bad = valid_yaml().replace("reference_frequency_hz: 100000.0", "reference_frequency_hz: 50000.0");
        let err = AppConfig::from_yaml_str(&bad).unwrap_err();
        assert!(matches!(err, UsblError::ConfigInvalid(_)));
    }

    #[test]
    fn malformed_yaml_is_a_parse_error_not_a_panic() {
        let err = AppConfig::from_yaml_str("not: [valid").unwrap_err();
        assert!(matches!(err, UsblError::ConfigParse(_)));
    }

    #[test]
    fn load_reads_a_config_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usbl.yaml");
        std::fs::write(&path, valid_yaml()).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.work_mode, WorkMode::Receive);
    }

    #[test]
    fn load_reports_config_invalid_for_a_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does_not_exist.yaml");
        let err = AppConfig::load(&missing).unwrap_err();
        assert!(matches!(err, UsblError::ConfigInvalid(_)));
    }
}
