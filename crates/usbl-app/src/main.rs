//! `usbl`: parses a config path and an optional work-mode override, initializes logging, and
//! hands off to the supervisor.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use usbl_app::{AppConfig, Supervisor, WorkMode};
use usbl_daq::{DaqDevice, SimulatedDaqDevice};

#[derive(Parser, Debug)]
#[command(name = "usbl", about = "USBL acoustic positioning engine")]
struct Cli {
    /// Path to the YAML configuration document.
    config: PathBuf,

    /// Override the configured work mode instead of running whatever the file says.
    #[arg(long, value_enum)]
    mode: Option<CliWorkMode>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliWorkMode {
    Transmit,
    Receive,
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();

    let mut config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            log::error!("failed to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(mode) = cli.mode {
        config.work_mode = match mode {
            CliWorkMode::Transmit => WorkMode::Transmit,
            CliWorkMode::Receive => WorkMode::Receive,
        };
    }

    match config.work_mode {
        WorkMode::Transmit => run_transmit(&config),
        WorkMode::Receive => run_receive(&config),
    }
}

/// Transmit mode only synthesizes the composite waveform here; handing it to the DAQ's
/// analog-output scan is the vendor driver's contract, out of scope past the trait
/// boundary this crate defines.
fn run_transmit(config: &AppConfig) -> ExitCode {
    match usbl_dsp::synthesize(&config.signal_partials, 10_000_000) {
        Ok(samples) => {
            log::info!(
                "synthesized {} transmit samples; handing off to analog-output scan is outside this binary's scope",
                samples.len()
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("transmit signal synthesis failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_receive(config: &AppConfig) -> ExitCode {
    let device = demo_device(config);

    // Survival across process crashes is out of scope, so the running process has no
    // graceful-shutdown surface of its own: it runs every worker thread until the OS terminates
    // it. `Supervisor::stop` exists for embedding callers and tests, not this binary.
    let _supervisor = match Supervisor::start(config, device) {
        Ok(supervisor) => supervisor,
        Err(err) => {
            log::error!("failed to start supervisor: {err}");
            return ExitCode::FAILURE;
        }
    };

    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}

/// No vendor DAQ driver is wired into this binary (it is an external collaborator
/// reachable only through [`usbl_daq::DaqDevice`]); the demo binary loops a silent scan through
/// [`SimulatedDaqDevice`] so the rest of the pipeline has something to run against.
fn demo_device(config: &AppConfig) -> Box<dyn DaqDevice> {
    let channel_count = config.daq.high_channel - config.daq.low_channel + 1;
    let buffer_len = channel_count * config.daq.samples_per_channel;
    Box::new(SimulatedDaqDevice::new(
        vec![vec![0.0; buffer_len]],
        Duration::from_secs_f64(config.daq.interval_s.max(0.05)),
    ))
}
