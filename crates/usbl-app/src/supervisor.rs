//! Supervisor / wiring: owns process lifecycle. Synthesizes the reference waveform, binds
//! every queue to its producers and consumers in the exact wiring topology, starts all workers,
//! and tears them down in reverse order on shutdown.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use usbl_core::{AgcState, ChannelFrame, PositionFix, Queue, UsblError, UsblResult};
use usbl_daq::{ConsumerQueues, DaqDevice, IngestEngine, InputMode, ScanInfo, TRIGGER_EVENT_BIT};
use usbl_dsp::{synthesize, DoaScanConfig, DspQueues, DspWorker};
use usbl_io::{
    AgcWorker, FixEmitter, PersistenceConsumer, PositionPersistenceConsumer, SerialPortLink,
    SinkMode, TcpStreamer,
};

use crate::config::{AppConfig, ArtifactSink, SinkModeConfig};

/// Every bound queue plus the shared shutdown flag. Held by the supervisor for the run's
/// lifetime; workers only ever see `Arc` clones.
struct Wiring {
    dsp_queue: Arc<Queue<ChannelFrame>>,
    save_queue: Arc<Queue<ChannelFrame>>,
    net_queue: Option<Arc<Queue<ChannelFrame>>>,
    position_queue: Arc<Queue<PositionFix>>,
    position_save_queue: Option<Arc<Queue<PositionFix>>>,
    agc_queue: Option<Arc<Queue<f64>>>,
    tof_queue: Option<Arc<Queue<ChannelFrame>>>,
    correlation_queue: Option<Arc<Queue<ChannelFrame>>>,
    beam_pattern_queue: Option<Arc<Queue<ChannelFrame>>>,
    side_amp_spectrum_queue: Option<Arc<Queue<ChannelFrame>>>,
}

/// Runs the receive-mode pipeline for as long as the process lives. `stop()` (or dropping the
/// returned handle after calling it) joins every worker before returning.
pub struct Supervisor {
    enabled: Arc<AtomicBool>,
    /// Ingest's event loop uses stop-flag (true = stop) polarity to match its driver-callback
    /// contract rather than the rest of the workers' enable-flag (true = run) polarity; kept
    /// separate rather than inverted on every read.
    daq_stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Build the reference waveform, bind every queue per the wiring topology, and start all workers.
    /// `device` is the vendor DAQ collaborator; production code supplies a real driver,
    /// tests and the demo binary supply [`usbl_daq::SimulatedDaqDevice`].
    pub fn start(config: &AppConfig, device: Box<dyn DaqDevice>) -> UsblResult<Self> {
        let reference_samples = synthesize(
            &config.signal_partials,
            config.daq.samples_per_channel.max(1_000_000),
        )?;
        let reference = ChannelFrame::from_single_row(reference_samples);

        let enabled = Arc::new(AtomicBool::new(true));
        let daq_stop = Arc::new(AtomicBool::new(false));
        let wiring = Wiring::build(config);
        let mut handles = Vec::new();

        handles.push(spawn_ingest(config, device, &wiring, Arc::clone(&daq_stop))?);
        handles.push(spawn_dsp_worker(config, reference, &wiring, Arc::clone(&enabled)));

        if config.agc.enabled {
            if let Some(handle) = spawn_agc_worker(config, &wiring, Arc::clone(&enabled))? {
                handles.push(handle);
            }
        }
        if config.tcp.enabled {
            if let Some(handle) = spawn_tcp_streamer(config, &wiring, Arc::clone(&enabled))? {
                handles.push(handle);
            }
        }
        handles.push(spawn_fix_emitter(config, &wiring, Arc::clone(&enabled))?);

        handles.extend(spawn_persistence_consumers(config, &wiring, Arc::clone(&enabled))?);

        Ok(Self {
            enabled,
            daq_stop,
            handles,
        })
    }

    /// Clear every worker's enable flag and join them all, in the reverse order they were
    /// started, matching the documented shutdown sequence.
    pub fn stop(mut self) {
        self.enabled.store(false, Ordering::Release);
        self.daq_stop.store(true, Ordering::Release);
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Wiring {
    fn build(config: &AppConfig) -> Self {
        Self {
            dsp_queue: Arc::new(Queue::new()),
            save_queue: Arc::new(Queue::new()),
            net_queue: config.tcp.enabled.then(|| Arc::new(Queue::new())),
            position_queue: Arc::new(Queue::new()),
            position_save_queue: config
                .artifacts
                .position
                .enabled
                .then(|| Arc::new(Queue::new())),
            agc_queue: config.agc.enabled.then(|| Arc::new(Queue::new())),
            tof_queue: config.artifacts.tof.enabled.then(|| Arc::new(Queue::new())),
            correlation_queue: config
                .artifacts
                .correlation
                .enabled
                .then(|| Arc::new(Queue::new())),
            beam_pattern_queue: config
                .artifacts
                .beam_pattern
                .enabled
                .then(|| Arc::new(Queue::new())),
            side_amp_spectrum_queue: config
                .artifacts
                .side_amp_spectrum
                .enabled
                .then(|| Arc::new(Queue::new())),
        }
    }
}

fn spawn_ingest(
    config: &AppConfig,
    device: Box<dyn DaqDevice>,
    wiring: &Wiring,
    stop: Arc<AtomicBool>,
) -> UsblResult<JoinHandle<()>> {
    let scan = ScanInfo {
        low_channel: config.daq.low_channel,
        high_channel: config.daq.high_channel,
        samples_per_channel: config.daq.samples_per_channel,
        sample_rate_hz: config.daq.sample_rate_hz,
        duration_s: config.daq.duration_s,
        interval_s: config.daq.interval_s,
        scan_flags: 0,
        scan_options: 0,
        event_mask: TRIGGER_EVENT_BIT,
        input_mode: InputMode(0),
    };
    let queues = ConsumerQueues {
        dsp: Arc::clone(&wiring.dsp_queue),
        save: Arc::clone(&wiring.save_queue),
        net: wiring.net_queue.clone(),
    };
    let mut engine = IngestEngine::new(device, scan, queues);

    log::info!("starting DAQ ingest thread");
    Ok(std::thread::spawn(move || {
        if let Err(err) = engine.run(stop) {
            log::error!("DAQ ingest terminated: {err}");
        }
    }))
}

fn spawn_dsp_worker(
    config: &AppConfig,
    reference: ChannelFrame,
    wiring: &Wiring,
    enabled: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let dsp_queue = Arc::clone(&wiring.dsp_queue);
    let doa_scan = DoaScanConfig {
        selection_duration_s: config.process.process_duration_s,
        freq_lo_hz: config.process.freq_lo_hz,
        freq_hi_hz: config.process.freq_hi_hz,
        angle_step_deg: config.process.doa_step_deg,
        sound_speed_mps: config.process.sound_speed_mps,
        array_diameter_m: config.array.diameter_m,
        element_count: config.array.element_count,
    };
    let agc_state = AgcState::new(
        config.agc.initial_gain,
        config.agc.gain_min,
        config.agc.gain_max,
        config.agc.step,
        config.agc.power_min,
        config.agc.power_max,
    );
    let mut worker = DspWorker::new(
        reference,
        config.process.reference_frequency_hz,
        config.daq.sample_rate_hz,
        doa_scan,
        agc_state,
        DspQueues {
            position: Arc::clone(&wiring.position_queue),
            position_save: wiring.position_save_queue.clone(),
            agc: wiring.agc_queue.clone(),
            tof: wiring.tof_queue.clone(),
            correlation: wiring.correlation_queue.clone(),
            beam_pattern: wiring.beam_pattern_queue.clone(),
            side_amp_spectrum: wiring.side_amp_spectrum_queue.clone(),
        },
    );

    log::info!("starting DSP worker thread");
    std::thread::spawn(move || {
        worker.run(&dsp_queue, &enabled, wall_clock_seconds);
    })
}

fn spawn_agc_worker(
    config: &AppConfig,
    wiring: &Wiring,
    enabled: Arc<AtomicBool>,
) -> UsblResult<Option<JoinHandle<()>>> {
    let Some(agc_queue) = wiring.agc_queue.clone() else {
        return Ok(None);
    };
    let port = SerialPortLink::open(
        &config.agc.port,
        config.agc.baud_rate,
        Duration::from_millis(100),
    )
    .map_err(UsblError::Io)?;
    let mut worker = AgcWorker::new(
        Box::new(port),
        config.agc.gain_min,
        config.agc.gain_max,
        config.agc.initial_gain,
    );

    log::info!("starting AGC worker thread on {}", config.agc.port);
    Ok(Some(std::thread::spawn(move || {
        worker.run(&agc_queue, &enabled);
    })))
}

fn spawn_tcp_streamer(
    config: &AppConfig,
    wiring: &Wiring,
    enabled: Arc<AtomicBool>,
) -> UsblResult<Option<JoinHandle<()>>> {
    let Some(net_queue) = wiring.net_queue.clone() else {
        return Ok(None);
    };
    let mut streamer = TcpStreamer::bind(
        config.tcp.port,
        Duration::from_millis(config.tcp.connect_timeout_ms),
        Duration::from_millis(config.tcp.send_timeout_ms),
    )?;

    log::info!("starting TCP streamer on port {}", config.tcp.port);
    Ok(Some(std::thread::spawn(move || {
        streamer.run(&net_queue, &enabled);
    })))
}

fn spawn_fix_emitter(
    config: &AppConfig,
    wiring: &Wiring,
    enabled: Arc<AtomicBool>,
) -> UsblResult<JoinHandle<()>> {
    let position_queue = Arc::clone(&wiring.position_queue);
    let port = SerialPortLink::open(
        &config.fix_serial.port,
        config.fix_serial.baud_rate,
        Duration::from_millis(100),
    )
    .map_err(UsblError::Io)?;
    let mut emitter = FixEmitter::new(Box::new(port));

    log::info!("starting serial fix emitter on {}", config.fix_serial.port);
    Ok(std::thread::spawn(move || {
        emitter.run(&position_queue, &enabled);
    }))
}

/// One persistence consumer thread per enabled artifact, named and queued per the
/// `save-queue`/derived-queue topology: `analog` drains the ingest fan-out's `save` queue,
/// everything else drains its own DSP-worker output queue.
fn spawn_persistence_consumers(
    config: &AppConfig,
    wiring: &Wiring,
    enabled: Arc<AtomicBool>,
) -> UsblResult<Vec<JoinHandle<()>>> {
    let mut handles = Vec::new();

    if config.artifacts.analog.enabled {
        handles.push(spawn_one_persistence_consumer(
            &config.artifacts.analog,
            Arc::clone(&wiring.save_queue),
            Arc::clone(&enabled),
        )?);
    }
    if let (true, Some(q)) = (config.artifacts.tof.enabled, &wiring.tof_queue) {
        handles.push(spawn_one_persistence_consumer(
            &config.artifacts.tof,
            Arc::clone(q),
            Arc::clone(&enabled),
        )?);
    }
    if let (true, Some(q)) = (config.artifacts.correlation.enabled, &wiring.correlation_queue) {
        handles.push(spawn_one_persistence_consumer(
            &config.artifacts.correlation,
            Arc::clone(q),
            Arc::clone(&enabled),
        )?);
    }
    if let (true, Some(q)) = (config.artifacts.beam_pattern.enabled, &wiring.beam_pattern_queue) {
        handles.push(spawn_one_persistence_consumer(
            &config.artifacts.beam_pattern,
            Arc::clone(q),
            Arc::clone(&enabled),
        )?);
    }
    if let (true, Some(q)) = (
        config.artifacts.side_amp_spectrum.enabled,
        &wiring.side_amp_spectrum_queue,
    ) {
        handles.push(spawn_one_persistence_consumer(
            &config.artifacts.side_amp_spectrum,
            Arc::clone(q),
            Arc::clone(&enabled),
        )?);
    }
    if let (true, Some(q)) = (config.artifacts.position.enabled, &wiring.position_save_queue) {
        handles.push(spawn_position_persistence_consumer(
            &config.artifacts.position,
            Arc::clone(q),
            Arc::clone(&enabled),
        )?);
    }

    Ok(handles)
}

fn spawn_one_persistence_consumer(
    sink: &ArtifactSink,
    queue: Arc<Queue<ChannelFrame>>,
    enabled: Arc<AtomicBool>,
) -> UsblResult<JoinHandle<()>> {
    let mode = sink_mode(sink);
    let file = open_sink_file(&sink.path)?;
    let mut consumer = PersistenceConsumer::new(BufWriter::new(file), mode);

    log::info!("starting persistence consumer for {}", sink.path);
    Ok(std::thread::spawn(move || {
        consumer.run(&queue, &enabled);
    }))
}

fn spawn_position_persistence_consumer(
    sink: &ArtifactSink,
    queue: Arc<Queue<PositionFix>>,
    enabled: Arc<AtomicBool>,
) -> UsblResult<JoinHandle<()>> {
    let mode = sink_mode(sink);
    let file = open_sink_file(&sink.path)?;
    let mut consumer = PositionPersistenceConsumer::new(BufWriter::new(file), mode);

    log::info!("starting position persistence consumer for {}", sink.path);
    Ok(std::thread::spawn(move || {
        consumer.run(&queue, &enabled);
    }))
}

fn sink_mode(sink: &ArtifactSink) -> SinkMode {
    match sink.mode {
        SinkModeConfig::Text => SinkMode::Text,
        SinkModeConfig::Binary => SinkMode::Binary,
        SinkModeConfig::Hex => SinkMode::Hex,
    }
}

fn open_sink_file(path: &str) -> UsblResult<File> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(UsblError::Io)?;
        }
    }
    File::create(path).map_err(UsblError::Io)
}

fn wall_clock_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

// The cross-crate end-to-end position-fix scenario (ingest feeding the DSP worker exactly as
// `Supervisor::start` wires them) lives in tests/integration_test.rs, exercising only the
// public API of usbl-core/usbl-daq/usbl-dsp.
