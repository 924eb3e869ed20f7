//! usbl-app: configuration loading and process supervision that wire the DAQ, DSP,
//! and I/O crates into one running system. The `usbl` binary is the thin CLI shell around
//! this crate.

mod config;
mod supervisor;

pub use config::{
    AgcConfig, ArrayConfig, ArtifactSink, ArtifactSinks, AppConfig, DaqConfig, ProcessConfig,
    SerialConfig, SinkModeConfig, TcpConfig, WorkMode,
};
pub use supervisor::Supervisor;
