//! usbl-io: the I/O-facing consumers of the pipeline — TCP streaming, the serial fix
//! emitter, the AGC worker, and the per-artifact persistence consumers. All
//! four drain a [`usbl_core::Queue`] on their own thread and share the minimal [`SerialLink`]
//! abstraction so serial-backed workers can run against a loopback test double.

mod agc_worker;
mod fix_emitter;
mod persistence;
mod serial;
mod tcp;
mod wire;

pub use agc_worker::{format_dac_command, AgcWorker};
pub use fix_emitter::FixEmitter;
pub use persistence::{PersistenceConsumer, PositionPersistenceConsumer, SinkMode};
pub use serial::{LoopbackSerialPort, SerialLink, SerialPortLink};
pub use tcp::{StreamerPhase, TcpStreamer};
pub use wire::{WireFrame, SIGNAL_TYPE_DATA, SIGNAL_TYPE_HEARTBEAT, SIGNAL_TYPE_HEARTBEAT_ACK};
