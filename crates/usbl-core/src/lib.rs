//! usbl-core: shared types used across every USBL crate
//!
//! Provides the queue, channel frame, position fix, AGC state, and the crate-wide
//! error taxonomy that the DSP, DAQ, and I/O crates all build on.

mod agc;
mod error;
mod frame;
mod position;

pub use agc::AgcState;
pub use error::{UsblError, UsblResult};
pub use frame::ChannelFrame;
pub use position::PositionFix;

pub mod queue;
pub use queue::Queue;
