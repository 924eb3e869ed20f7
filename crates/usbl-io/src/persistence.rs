//! Persistence consumers: one thread per bound artifact queue, draining frames to a file
//! sink in text, binary, or hex mode.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use usbl_core::{ChannelFrame, PositionFix, Queue};

const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    Text,
    Binary,
    Hex,
}

pub struct PersistenceConsumer<W: Write> {
    sink: W,
    mode: SinkMode,
}

impl<W: Write> PersistenceConsumer<W> {
    pub fn new(sink: W, mode: SinkMode) -> Self {
        Self { sink, mode }
    }

    /// Write one frame to the sink: text mode is space-separated `%-15.9f` fields, one
    /// row per channel, flushed every record; binary mode is the raw little-endian double array,
    /// row-major; hex mode is each little-endian double rendered as 16 hex digits.
    pub fn write_frame(&mut self, frame: &ChannelFrame) -> std::io::Result<()> {
        match self.mode {
            SinkMode::Text => {
                for row in frame.rows() {
                    let line: Vec<String> = row.iter().map(|v| format!("{v:<15.9}")).collect();
                    writeln!(self.sink, "{}", line.join(" "))?;
                }
                self.sink.flush()
            }
            SinkMode::Binary => {
                for row in frame.rows() {
                    for v in row {
                        self.sink.write_all(&v.to_le_bytes())?;
                    }
                }
                self.sink.flush()
            }
            SinkMode::Hex => {
                for row in frame.rows() {
                    let line: Vec<String> = row
                        .iter()
                        .map(|v| format!("{:016X}", v.to_bits()))
                        .collect();
                    writeln!(self.sink, "{}", line.join(" "))?;
                }
                self.sink.flush()
            }
        }
    }

    /// Drain `queue` until `enabled` is cleared. Polls with `try_pop` rather than blocking on
    /// `wait_and_pop`, which would never wake up once the queue runs dry at shutdown.
    pub fn run(&mut self, queue: &Queue<ChannelFrame>, enabled: &AtomicBool) {
        while enabled.load(Ordering::Acquire) {
            let Some(frame) = queue.try_pop() else {
                std::thread::sleep(QUEUE_POLL_INTERVAL);
                continue;
            };
            if let Err(err) = self.write_frame(&frame) {
                log::error!("persistence sink write failed: {err}");
            }
        }
    }
}

/// Persists position fixes (the one artifact stream that isn't a [`ChannelFrame`]). Text
/// mode writes one `%-15.9f`-style field per attribute; binary mode writes the six `f64` fields
/// little-endian in declaration order.
pub struct PositionPersistenceConsumer<W: Write> {
    sink: W,
    mode: SinkMode,
}

impl<W: Write> PositionPersistenceConsumer<W> {
    pub fn new(sink: W, mode: SinkMode) -> Self {
        Self { sink, mode }
    }

    pub fn write_fix(&mut self, fix: &PositionFix) -> std::io::Result<()> {
        match self.mode {
            SinkMode::Text | SinkMode::Hex => {
                let fields = [fix.time, fix.x, fix.y, fix.z, fix.tof, fix.doa];
                let line: Vec<String> = fields.iter().map(|v| format!("{v:<15.9}")).collect();
                writeln!(self.sink, "{}", line.join(" "))?;
                self.sink.flush()
            }
            SinkMode::Binary => {
                for v in [fix.time, fix.x, fix.y, fix.z, fix.tof, fix.doa] {
                    self.sink.write_all(&v.to_le_bytes())?;
                }
                self.sink.flush()
            }
        }
    }

    /// Polls with `try_pop` for the same reason as [`PersistenceConsumer::run`]: a blocking pop
    /// would never notice `enabled` going false once the queue is empty.
    pub fn run(&mut self, queue: &Queue<PositionFix>, enabled: &AtomicBool) {
        while enabled.load(Ordering::Acquire) {
            let Some(fix) = queue.try_pop() else {
                std::thread::sleep(QUEUE_POLL_INTERVAL);
                continue;
            };
            if let Err(err) = self.write_fix(&fix) {
                log::error!("position persistence sink write failed: {err}");
            }
        }
    }
}
