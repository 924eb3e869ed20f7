//! Multi-channel sample buffer — the universal payload moving through every queue in this system.

use crate::error::{UsblError, UsblResult};

/// A `C x N` real matrix in row-per-channel order, plus a validity flag.
///
/// Once published onto a queue a frame is never mutated again; all rows share one length, and
/// row count matches the ingest channel span `highChan - lowChan + 1`. `resize` is the only
/// place dimensions legitimately change, and it always re-zeros.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFrame {
    channels: Vec<Vec<f64>>,
    valid: bool,
}

impl ChannelFrame {
    /// Allocate `channel_count` rows of `samples_per_channel` zeros.
    pub fn new(channel_count: usize, samples_per_channel: usize) -> Self {
        Self {
            channels: vec![vec![0.0; samples_per_channel]; channel_count],
            valid: true,
        }
    }

    /// Build a frame from already-deinterleaved rows. All rows must share one length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> UsblResult<Self> {
        let len = rows.first().map_or(0, |r| r.len());
        if rows.iter().any(|r| r.len() != len) {
            return Err(UsblError::InvalidArgument(
                "channel rows must share one length".into(),
            ));
        }
        Ok(Self {
            channels: rows,
            valid: true,
        })
    }

    /// A single-channel frame wrapping one row, used for the reference waveform and TOF/DOA
    /// intermediates that only ever have one logical channel.
    pub fn from_single_row(row: Vec<f64>) -> Self {
        Self {
            channels: vec![row],
            valid: true,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn samples_per_channel(&self) -> usize {
        self.channels.first().map_or(0, |r| r.len())
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn mark_invalid(&mut self) {
        self.valid = false;
    }

    pub fn row(&self, channel: usize) -> &[f64] {
        &self.channels[channel]
    }

    pub fn row_mut(&mut self, channel: usize) -> &mut [f64] {
        &mut self.channels[channel]
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.channels
    }

    /// Reallocate to `(channel_count, samples_per_channel)`, re-zeroing every sample.
    pub fn resize(&mut self, channel_count: usize, samples_per_channel: usize) {
        self.channels = vec![vec![0.0; samples_per_channel]; channel_count];
    }

    /// Scale every sample in place.
    pub fn scale(&mut self, factor: f64) {
        for row in &mut self.channels {
            for sample in row.iter_mut() {
                *sample *= factor;
            }
        }
    }

    /// Divide every sample in place. Fails rather than producing `inf`/`NaN`.
    pub fn scale_div(&mut self, divisor: f64) -> UsblResult<()> {
        if divisor == 0.0 {
            return Err(UsblError::InvalidArgument(
                "division by zero in ChannelFrame::scale_div".into(),
            ));
        }
        self.scale(1.0 / divisor);
        Ok(())
    }
}
