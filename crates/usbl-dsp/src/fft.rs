//! Forward/inverse complex FFT and FFT-based convolution.
//!
//! Uses `rustfft`'s complex planner rather than `realfft`: convolution lengths are
//! `len(a) + len(b) - 1`, rarely a power of two, and the signal is carried as the real part of a
//! complex buffer throughout — `FftPlanner` picks Bluestein's algorithm automatically for
//! non-composite lengths, so there is no length restriction to work around.

use rustfft::{num_complex::Complex, FftPlanner};

use usbl_core::{ChannelFrame, UsblError, UsblResult};

pub type Cplx = Complex<f64>;

/// In-place forward FFT of a real input, returned as a complex buffer.
pub fn fft_forward(input: &[f64]) -> Vec<Cplx> {
    let mut buf: Vec<Cplx> = input.iter().map(|&x| Complex::new(x, 0.0)).collect();
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(buf.len().max(1));
    fft.process(&mut buf);
    buf
}

/// In-place inverse FFT, normalized by `1/N`.
pub fn fft_inverse(input: &[Cplx]) -> Vec<Cplx> {
    let mut buf = input.to_vec();
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_inverse(buf.len().max(1));
    fft.process(&mut buf);
    let n = buf.len() as f64;
    for c in &mut buf {
        *c /= n;
    }
    buf
}

/// Full linear convolution of two real sequences, length `len(a) + len(b) - 1`.
pub fn conv_full_row(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let m = a.len() + b.len() - 1;
    let mut a_pad = vec![Complex::new(0.0, 0.0); m];
    let mut b_pad = vec![Complex::new(0.0, 0.0); m];
    for (i, &v) in a.iter().enumerate() {
        a_pad[i] = Complex::new(v, 0.0);
    }
    for (i, &v) in b.iter().enumerate() {
        b_pad[i] = Complex::new(v, 0.0);
    }

    let mut planner = FftPlanner::new();
    let fwd = planner.plan_fft_forward(m);
    fwd.process(&mut a_pad);
    fwd.process(&mut b_pad);
    for i in 0..m {
        a_pad[i] *= b_pad[i];
    }
    let inv = planner.plan_fft_inverse(m);
    inv.process(&mut a_pad);
    a_pad.iter().map(|c| c.re / m as f64).collect()
}

/// Row-wise full convolution of every channel against a shared kernel.
pub fn conv_full(a: &ChannelFrame, kernel: &[f64]) -> UsblResult<ChannelFrame> {
    if kernel.is_empty() {
        return Err(UsblError::InvalidArgument(
            "convolution kernel must be non-empty".into(),
        ));
    }
    let rows: Vec<Vec<f64>> = a
        .rows()
        .iter()
        .map(|row| conv_full_row(row, kernel))
        .collect();
    ChannelFrame::from_rows(rows)
}

/// Row-wise "valid" convolution: only the region where the kernel fully overlaps the input,
/// length `len(row) - len(kernel) + 1`.
pub fn conv_valid(a: &ChannelFrame, kernel: &[f64]) -> UsblResult<ChannelFrame> {
    let klen = kernel.len();
    let alen = a.samples_per_channel();
    if klen == 0 || alen < klen {
        return Err(UsblError::InvalidArgument(
            "convolution kernel longer than input row".into(),
        ));
    }
    let full = conv_full(a, kernel)?;
    let start = klen - 1;
    let end = start + (alen - klen); // inclusive
    let rows: Vec<Vec<f64>> = full
        .rows()
        .iter()
        .map(|row| row[start..=end].to_vec())
        .collect();
    ChannelFrame::from_rows(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fft_round_trip_recovers_input() {
        let input = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let spectrum = fft_forward(&input);
        let recovered = fft_inverse(&spectrum);
        for (a, b) in input.iter().zip(recovered.iter()) {
            assert_relative_eq!(*a, b.re, epsilon = 1e-9);
            assert_relative_eq!(b.im, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn fft_round_trip_handles_non_power_of_two_length() {
        let input: Vec<f64> = (0..37).map(|i| (i as f64 * 0.3).sin()).collect();
        let spectrum = fft_forward(&input);
        let recovered = fft_inverse(&spectrum);
        for (a, b) in input.iter().zip(recovered.iter()) {
            assert_relative_eq!(*a, b.re, epsilon = 1e-9);
        }
    }

    #[test]
    fn conv_full_matches_identity_kernel() {
        let a = vec![1.0, 2.0, 3.0];
        let identity = vec![1.0];
        let result = conv_full_row(&a, &identity);
        assert_eq!(result.len(), 3);
        for (a, b) in a.iter().zip(result.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn conv_valid_length_matches_spec_formula() {
        let frame = ChannelFrame::from_rows(vec![vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0]]).unwrap();
        let kernel = vec![1.0, 1.0, 1.0];
        let result = conv_valid(&frame, &kernel).unwrap();
        assert_eq!(result.samples_per_channel(), 6 - 3 + 1);
    }

    #[test]
    fn conv_valid_rejects_kernel_longer_than_row() {
        let frame = ChannelFrame::from_rows(vec![vec![1.0, 2.0]]).unwrap();
        let kernel = vec![1.0, 1.0, 1.0];
        assert!(conv_valid(&frame, &kernel).is_err());
    }
}
