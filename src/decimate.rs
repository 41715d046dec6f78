//! Integer-factor sample-rate reduction with an FIR anti-aliasing filter.
//!
//! The filter is a Hamming-windowed sinc of order `20 * factor` (201 taps for
//! a factor of 10) with its cutoff at the Nyquist frequency of the decimated
//! rate, normalized to unity gain at DC.
//! It is applied zero-phase: the kernel is centred on every kept sample and
//! samples beyond either edge count as zero. The output therefore has
//! `ceil(n / factor)` samples with no group delay.

use ndarray::Array1;
use std::f64::consts::PI;

use crate::types::PhotometryError;

/// Filter order per unit of decimation factor
const ORDER_PER_FACTOR: usize = 20;

/// Designs the low-pass kernel for a decimation factor.
///
/// The kernel has `20 * factor + 1` taps.
pub fn design_lowpass(factor: usize) -> Vec<f64> {
    let num_taps = ORDER_PER_FACTOR * factor + 1;
    let cutoff = 1.0 / factor as f64; // fraction of Nyquist
    let centre = (num_taps - 1) as f64 / 2.0;

    let mut taps: Vec<f64> = (0..num_taps)
        .map(|n| {
            let m = n as f64 - centre;
            let window = 0.54 - 0.46 * (2.0 * PI * n as f64 / (num_taps - 1) as f64).cos();
            cutoff * sinc(cutoff * m) * window
        })
        .collect();

    let gain: f64 = taps.iter().sum();
    for tap in taps.iter_mut() {
        *tap /= gain;
    }
    taps
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Decimates one channel by `factor`.
///
/// Returns the filtered, downsampled channel and the new sampling interval
/// `factor / fs`. A factor of 1 returns the input unchanged.
pub fn decimate(
    channel: &Array1<f64>,
    sample_rate: f64,
    factor: usize,
) -> Result<(Array1<f64>, f64), PhotometryError> {
    check_parameters(sample_rate, factor)?;
    let interval = factor as f64 / sample_rate;
    if factor == 1 {
        return Ok((channel.clone(), 1.0 / sample_rate));
    }
    let taps = design_lowpass(factor);
    Ok((apply_decimation(channel, &taps, factor), interval))
}

/// Decimates both photometry channels with the same kernel so their relative
/// phase is preserved.
pub fn decimate_pair(
    channel_a: &Array1<f64>,
    channel_b: &Array1<f64>,
    sample_rate: f64,
    factor: usize,
) -> Result<(Array1<f64>, Array1<f64>, f64), PhotometryError> {
    check_parameters(sample_rate, factor)?;
    if factor == 1 {
        return Ok((channel_a.clone(), channel_b.clone(), 1.0 / sample_rate));
    }

    let taps = design_lowpass(factor);
    let a = apply_decimation(channel_a, &taps, factor);
    let b = apply_decimation(channel_b, &taps, factor);
    log::debug!(
        "Decimated {} samples to {} (factor {}, {:.4} Hz)",
        channel_a.len(),
        a.len(),
        factor,
        sample_rate / factor as f64
    );
    Ok((a, b, factor as f64 / sample_rate))
}

fn check_parameters(sample_rate: f64, factor: usize) -> Result<(), PhotometryError> {
    if factor == 0 {
        return Err(PhotometryError::Config(
            "decimation factor must be at least 1".to_string(),
        ));
    }
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(PhotometryError::Config(format!(
            "sample rate must be positive, got {}",
            sample_rate
        )));
    }
    Ok(())
}

fn apply_decimation(channel: &Array1<f64>, taps: &[f64], factor: usize) -> Array1<f64> {
    let n = channel.len();
    let half = (taps.len() - 1) / 2;
    let out_len = n.div_ceil(factor);

    Array1::from_shape_fn(out_len, |m| {
        let centre = m * factor;
        let mut acc = 0.0;
        for (k, tap) in taps.iter().enumerate() {
            // input index = centre + half - k, skipped outside [0, n)
            let idx = centre + half;
            if idx < k {
                continue;
            }
            let idx = idx - k;
            if idx >= n {
                continue;
            }
            acc += tap * channel[idx];
        }
        acc
    })
}
