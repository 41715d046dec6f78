//! zdFF: motion- and bleaching-corrected, standardized fluorescence.
//!
//! The reference (isosbestic) and signal channels are smoothed, their slow
//! baselines are estimated with adaptive iteratively reweighted penalized
//! least squares (airPLS) and subtracted, both are robustly standardized, and
//! the reference is regressed onto the signal with a non-negative Lasso fit.
//! zdFF is the standardized signal minus the fitted reference.

use ndarray::{s, Array1};

use crate::types::{AnalysisTable, PhotometryError};

/// Rows at the start of a recording excluded from normalization by default
pub const DEFAULT_N_REMOVE: usize = 5000;
/// Samples dropped from the start of the baseline-corrected traces
pub const DEFAULT_EDGE_TRIM: usize = 1;

/// Tuning of the baseline and regression steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineParams {
    /// Smoothness penalty of the airPLS baseline
    pub lambda: f64,
    /// Iteration cap of airPLS
    pub max_iterations: usize,
    /// L1 penalty of the reference-to-signal fit
    pub lasso_alpha: f64,
}

impl Default for BaselineParams {
    fn default() -> Self {
        BaselineParams {
            lambda: 5e4,
            max_iterations: 50,
            lasso_alpha: 1e-4,
        }
    }
}

/// Computes zdFF on the rows after `n_remove` and merges it onto the full table.
///
/// The smoothing window is one second of samples, estimated from the last
/// elapsed-time step of the table. Rows before `n_remove + edge_trim` have no
/// computed value and are set to `0.0`.
///
/// # Errors
///
/// [`PhotometryError::InsufficientData`] if too few rows remain after `n_remove`.
pub fn calculate_zdff(
    mut table: AnalysisTable,
    n_remove: usize,
    edge_trim: usize,
    params: &BaselineParams,
) -> Result<AnalysisTable, PhotometryError> {
    let rows = table.len();
    let available = rows.saturating_sub(n_remove);
    if available < 2 {
        return Err(PhotometryError::InsufficientData {
            required: n_remove + 2,
            available: rows,
        });
    }

    let last_step = table.elapsed_seconds[rows - 1] - table.elapsed_seconds[rows - 2];
    let one_second = (1.0 / last_step).round().max(1.0) as usize;
    let required = one_second.max(edge_trim + 2);
    if available < required {
        return Err(PhotometryError::InsufficientData {
            required,
            available,
        });
    }

    log::debug!(
        "Computing zdFF over rows {}..{} (smoothing window {} samples)",
        n_remove,
        rows,
        one_second
    );

    let reference = table.channel_a.slice(s![n_remove..]).to_vec();
    let signal = table.channel_b.slice(s![n_remove..]).to_vec();
    let zdff = compute_zdff(&reference, &signal, one_second, edge_trim, params)?;

    table.normalized_signal = Some(merge_onto_rows(rows, n_remove + edge_trim, zdff)?);
    Ok(table)
}

/// Places `values` at the end of a `rows`-long column, zero-filling the
/// `first_filled` rows before them.
fn merge_onto_rows(
    rows: usize,
    first_filled: usize,
    values: Vec<f64>,
) -> Result<Array1<f64>, PhotometryError> {
    if first_filled + values.len() != rows {
        return Err(PhotometryError::Alignment(format!(
            "{} zdFF values starting at row {} do not end at row {}",
            values.len(),
            first_filled,
            rows
        )));
    }
    let mut column = Array1::zeros(rows);
    column
        .slice_mut(s![first_filled..])
        .assign(&Array1::from(values));
    Ok(column)
}

/// Computes zdFF from a reference and a signal trace of equal length.
///
/// Returns `reference.len() - edge_trim` values.
pub fn compute_zdff(
    reference: &[f64],
    signal: &[f64],
    smooth_window: usize,
    edge_trim: usize,
    params: &BaselineParams,
) -> Result<Vec<f64>, PhotometryError> {
    if reference.len() != signal.len() {
        return Err(PhotometryError::Alignment(format!(
            "reference has {} samples but signal has {}",
            reference.len(),
            signal.len()
        )));
    }
    let n = reference.len();
    let required = smooth_window.max(edge_trim + 2);
    if n < required {
        return Err(PhotometryError::InsufficientData {
            required,
            available: n,
        });
    }

    let reference = smooth(reference, smooth_window);
    let signal = smooth(signal, smooth_window);

    let reference_base = airpls_baseline(&reference, params.lambda, params.max_iterations);
    let signal_base = airpls_baseline(&signal, params.lambda, params.max_iterations);

    let reference: Vec<f64> = reference
        .iter()
        .zip(&reference_base)
        .skip(edge_trim)
        .map(|(x, b)| x - b)
        .collect();
    let signal: Vec<f64> = signal
        .iter()
        .zip(&signal_base)
        .skip(edge_trim)
        .map(|(x, b)| x - b)
        .collect();

    let z_reference = standardize(&reference);
    let z_signal = standardize(&signal);

    let (slope, intercept) = positive_lasso_fit(&z_reference, &z_signal, params.lasso_alpha);
    log::debug!("Reference fit: slope {:.4}, intercept {:.4}", slope, intercept);

    Ok(z_signal
        .iter()
        .zip(&z_reference)
        .map(|(s, r)| s - (slope * r + intercept))
        .collect())
}

/// Centred flat moving average with mirror-reflected edges.
///
/// Windows shorter than 3 samples return the input unchanged. The window must
/// not be longer than the input.
pub fn smooth(x: &[f64], window: usize) -> Vec<f64> {
    let n = x.len();
    if window < 3 || n < window {
        return x.to_vec();
    }

    // x[w-1], ..., x[1], x[0..n], x[n-2], ..., x[n-w]
    let mut padded = Vec::with_capacity(n + 2 * (window - 1));
    padded.extend(x[1..window].iter().rev());
    padded.extend_from_slice(x);
    padded.extend(x[n - window..n - 1].iter().rev());

    let mut prefix = Vec::with_capacity(padded.len() + 1);
    prefix.push(0.0);
    let mut acc = 0.0;
    for v in &padded {
        acc += v;
        prefix.push(acc);
    }

    let offset = (window - 1) / 2;
    let width = window as f64;
    (0..n)
        .map(|i| (prefix[offset + i + window] - prefix[offset + i]) / width)
        .collect()
}

/// Estimates the baseline of `x` with airPLS and a first-order difference penalty.
pub fn airpls_baseline(x: &[f64], lambda: f64, max_iterations: usize) -> Vec<f64> {
    let m = x.len();
    if m < 2 {
        return x.to_vec();
    }

    let total: f64 = x.iter().map(|v| v.abs()).sum();
    let mut weights = vec![1.0; m];
    let mut baseline = x.to_vec();

    for iteration in 1..=max_iterations.max(1) {
        baseline = whittaker_smooth(x, &weights, lambda);

        let residual: Vec<f64> = x.iter().zip(&baseline).map(|(v, z)| v - z).collect();
        let dssn: f64 = residual.iter().filter(|d| **d < 0.0).sum::<f64>().abs();

        if dssn < 0.001 * total || dssn == 0.0 {
            break;
        }
        if iteration >= max_iterations {
            log::warn!("airPLS reached {} iterations without converging", max_iterations);
            break;
        }

        let step = iteration as f64;
        let mut max_negative = f64::MIN;
        for (w, d) in weights.iter_mut().zip(&residual) {
            if *d >= 0.0 {
                *w = 0.0;
            } else {
                *w = (step * d.abs() / dssn).exp();
                max_negative = max_negative.max(*d);
            }
        }
        let edge = (step * max_negative / dssn).exp();
        weights[0] = edge;
        weights[m - 1] = edge;
    }

    baseline
}

/// Solves `(W + lambda * D'D) z = W x` for a first-order difference matrix `D`.
///
/// The system is tridiagonal and symmetric positive definite whenever any
/// weight is positive, so it is solved directly with the Thomas algorithm.
fn whittaker_smooth(x: &[f64], weights: &[f64], lambda: f64) -> Vec<f64> {
    let n = x.len();
    let off = -lambda;
    let diagonal = |i: usize| {
        let penalty = if i == 0 || i == n - 1 { 1.0 } else { 2.0 };
        weights[i] + lambda * penalty
    };

    let mut c_prime = vec![0.0; n];
    let mut d_prime = vec![0.0; n];
    let first = diagonal(0);
    c_prime[0] = off / first;
    d_prime[0] = weights[0] * x[0] / first;
    for i in 1..n {
        let m = diagonal(i) - off * c_prime[i - 1];
        c_prime[i] = off / m;
        d_prime[i] = (weights[i] * x[i] - off * d_prime[i - 1]) / m;
    }

    let mut z = vec![0.0; n];
    z[n - 1] = d_prime[n - 1];
    for i in (0..n - 1).rev() {
        z[i] = d_prime[i] - c_prime[i] * z[i + 1];
    }
    z
}

/// `(x - median) / std`, with the population standard deviation.
///
/// A constant trace is only centred.
fn standardize(x: &[f64]) -> Vec<f64> {
    let centre = median(x);
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    let std = (x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    let scale = if std > 0.0 { std } else { 1.0 };
    x.iter().map(|v| (v - centre) / scale).collect()
}

fn median(x: &[f64]) -> f64 {
    let mut sorted = x.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Fits `y ~ slope * x + intercept` minimizing
/// `1/(2n) |y - slope x - intercept|^2 + alpha |slope|` with `slope >= 0`.
fn positive_lasso_fit(x: &[f64], y: &[f64], alpha: f64) -> (f64, f64) {
    let n = x.len() as f64;
    let x_mean = x.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        sxx += (xi - x_mean) * (xi - x_mean);
        sxy += (xi - x_mean) * (yi - y_mean);
    }
    sxx /= n;
    sxy /= n;

    let slope = if sxx > 0.0 {
        (sxy - alpha).max(0.0) / sxx
    } else {
        0.0
    };
    (slope, y_mean - slope * x_mean)
}
