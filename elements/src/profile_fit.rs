// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Locates the two edges of a slit in a one-dimensional edge profile.
//!
//! The profile is the X gradient of a slit image summed over the slit's rows.
//! A bright slit between two dark bars produces a positive peak where the
//! intensity rises (smaller X) and a negative peak where it falls (larger X).
//! We fit the sum of two Gaussians, one constrained to negative amplitude and
//! one to positive amplitude, with Levenberg-Marquardt:
//!
//! f(x) = An exp(-(x-mn)²/2sn²) + Ap exp(-(x-mp)²/2sp²)
//!
//! Parameters are ordered [An, mn, sn, Ap, mp, sp].

use log::debug;
use nalgebra::{Matrix6, Vector6};

/// Widest edge (Gaussian stddev, pixels) accepted as a bar edge.
pub const MAX_EDGE_STDDEV: f64 = 3.0;

/// Weakest edge amplitude accepted, in profile units.
pub const MIN_EDGE_AMPLITUDE: f64 = 1.0;

// Keeps sigma away from zero so the model stays differentiable.
const MIN_STDDEV: f64 = 0.05;

/// Configuration for Levenberg-Marquardt optimization.
#[derive(Debug, Clone)]
pub struct LMConfig {
    pub max_iterations: usize,
    /// Converged once every parameter step is below this fraction of the
    /// parameter's magnitude.
    pub convergence_threshold: f64,
    pub initial_lambda: f64,
    /// Factor to increase lambda on a rejected step.
    pub lambda_up: f64,
    /// Factor to decrease lambda on an accepted step.
    pub lambda_down: f64,
}

impl Default for LMConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            convergence_threshold: 1e-10,
            initial_lambda: 0.001,
            lambda_up: 10.0,
            lambda_down: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianComponent {
    pub amplitude: f64,
    pub mean: f64,
    pub stddev: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct EdgePairFit {
    /// Falling edge.
    pub negative: GaussianComponent,
    /// Rising edge.
    pub positive: GaussianComponent,
    pub chi2: f64,
    pub converged: bool,
    pub iterations: usize,
}

impl EdgePairFit {
    /// Determines whether the fit describes a real pair of bar edges: both
    /// edges narrow, both strong with the expected sign, and the falling edge
    /// to the right of the rising edge.
    pub fn passes_validity_gate(&self) -> bool {
        self.negative.stddev < MAX_EDGE_STDDEV &&
            self.positive.stddev < MAX_EDGE_STDDEV &&
            self.negative.amplitude < -MIN_EDGE_AMPLITUDE &&
            self.positive.amplitude > MIN_EDGE_AMPLITUDE &&
            self.negative.mean > self.positive.mean
    }
}

fn evaluate(x: f64, p: &Vector6<f64>) -> f64 {
    gaussian(x, p[0], p[1], p[2]) + gaussian(x, p[3], p[4], p[5])
}

fn gaussian(x: f64, amplitude: f64, mean: f64, stddev: f64) -> f64 {
    let d = x - mean;
    amplitude * (-0.5 * d * d / (stddev * stddev)).exp()
}

fn jacobian_row(x: f64, p: &Vector6<f64>) -> Vector6<f64> {
    let mut row = Vector6::zeros();
    for k in 0..2 {
        let (amp, mean, stddev) = (p[3 * k], p[3 * k + 1], p[3 * k + 2]);
        let d = x - mean;
        let s2 = stddev * stddev;
        let e = (-0.5 * d * d / s2).exp();
        row[3 * k] = e;                                 // df/damp
        row[3 * k + 1] = amp * e * d / s2;              // df/dmean
        row[3 * k + 2] = amp * e * d * d / (s2 * stddev);  // df/dstddev
    }
    row
}

fn constrain(p: &mut Vector6<f64>) {
    p[0] = p[0].min(0.0);
    p[3] = p[3].max(0.0);
    p[2] = p[2].abs().max(MIN_STDDEV);
    p[5] = p[5].abs().max(MIN_STDDEV);
}

fn compute_chi2(profile: &[f64], p: &Vector6<f64>) -> f64 {
    profile.iter().enumerate()
        .map(|(x, &z)| {
            let r = z - evaluate(x as f64, p);
            r * r
        })
        .sum()
}

/// Fits the dual-Gaussian edge model to `profile` (sampled at x = 0, 1, ...).
///
/// The negative component is seeded at the profile minimum and the positive
/// component at the profile maximum. Returns None if the profile is too short
/// to constrain six parameters.
pub fn fit_edge_pair(profile: &[f64], config: &LMConfig) -> Option<EdgePairFit> {
    if profile.len() < 6 {
        return None;
    }
    let (min_index, min_value) = extremum(profile, |a, b| a < b);
    let (max_index, max_value) = extremum(profile, |a, b| a > b);
    let mut params = Vector6::new(
        if min_value < 0.0 { min_value } else { -1.0 }, min_index as f64, 1.0,
        if max_value > 0.0 { max_value } else { 1.0 }, max_index as f64, 1.0);

    let mut lambda = config.initial_lambda;
    let mut prev_chi2 = compute_chi2(profile, &params);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        let mut hessian = Matrix6::<f64>::zeros();
        let mut gradient = Vector6::<f64>::zeros();
        for (x, &z) in profile.iter().enumerate() {
            let x = x as f64;
            let row = jacobian_row(x, &params);
            let residual = z - evaluate(x, &params);
            gradient += row * residual;
            hessian += row * row.transpose();
        }

        let mut damped = hessian;
        for i in 0..6 {
            // The small additive term keeps the system solvable when an
            // amplitude is pinned at zero.
            damped[(i, i)] = hessian[(i, i)] * (1.0 + lambda) + 1e-12;
        }
        let Some(delta) = damped.lu().solve(&gradient) else {
            lambda *= config.lambda_up;
            if lambda > 1e10 {
                break;
            }
            continue;
        };

        let mut new_params = params + delta;
        constrain(&mut new_params);
        let new_chi2 = compute_chi2(profile, &new_params);

        if new_chi2 < prev_chi2 {
            let step = new_params - params;
            params = new_params;
            lambda *= config.lambda_down;
            prev_chi2 = new_chi2;

            let small_step = step.iter().zip(params.iter()).all(
                |(d, p)| d.abs() <= config.convergence_threshold * (p.abs() + 1.0));
            if small_step {
                converged = true;
                break;
            }
        } else {
            lambda *= config.lambda_up;
            if lambda > 1e10 {
                // No downhill step left; we are at the minimum.
                converged = true;
                break;
            }
        }
    }

    let fit = EdgePairFit{
        negative: GaussianComponent{amplitude: params[0], mean: params[1],
                                    stddev: params[2]},
        positive: GaussianComponent{amplitude: params[3], mean: params[4],
                                    stddev: params[5]},
        chi2: prev_chi2,
        converged,
        iterations,
    };
    debug!("Edge fit after {} iterations: {:?}", iterations, fit);
    Some(fit)
}

/// Returns the (falling, rising) edge positions in `profile`, or
/// (None, None) if the fit fails the validity gate.
pub fn locate_edges(profile: &[f64], config: &LMConfig) -> (Option<f64>, Option<f64>) {
    match fit_edge_pair(profile, config) {
        Some(fit) if fit.passes_validity_gate() => {
            (Some(fit.negative.mean), Some(fit.positive.mean))
        },
        _ => (None, None),
    }
}

// First index where `better` holds against every other value.
fn extremum(values: &[f64], better: fn(f64, f64) -> bool) -> (usize, f64) {
    let mut best_index = 0;
    let mut best_value = values[0];
    for (i, &v) in values.iter().enumerate().skip(1) {
        if better(v, best_value) {
            best_index = i;
            best_value = v;
        }
    }
    (best_index, best_value)
}

// mod tests.
