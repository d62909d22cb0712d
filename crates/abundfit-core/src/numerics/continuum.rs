//! Continuum level estimation by iterative sigma clipping, and the line
//! window and equivalent width measurements built on it.

use super::{stable_sum, trapezoid};
use crate::domain::{FitError, FitResult};
use crate::spectrum::Spectrum;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ContinuumParams {
    /// Half width of the kept band, in standard deviations.
    pub alpha: f64,
    /// Clipping stops once the relative drop of the spread is at most `eps`.
    pub eps: f64,
}

impl Default for ContinuumParams {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            eps: 1e-20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuumEstimate {
    pub level: f64,
    pub spread: f64,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineBoundaries {
    pub left: usize,
    pub right: usize,
    pub continuum: ContinuumEstimate,
}

pub fn fit_continuum(
    flux: &[f64],
    params: ContinuumParams,
    max_iter: usize,
) -> FitResult<ContinuumEstimate> {
    if flux.is_empty() {
        return Err(FitError::computation(
            "RUN.CONTINUUM_EMPTY",
            "continuum estimation needs at least one flux sample",
        ));
    }

    let mut kept = flux.to_vec();
    let (mut level, mut spread) = median_and_deviation(&mut kept);
    let mut iterations = 0;

    let converged = loop {
        let low = level - params.alpha * spread;
        let high = level + params.alpha * spread;
        let mut next: Vec<f64> = kept
            .iter()
            .copied()
            .filter(|value| low <= *value && *value <= high)
            .collect();
        if next.is_empty() {
            debug!(iterations, "sigma clipping would drop every sample");
            break false;
        }

        let previous_spread = spread;
        (level, spread) = median_and_deviation(&mut next);
        kept = next;
        iterations += 1;

        if iterations >= max_iter {
            warn!(
                iterations,
                level, spread, "continuum estimate hit the iteration limit before converging"
            );
            break false;
        }
        if spread == 0.0 || (previous_spread - spread) / spread <= params.eps {
            break true;
        }
    };

    Ok(ContinuumEstimate {
        level,
        spread,
        iterations,
        converged,
    })
}

/// Indices around `center` where the flux first climbs back to
/// `threshold * continuum` on each side, or the spectrum edges.
pub fn line_boundaries(
    spectrum: &Spectrum,
    center: f64,
    threshold: f64,
    params: ContinuumParams,
    max_iter: usize,
) -> FitResult<LineBoundaries> {
    let lower = spectrum.bisect(center).ok_or_else(|| {
        FitError::computation(
            "RUN.INFEASIBLE_RANGE",
            format!("line center {center} is outside the measured window"),
        )
    })?;
    let x = spectrum.wavelength();
    let start = if (x[lower + 1] - center).abs() < (center - x[lower]).abs() {
        lower + 1
    } else {
        lower
    };

    let continuum = fit_continuum(spectrum.flux(), params, max_iter)?;
    let limit = threshold * continuum.level;
    let flux = spectrum.flux();

    let mut left = start;
    while left > 0 {
        left -= 1;
        if flux[left] >= limit {
            break;
        }
    }
    let mut right = start;
    while right + 1 < flux.len() {
        right += 1;
        if flux[right] >= limit {
            break;
        }
    }

    Ok(LineBoundaries {
        left,
        right,
        continuum,
    })
}

/// Integral of `1 - flux / continuum` between the line boundaries.
///
/// A zero or non-finite continuum level yields a width of zero.
pub fn equivalent_width(spectrum: &Spectrum, boundaries: &LineBoundaries) -> f64 {
    let level = boundaries.continuum.level;
    if level == 0.0 || !level.is_finite() {
        debug!(level, "degenerate continuum level, equivalent width set to zero");
        return 0.0;
    }
    trapezoid(spectrum, boundaries.left, boundaries.right, |flux| {
        1.0 - flux / level
    })
}

fn median_and_deviation(values: &mut [f64]) -> (f64, f64) {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    let median = if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    };

    let mean = stable_sum(values) / n as f64;
    let squares: Vec<f64> = values.iter().map(|value| (value - mean).powi(2)).collect();
    (median, (stable_sum(&squares) / n as f64).sqrt())
}
