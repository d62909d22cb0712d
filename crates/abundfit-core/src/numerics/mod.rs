pub mod continuum;
pub mod simplex;

pub use continuum::{
    ContinuumEstimate, ContinuumParams, LineBoundaries, equivalent_width, fit_continuum,
    line_boundaries,
};
pub use simplex::{Bounds, SimplexOptions, SimplexOutcome, minimize_bounded};

use crate::spectrum::Spectrum;

pub fn stable_sum(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut correction = 0.0;

    for &value in values {
        kahan_add(&mut sum, &mut correction, value);
    }

    sum
}

/// Sum of squared residuals between `reference` interpolated onto the trial
/// grid and the trial flux.
///
/// Trial samples outside the reference wavelength range are skipped.
pub fn chi_square(reference: &Spectrum, trial: &Spectrum) -> f64 {
    let mut sum = 0.0;
    let mut correction = 0.0;

    for (wavelength, flux) in trial.samples() {
        if let Some(expected) = reference.interpolate(wavelength) {
            let residual = expected - flux;
            kahan_add(&mut sum, &mut correction, residual * residual);
        }
    }

    sum
}

/// Trapezoid integral of `f(x_i, y_i)` over `samples[start..=end]`.
pub fn trapezoid(
    spectrum: &Spectrum,
    start: usize,
    end: usize,
    integrand: impl Fn(f64) -> f64,
) -> f64 {
    let x = spectrum.wavelength();
    let y = spectrum.flux();
    if end >= x.len() || start >= end {
        return 0.0;
    }

    let mut sum = 0.0;
    let mut correction = 0.0;
    for index in start..end {
        let area = 0.5 * (integrand(y[index]) + integrand(y[index + 1])) * (x[index + 1] - x[index]);
        kahan_add(&mut sum, &mut correction, area);
    }
    sum
}

fn kahan_add(sum: &mut f64, correction: &mut f64, value: f64) {
    let corrected = value - *correction;
    let next = *sum + corrected;
    *correction = (next - *sum) - corrected;
    *sum = next;
}

#[cfg(test)]
mod tests {
    use super::{chi_square, stable_sum, trapezoid};
    use crate::spectrum::Spectrum;

    fn dip(scale: f64) -> Spectrum {
        Spectrum::sampled(4999.0, 5001.0, 41, |x| {
            1.0 - scale * (-(x - 5000.0).powi(2) / 0.02).exp()
        })
        .expect("dip should be valid")
    }

    #[test]
    fn stable_sum_recovers_small_terms() {
        let mut values = vec![1.0e16];
        values.extend(std::iter::repeat_n(1.0, 1000));
        values.push(-1.0e16);
        assert_eq!(stable_sum(&values), 1000.0);
    }

    #[test]
    fn chi_square_is_zero_at_identity() {
        let spectrum = dip(0.4);
        assert_eq!(chi_square(&spectrum, &spectrum), 0.0);

        let near_zero = Spectrum::new(vec![1.0, 2.0, 3.0], vec![1e-300, 0.0, -1e-300])
            .expect("spectrum should be valid");
        assert_eq!(chi_square(&near_zero, &near_zero), 0.0);
    }

    #[test]
    fn chi_square_is_non_negative_and_grows_with_mismatch() {
        let reference = dip(0.4);
        let small = chi_square(&reference, &dip(0.41));
        let large = chi_square(&reference, &dip(0.6));
        assert!(small > 0.0);
        assert!(large > small);
    }

    #[test]
    fn chi_square_skips_trial_samples_outside_reference() {
        let reference = Spectrum::new(vec![1.0, 2.0, 3.0], vec![1.0, 1.0, 1.0])
            .expect("reference should be valid");
        let trial = Spectrum::new(vec![0.0, 1.5, 2.5, 4.0], vec![100.0, 0.5, 1.0, -100.0])
            .expect("trial should be valid");
        assert!((chi_square(&reference, &trial) - 0.25).abs() < 1e-15);
    }

    #[test]
    fn trapezoid_integrates_linear_flux_exactly() {
        let spectrum = Spectrum::new(vec![0.0, 1.0, 3.0], vec![0.0, 1.0, 3.0])
            .expect("spectrum should be valid");
        assert!((trapezoid(&spectrum, 0, 2, |y| y) - 4.5).abs() < 1e-12);
        assert_eq!(trapezoid(&spectrum, 2, 2, |y| y), 0.0);
        assert_eq!(trapezoid(&spectrum, 0, 5, |y| y), 0.0);
    }
}
