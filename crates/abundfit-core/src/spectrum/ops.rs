use super::Spectrum;
use crate::numerics::stable_sum;
use tracing::debug;

/// `2 sqrt(2 ln 2)`, the FWHM of a unit-sigma Gaussian.
pub const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_3;

const MAX_KERNEL_SAMPLES: usize = 100_001;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("gaussian kernel sigma must be finite and >= 0, got {value}")]
    InvalidSigma { value: f64 },
    #[error("gaussian kernel with sigma {sigma} exceeds {limit} samples")]
    TooWide { sigma: f64, limit: usize },
}

/// Normalized Gaussian kernel sampled at integer offsets.
///
/// The kernel spans `8 sigma` rounded up to the next odd sample count.
pub fn gaussian_kernel(sigma: f64) -> Result<Vec<f64>, KernelError> {
    if !sigma.is_finite() || sigma < 0.0 {
        return Err(KernelError::InvalidSigma { value: sigma });
    }

    let span = (8.0 * sigma).ceil();
    if span >= MAX_KERNEL_SAMPLES as f64 {
        return Err(KernelError::TooWide {
            sigma,
            limit: MAX_KERNEL_SAMPLES,
        });
    }
    let span = span as usize;
    let samples = if span % 2 == 0 { span + 1 } else { span };
    if samples <= 1 {
        return Ok(vec![1.0]);
    }

    let half = (samples / 2) as f64;
    let weights: Vec<f64> = (0..samples)
        .map(|index| {
            let offset = index as f64 - half;
            (-offset * offset / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let total = stable_sum(&weights);
    Ok(weights.into_iter().map(|weight| weight / total).collect())
}

/// Discrete convolution with the edge samples repeated past both ends.
pub fn convolve_extended(values: &[f64], kernel: &[f64]) -> Vec<f64> {
    if values.is_empty() || kernel.len() <= 1 {
        return values.to_vec();
    }

    let last = values.len() as isize - 1;
    let half = (kernel.len() / 2) as isize;
    (0..values.len() as isize)
        .map(|center| {
            let terms: Vec<f64> = kernel
                .iter()
                .enumerate()
                .map(|(offset, weight)| {
                    let index = (center + offset as isize - half).clamp(0, last);
                    weight * values[index as usize]
                })
                .collect();
            stable_sum(&terms)
        })
        .collect()
}

/// Moves a spectrum by `shift`, scales its flux by `continuum_scale` and
/// broadens it with a Gaussian of FWHM `convolution_width` (in samples).
///
/// A zero width skips the broadening; a width the kernel builder rejects is
/// treated the same way.
pub fn shift_scale_convolve(
    spectrum: &Spectrum,
    shift: f64,
    continuum_scale: f64,
    convolution_width: f64,
) -> Spectrum {
    let wavelength = spectrum.wavelength().iter().map(|x| x + shift).collect();
    let mut flux: Vec<f64> = spectrum
        .flux()
        .iter()
        .map(|y| y * continuum_scale)
        .collect();

    if convolution_width != 0.0 {
        match gaussian_kernel(convolution_width / FWHM_PER_SIGMA) {
            Ok(kernel) => flux = convolve_extended(&flux, &kernel),
            Err(error) => debug!(%error, "skipping convolution"),
        }
    }

    Spectrum::from_valid_parts(wavelength, flux)
}
