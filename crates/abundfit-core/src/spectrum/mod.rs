//! Sampled spectra and the array operations the fitter runs on them.
//!
//! A [`Spectrum`] always holds finite samples on a strictly increasing
//! wavelength axis; every constructor checks this so that [`Spectrum::bisect`]
//! can rely on it.

mod ops;
mod parser;

pub use ops::{
    FWHM_PER_SIGMA, KernelError, convolve_extended, gaussian_kernel, shift_scale_convolve,
};
pub use parser::{SpectrumParseError, load_spectrum, parse_spectrum};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpectrumError {
    #[error("spectrum column length mismatch: wavelength={wavelength}, flux={flux}")]
    LengthMismatch { wavelength: usize, flux: usize },
    #[error("spectrum sample {index} is not finite ({wavelength}, {flux})")]
    NonFiniteSample {
        index: usize,
        wavelength: f64,
        flux: f64,
    },
    #[error(
        "spectrum wavelengths must be strictly increasing, index {index} has {current} after {previous}"
    )]
    NonIncreasingWavelength {
        index: usize,
        previous: f64,
        current: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Spectrum {
    wavelength: Vec<f64>,
    flux: Vec<f64>,
}

impl Spectrum {
    pub fn new(wavelength: Vec<f64>, flux: Vec<f64>) -> Result<Self, SpectrumError> {
        if wavelength.len() != flux.len() {
            return Err(SpectrumError::LengthMismatch {
                wavelength: wavelength.len(),
                flux: flux.len(),
            });
        }

        for (index, (&x, &y)) in wavelength.iter().zip(&flux).enumerate() {
            if !x.is_finite() || !y.is_finite() {
                return Err(SpectrumError::NonFiniteSample {
                    index,
                    wavelength: x,
                    flux: y,
                });
            }
        }

        for (index, pair) in wavelength.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(SpectrumError::NonIncreasingWavelength {
                    index: index + 1,
                    previous: pair[0],
                    current: pair[1],
                });
            }
        }

        Ok(Self { wavelength, flux })
    }

    /// Builds a spectrum from columns already known to satisfy the invariants,
    /// e.g. a slice or a uniform shift of a valid spectrum.
    pub(crate) fn from_valid_parts(wavelength: Vec<f64>, flux: Vec<f64>) -> Self {
        debug_assert_eq!(wavelength.len(), flux.len());
        Self { wavelength, flux }
    }

    /// Evenly spaced grid over `[start, end]` with a flux of `f(wavelength)`.
    pub fn sampled(
        start: f64,
        end: f64,
        samples: usize,
        mut f: impl FnMut(f64) -> f64,
    ) -> Result<Self, SpectrumError> {
        let wavelength = linear_grid(start, end, samples);
        let flux = wavelength.iter().map(|&x| f(x)).collect();
        Self::new(wavelength, flux)
    }

    pub fn len(&self) -> usize {
        self.wavelength.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelength.is_empty()
    }

    pub fn wavelength(&self) -> &[f64] {
        &self.wavelength
    }

    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    pub fn samples(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.wavelength.iter().copied().zip(self.flux.iter().copied())
    }

    pub fn first_wavelength(&self) -> Option<f64> {
        self.wavelength.first().copied()
    }

    pub fn last_wavelength(&self) -> Option<f64> {
        self.wavelength.last().copied()
    }

    /// True when `target` lies within the sampled wavelength range, ends included.
    pub fn covers(&self, target: f64) -> bool {
        match (self.first_wavelength(), self.last_wavelength()) {
            (Some(first), Some(last)) => first <= target && target <= last,
            _ => false,
        }
    }

    /// Index `i` of the bracketing pair `wavelength[i] <= target <= wavelength[i + 1]`.
    ///
    /// Returns `None` when the target falls outside the sampled range or the
    /// spectrum has fewer than two samples. A target equal to the last
    /// wavelength resolves to `len - 2` so the bracket stays valid.
    pub fn bisect(&self, target: f64) -> Option<usize> {
        let n = self.wavelength.len();
        if n < 2 || !target.is_finite() {
            return None;
        }
        if target < self.wavelength[0] || target > self.wavelength[n - 1] {
            return None;
        }

        let (mut low, mut high) = (0, n - 1);
        while high - low > 1 {
            let mid = low + (high - low) / 2;
            if self.wavelength[mid] <= target {
                low = mid;
            } else {
                high = mid;
            }
        }
        Some(low)
    }

    /// Linear interpolation of the flux at `target`.
    pub fn interpolate(&self, target: f64) -> Option<f64> {
        let index = self.bisect(target)?;
        let (x0, x1) = (self.wavelength[index], self.wavelength[index + 1]);
        let (y0, y1) = (self.flux[index], self.flux[index + 1]);
        if target == x1 {
            return Some(y1);
        }
        Some(y0 + (y1 - y0) * (target - x0) / (x1 - x0))
    }

    /// Samples with wavelength inside `[center - half_width, center + half_width]`.
    ///
    /// Bounds outside the sampled range clip the slice on that side; a window
    /// entirely outside the range gives an empty spectrum.
    pub fn cut(&self, center: f64, half_width: f64) -> Spectrum {
        let (low, high) = (center - half_width, center + half_width);
        let n = self.len();
        if n < 2 {
            let keep: (Vec<f64>, Vec<f64>) = self
                .samples()
                .filter(|&(x, _)| low <= x && x <= high)
                .unzip();
            return Self::from_valid_parts(keep.0, keep.1);
        }

        let start = match self.bisect(low) {
            Some(index) if self.wavelength[index] < low => index + 1,
            Some(index) => index,
            None if low < self.wavelength[0] => 0,
            None => n,
        };
        let end = match self.bisect(high) {
            Some(index) if self.wavelength[index + 1] <= high => index + 2,
            Some(index) => index + 1,
            None if high > self.wavelength[n - 1] => n,
            None => 0,
        };

        if start >= end {
            return Spectrum::default();
        }
        Self::from_valid_parts(
            self.wavelength[start..end].to_vec(),
            self.flux[start..end].to_vec(),
        )
    }
}

pub fn linear_grid(start: f64, end: f64, samples: usize) -> Vec<f64> {
    match samples {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (samples - 1) as f64;
            (0..samples)
                .map(|index| {
                    if index + 1 == samples {
                        end
                    } else {
                        start + step * index as f64
                    }
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Spectrum, SpectrumError, linear_grid};

    fn uneven() -> Spectrum {
        Spectrum::new(
            vec![4999.0, 4999.3, 4999.35, 5000.0, 5000.8, 5001.0],
            vec![1.0, 0.9, 0.8, 0.5, 0.95, 1.0],
        )
        .expect("uneven spectrum should be valid")
    }

    #[test]
    fn constructor_rejects_non_monotonic_axis() {
        let error = Spectrum::new(vec![1.0, 2.0, 2.0], vec![0.0; 3])
            .expect_err("repeated wavelength should be rejected");
        assert_eq!(
            error,
            SpectrumError::NonIncreasingWavelength {
                index: 2,
                previous: 2.0,
                current: 2.0
            }
        );

        let error = Spectrum::new(vec![1.0, 2.0], vec![0.0])
            .expect_err("length mismatch should be rejected");
        assert!(matches!(error, SpectrumError::LengthMismatch { .. }));
    }

    #[test]
    fn bisect_brackets_every_in_range_target() {
        let spectrum = uneven();
        let axis = spectrum.wavelength().to_vec();
        let mut target = axis[0];
        while target < axis[axis.len() - 1] {
            let index = spectrum.bisect(target).expect("target is in range");
            assert!(axis[index] <= target, "lower bracket at {target}");
            assert!(target < axis[index + 1], "upper bracket at {target}");
            target += 0.013;
        }
    }

    #[test]
    fn bisect_handles_edges_and_outside_targets() {
        let spectrum = uneven();
        assert_eq!(spectrum.bisect(4999.0), Some(0));
        assert_eq!(spectrum.bisect(5001.0), Some(4));
        assert_eq!(spectrum.bisect(5000.0), Some(3));
        assert_eq!(spectrum.bisect(4998.999), None);
        assert_eq!(spectrum.bisect(5001.001), None);
        assert_eq!(spectrum.bisect(f64::NAN), None);

        let single = Spectrum::new(vec![1.0], vec![2.0]).expect("single sample is valid");
        assert_eq!(single.bisect(1.0), None);
    }

    #[test]
    fn interpolation_is_linear_between_brackets() {
        let spectrum = Spectrum::new(vec![0.0, 1.0, 3.0], vec![0.0, 2.0, 0.0])
            .expect("spectrum should be valid");
        let value = spectrum.interpolate(2.0).expect("target is in range");
        assert!((value - 1.0).abs() < 1e-12);
        assert_eq!(spectrum.interpolate(3.0), Some(0.0));
        assert_eq!(spectrum.interpolate(3.5), None);
    }

    #[test]
    fn cut_is_inclusive_and_idempotent() {
        let spectrum = uneven();
        let cut = spectrum.cut(5000.0, 0.66);
        assert_eq!(cut.wavelength(), &[4999.35, 5000.0]);

        let inclusive = spectrum.cut(5000.0, 1.0);
        assert_eq!(inclusive.len(), spectrum.len());

        for (center, width) in [(5000.0, 0.65), (4999.2, 0.3), (5000.9, 5.0), (4999.0, 0.0)] {
            let once = spectrum.cut(center, width);
            let twice = once.cut(center, width);
            assert_eq!(once, twice, "cut({center}, {width}) should be idempotent");
        }
    }

    #[test]
    fn cut_outside_coverage_is_empty_or_one_sided() {
        let spectrum = uneven();
        assert!(spectrum.cut(6000.0, 1.0).is_empty());
        assert!(spectrum.cut(4000.0, 1.0).is_empty());

        let left = spectrum.cut(4998.5, 0.6);
        assert_eq!(left.wavelength(), &[4999.0]);
        let right = spectrum.cut(5001.5, 0.75);
        assert_eq!(right.wavelength(), &[5000.8, 5001.0]);
    }

    #[test]
    fn linear_grid_hits_both_ends() {
        let grid = linear_grid(4995.0, 5005.0, 11);
        assert_eq!(grid.len(), 11);
        assert_eq!(grid[0], 4995.0);
        assert_eq!(grid[10], 5005.0);
        assert!((grid[5] - 5000.0).abs() < 1e-9);
        assert!(linear_grid(0.0, 1.0, 0).is_empty());
    }
}
