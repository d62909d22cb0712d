use crate::domain::{FitError, FitResult};
use crate::numerics::{Bounds, ContinuumParams};
use serde::{Deserialize, Serialize};

/// Half widths, in Angstrom, of the windows cut around each line.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowSet {
    pub continuum: f64,
    pub convolution: f64,
    pub abundance: f64,
    pub plot: f64,
}

impl Default for WindowSet {
    fn default() -> Self {
        Self {
            continuum: 5.0,
            convolution: 1.5,
            abundance: 0.2,
            plot: 0.5,
        }
    }
}

impl WindowSet {
    pub fn named(&self) -> [(&'static str, f64); 4] {
        [
            ("continuum", self.continuum),
            ("convolution", self.convolution),
            ("abundance", self.abundance),
            ("plot", self.plot),
        ]
    }
}

/// Nelder-Mead iteration caps per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StageIterations {
    pub shift_continuum: u64,
    pub convolution: u64,
    pub abundance: u64,
}

impl Default for StageIterations {
    fn default() -> Self {
        Self {
            shift_continuum: 1000,
            convolution: 1000,
            abundance: 10,
        }
    }
}

/// Externally supplied nuisance parameters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ParameterSeed {
    pub shift: f64,
    pub continuum: f64,
    pub convolution: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FitSettings {
    pub windows: WindowSet,
    pub repeat_rounds: usize,
    pub max_iterations: StageIterations,
    /// Iteration cap of the sigma-clipping continuum estimate.
    pub continuum_iterations: usize,
    /// Largest wavelength shift searched, in Angstrom.
    pub wavelength_bound: f64,
    /// Relative continuum range searched around the estimate.
    pub continuum_tolerance: f64,
    /// Overrides the back-end's convolution seed.
    pub convolution_seed: Option<f64>,
    /// Overrides the back-end's convolution search range.
    pub convolution_bounds: Option<Bounds>,
    pub abundance_limit: f64,
    /// Abundance search half width for elements without a reference value.
    pub abundance_limit_unreferenced: f64,
    pub continuum: ContinuumParams,
    /// Fraction of the continuum that ends a line for equivalent widths.
    pub boundary_threshold: f64,
    pub sd_tolerance: f64,
    pub seed: Option<ParameterSeed>,
    /// When false, the seed's shift, continuum and convolution are used as is
    /// and only the abundance is fitted.
    pub fit_nuisance: bool,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            windows: WindowSet::default(),
            repeat_rounds: 2,
            max_iterations: StageIterations::default(),
            continuum_iterations: 1000,
            wavelength_bound: 1.0,
            continuum_tolerance: 0.1,
            convolution_seed: None,
            convolution_bounds: None,
            abundance_limit: 1.0,
            abundance_limit_unreferenced: 3.0,
            continuum: ContinuumParams::default(),
            boundary_threshold: 0.98,
            sd_tolerance: 1e-10,
            seed: None,
            fit_nuisance: true,
        }
    }
}

impl FitSettings {
    pub fn validate(&self) -> FitResult<()> {
        for (name, half_width) in self.windows.named() {
            require(
                half_width.is_finite() && half_width > 0.0,
                format!("{name} window half width must be positive, got {half_width}"),
            )?;
        }
        require(
            self.repeat_rounds >= 1,
            "repeat_rounds must be at least 1".to_string(),
        )?;
        require(
            self.continuum_iterations >= 1,
            "continuum_iterations must be at least 1".to_string(),
        )?;
        require(
            self.wavelength_bound.is_finite() && self.wavelength_bound >= 0.0,
            format!(
                "wavelength_bound must be finite and >= 0, got {}",
                self.wavelength_bound
            ),
        )?;
        require(
            (0.0..1.0).contains(&self.continuum_tolerance),
            format!(
                "continuum_tolerance must lie in [0, 1), got {}",
                self.continuum_tolerance
            ),
        )?;
        for (name, limit) in [
            ("abundance_limit", self.abundance_limit),
            ("abundance_limit_unreferenced", self.abundance_limit_unreferenced),
        ] {
            require(
                limit.is_finite() && limit > 0.0,
                format!("{name} must be positive, got {limit}"),
            )?;
        }
        require(
            self.continuum.alpha.is_finite() && self.continuum.alpha > 0.0,
            format!("continuum alpha must be positive, got {}", self.continuum.alpha),
        )?;
        require(
            self.continuum.eps.is_finite() && self.continuum.eps >= 0.0,
            format!("continuum eps must be >= 0, got {}", self.continuum.eps),
        )?;
        require(
            self.boundary_threshold.is_finite() && self.boundary_threshold > 0.0,
            format!(
                "boundary_threshold must be positive, got {}",
                self.boundary_threshold
            ),
        )?;
        require(
            self.sd_tolerance.is_finite() && self.sd_tolerance > 0.0,
            format!("sd_tolerance must be positive, got {}", self.sd_tolerance),
        )?;
        if let Some(bounds) = self.convolution_bounds {
            require(
                bounds.is_valid(),
                format!(
                    "convolution_bounds [{}, {}] are not an ordered finite interval",
                    bounds.lower, bounds.upper
                ),
            )?;
        }
        if let Some(seed) = self.convolution_seed {
            require(
                seed.is_finite(),
                "convolution_seed must be finite".to_string(),
            )?;
        }
        if let Some(seed) = self.seed {
            require(
                seed.shift.is_finite() && seed.continuum.is_finite() && seed.convolution.is_finite(),
                "parameter seed values must be finite".to_string(),
            )?;
        }
        require(
            self.fit_nuisance || self.seed.is_some(),
            "fit_nuisance = false needs a parameter seed".to_string(),
        )
    }

    /// Abundance search half width for a line with the given reference.
    pub fn abundance_limit_for(&self, reference: Option<f64>) -> f64 {
        match reference {
            Some(value) if value != 0.0 => self.abundance_limit,
            _ => self.abundance_limit_unreferenced,
        }
    }
}

fn require(condition: bool, message: String) -> FitResult<()> {
    if condition {
        Ok(())
    } else {
        Err(FitError::input_validation("INPUT.FIT_SETTINGS", message))
    }
}
