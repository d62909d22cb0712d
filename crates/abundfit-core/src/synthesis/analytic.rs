use super::{SynthesisBackend, SynthesisRequest};
use crate::domain::{FitError, FitResult};
use crate::numerics::Bounds;
use crate::spectrum::Spectrum;
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;

const CONVOLUTION_SEED: f64 = 0.5;
const CONVOLUTION_BOUNDS: Bounds = Bounds::new(0.0, 1.0);
/// Largest decade of line depth; beyond it the flux would overflow.
const MAX_DEPTH_EXPONENT: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineProfile {
    #[default]
    Gaussian,
    Lorentzian,
    Voigt,
}

impl LineProfile {
    /// Peak-normalized profile at `offset` from the line center for a full
    /// width at half maximum of `width`.
    pub fn evaluate(self, offset: f64, width: f64) -> f64 {
        if width <= 0.0 || !width.is_finite() {
            return 0.0;
        }
        match self {
            Self::Gaussian => gaussian(offset, width),
            Self::Lorentzian => lorentzian(offset, width),
            Self::Voigt => gaussian(offset, width) * lorentzian(offset, width),
        }
    }
}

fn gaussian(offset: f64, width: f64) -> f64 {
    (-4.0 * LN_2 * offset * offset / (width * width)).exp()
}

fn lorentzian(offset: f64, width: f64) -> f64 {
    let gamma = 0.5 * width;
    gamma * gamma / (offset * offset + gamma * gamma)
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalyticSynthesisConfig {
    pub profile: LineProfile,
    /// Abundance at which the line depth reaches the full continuum.
    pub abundance_zero_point: f64,
    /// Grid points across the requested window.
    pub samples: usize,
}

impl Default for AnalyticSynthesisConfig {
    fn default() -> Self {
        Self {
            profile: LineProfile::Gaussian,
            abundance_zero_point: 8.0,
            samples: 1000,
        }
    }
}

/// Closed-form absorption line:
/// `continuum * (1 - 10^(abundance - zero_point) * profile(x - center - shift))`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticSynthesizer {
    config: AnalyticSynthesisConfig,
}

impl AnalyticSynthesizer {
    pub fn new(config: AnalyticSynthesisConfig) -> FitResult<Self> {
        if config.samples < 2 {
            return Err(FitError::input_validation(
                "INPUT.ANALYTIC_SAMPLES",
                format!(
                    "analytic synthesis needs at least 2 samples, got {}",
                    config.samples
                ),
            ));
        }
        if !config.abundance_zero_point.is_finite() {
            return Err(FitError::input_validation(
                "INPUT.ANALYTIC_ZERO_POINT",
                "analytic abundance zero point must be finite",
            ));
        }
        Ok(Self { config })
    }

    /// Peak depth for `abundance`, saturated so that it stays finite.
    pub fn depth(&self, abundance: f64) -> f64 {
        10f64.powf((abundance - self.config.abundance_zero_point).min(MAX_DEPTH_EXPONENT))
    }
}

impl SynthesisBackend for AnalyticSynthesizer {
    fn name(&self) -> &'static str {
        "analytic"
    }

    fn supports_element(&self, _element: &str) -> FitResult<bool> {
        Ok(true)
    }

    fn synthesize(&self, request: &SynthesisRequest<'_>) -> FitResult<Spectrum> {
        let parameters = request.parameters;
        let depth = self.depth(parameters.abundance);
        let center = request.line_center + parameters.shift;
        let profile = self.config.profile;

        Spectrum::sampled(
            request.window.low(),
            request.window.high(),
            self.config.samples,
            |x| {
                parameters.continuum
                    * (1.0 - depth * profile.evaluate(x - center, parameters.convolution))
            },
        )
        .map_err(|error| {
            FitError::computation(
                "RUN.ANALYTIC_SYNTHESIS",
                format!("analytic profile evaluation failed: {error}"),
            )
        })
    }

    fn convolution_seed(&self) -> f64 {
        CONVOLUTION_SEED
    }

    fn convolution_bounds(&self) -> Bounds {
        CONVOLUTION_BOUNDS
    }
}
