//! Synthetic spectrum back-ends.
//!
//! The fitter only talks to [`SynthesisBackend`]; [`SynthesisMethod`] is the
//! serialized choice of back-end and [`Backend`] the built instance.

mod analytic;
pub mod config_file;
mod external;

pub use analytic::{AnalyticSynthesisConfig, AnalyticSynthesizer, LineProfile};
pub use config_file::{ConfigField, ConfigMarkerError, SynthesisConfigFile};
pub use external::{ExternalSynthesisConfig, ExternalSynthesizer};

use crate::domain::{FitParameters, FitResult};
use crate::numerics::Bounds;
use crate::spectrum::Spectrum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavelengthWindow {
    pub center: f64,
    pub half_width: f64,
}

impl WavelengthWindow {
    pub const fn new(center: f64, half_width: f64) -> Self {
        Self { center, half_width }
    }

    pub fn low(&self) -> f64 {
        self.center - self.half_width
    }

    pub fn high(&self) -> f64 {
        self.center + self.half_width
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthesisRequest<'a> {
    pub element: &'a str,
    pub line_center: f64,
    pub window: WavelengthWindow,
    pub parameters: FitParameters,
}

pub trait SynthesisBackend {
    fn name(&self) -> &'static str;

    /// `Ok(false)` marks an element the back-end cannot synthesize; errors
    /// mean the back-end configuration itself is inconsistent.
    fn supports_element(&self, element: &str) -> FitResult<bool>;

    fn synthesize(&self, request: &SynthesisRequest<'_>) -> FitResult<Spectrum>;

    /// The abundance the back-end holds for `element` between syntheses,
    /// when it keeps one.
    fn current_abundance(&self, _element: &str) -> FitResult<Option<f64>> {
        Ok(None)
    }

    /// Puts the element's abundance back after a line has been fitted.
    fn restore_abundance(&self, _element: &str, _abundance: f64) -> FitResult<()> {
        Ok(())
    }

    fn convolution_seed(&self) -> f64;

    fn convolution_bounds(&self) -> Bounds;
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SynthesisMethod {
    External(ExternalSynthesisConfig),
    Analytic(AnalyticSynthesisConfig),
}

impl Default for SynthesisMethod {
    fn default() -> Self {
        Self::Analytic(AnalyticSynthesisConfig::default())
    }
}

#[derive(Debug)]
pub enum Backend {
    External(ExternalSynthesizer),
    Analytic(AnalyticSynthesizer),
}

impl Backend {
    pub fn from_method(method: &SynthesisMethod) -> FitResult<Self> {
        Ok(match method {
            SynthesisMethod::External(config) => Self::External(ExternalSynthesizer::new(config)?),
            SynthesisMethod::Analytic(config) => {
                Self::Analytic(AnalyticSynthesizer::new(config.clone())?)
            }
        })
    }

    fn inner(&self) -> &dyn SynthesisBackend {
        match self {
            Self::External(backend) => backend,
            Self::Analytic(backend) => backend,
        }
    }
}

impl SynthesisBackend for Backend {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn supports_element(&self, element: &str) -> FitResult<bool> {
        self.inner().supports_element(element)
    }

    fn synthesize(&self, request: &SynthesisRequest<'_>) -> FitResult<Spectrum> {
        self.inner().synthesize(request)
    }

    fn current_abundance(&self, element: &str) -> FitResult<Option<f64>> {
        self.inner().current_abundance(element)
    }

    fn restore_abundance(&self, element: &str, abundance: f64) -> FitResult<()> {
        self.inner().restore_abundance(element, abundance)
    }

    fn convolution_seed(&self) -> f64 {
        self.inner().convolution_seed()
    }

    fn convolution_bounds(&self) -> Bounds {
        self.inner().convolution_bounds()
    }
}

#[cfg(test)]
mod tests {
    use super::{Backend, LineProfile, SynthesisBackend, SynthesisMethod, WavelengthWindow};

    #[test]
    fn method_tags_select_the_backend() {
        let method: SynthesisMethod =
            serde_json::from_str(r#"{"kind": "analytic", "profile": "voigt"}"#)
                .expect("analytic method should parse");
        match &method {
            SynthesisMethod::Analytic(config) => {
                assert_eq!(config.profile, LineProfile::Voigt);
                assert_eq!(config.samples, 1000);
            }
            other => panic!("unexpected method {other:?}"),
        }

        let backend = Backend::from_method(&method).expect("backend should build");
        assert_eq!(backend.name(), "analytic");
        assert_eq!(backend.convolution_seed(), 0.5);

        let external: SynthesisMethod = serde_json::from_str(
            r#"{"kind": "external", "config_file": "run.com", "output_file": "syntspec/out"}"#,
        )
        .expect("external method should parse");
        match external {
            SynthesisMethod::External(config) => {
                assert_eq!(config.timeout_secs, Some(600.0));
                assert!(config.program.is_none());
            }
            other => panic!("unexpected method {other:?}"),
        }
    }

    #[test]
    fn window_bounds_are_symmetric() {
        let window = WavelengthWindow::new(5000.0, 1.5);
        assert_eq!(window.low(), 4998.5);
        assert_eq!(window.high(), 5001.5);
    }
}
