//! Diagnostic curves written next to the results for each fitted line.

use crate::domain::{ABSENT_ABUNDANCE, FitError, FitParameters, FitResult, LineEntry};
use crate::serialization::{format_decimal, write_text_artifact};
use crate::spectrum::Spectrum;
use crate::synthesis::{SynthesisBackend, SynthesisRequest, WavelengthWindow};
use std::fs;
use std::path::{Path, PathBuf};

pub const CURVES_DIR_NAME: &str = "line_curves";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveVariant {
    Fit,
    AboveFit,
    BelowFit,
    NoElement,
    Residual,
}

impl CurveVariant {
    pub const ALL: [Self; 5] = [
        Self::Fit,
        Self::AboveFit,
        Self::BelowFit,
        Self::NoElement,
        Self::Residual,
    ];

    /// Number used in the curve file name.
    pub const fn index(self) -> u8 {
        match self {
            Self::Fit => 1,
            Self::AboveFit => 2,
            Self::BelowFit => 3,
            Self::NoElement => 4,
            Self::Residual => 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineCurve {
    pub variant: CurveVariant,
    pub spectrum: Spectrum,
}

/// Synthesizes the fit, fit +/- `offset` dex and line-free curves over the
/// plot window, plus the observed-minus-fit residual on the observed grid.
/// The back-end is left holding `restore_abundance` for the element, also
/// when a synthesis fails.
pub fn line_curves<B: SynthesisBackend + ?Sized>(
    backend: &B,
    observed: &Spectrum,
    line: &LineEntry,
    parameters: FitParameters,
    restore_abundance: f64,
    plot_half_width: f64,
    offset: f64,
) -> FitResult<Vec<LineCurve>> {
    let curves = synthesize_curves(backend, observed, line, parameters, plot_half_width, offset);
    let restored = backend.restore_abundance(&line.element, restore_abundance);
    let curves = curves?;
    restored?;
    Ok(curves)
}

fn synthesize_curves<B: SynthesisBackend + ?Sized>(
    backend: &B,
    observed: &Spectrum,
    line: &LineEntry,
    parameters: FitParameters,
    plot_half_width: f64,
    offset: f64,
) -> FitResult<Vec<LineCurve>> {
    let synthesize = |abundance: f64| {
        backend.synthesize(&SynthesisRequest {
            element: &line.element,
            line_center: line.wavelength,
            window: WavelengthWindow::new(line.wavelength, plot_half_width),
            parameters: FitParameters {
                abundance,
                ..parameters
            },
        })
    };

    let fit = synthesize(parameters.abundance)?;
    let above = synthesize(parameters.abundance + offset)?;
    let below = synthesize(parameters.abundance - offset)?;
    let absent = synthesize(ABSENT_ABUNDANCE)?;
    let residual = residual(&observed.cut(line.wavelength, plot_half_width), &fit);

    Ok(CurveVariant::ALL
        .into_iter()
        .zip([fit, above, below, absent, residual])
        .map(|(variant, spectrum)| LineCurve { variant, spectrum })
        .collect())
}

fn residual(observed: &Spectrum, fit: &Spectrum) -> Spectrum {
    let (wavelength, flux): (Vec<f64>, Vec<f64>) = observed
        .samples()
        .filter_map(|(x, y)| fit.interpolate(x).map(|model| (x, y - model)))
        .unzip();
    Spectrum::from_valid_parts(wavelength, flux)
}

/// `fit_<identifier>_<wavelength>_ang_<variant>.csv`
pub fn curve_file_name(line: &LineEntry, variant: CurveVariant) -> String {
    format!(
        "fit_{}_{:?}_ang_{}.csv",
        line.identifier,
        line.wavelength,
        variant.index()
    )
}

pub fn write_line_curves(
    directory: &Path,
    line: &LineEntry,
    curves: &[LineCurve],
) -> FitResult<Vec<PathBuf>> {
    fs::create_dir_all(directory).map_err(|source| {
        FitError::io_system(
            "IO.CURVES_DIR",
            format!(
                "failed to create curve directory '{}': {}",
                directory.display(),
                source
            ),
        )
    })?;

    curves
        .iter()
        .map(|curve| {
            let path = directory.join(curve_file_name(line, curve.variant));
            write_text_artifact(&path, &render_curve(&curve.spectrum)).map_err(|source| {
                FitError::io_system(
                    "IO.CURVES_WRITE",
                    format!("failed to write curve '{}': {}", path.display(), source),
                )
            })?;
            Ok(path)
        })
        .collect()
}

pub fn render_curve(spectrum: &Spectrum) -> String {
    spectrum
        .samples()
        .map(|(x, y)| format!("{},{}\n", format_decimal(x), format_decimal(y)))
        .collect()
}
