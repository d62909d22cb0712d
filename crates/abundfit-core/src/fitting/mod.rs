//! Per-line nested optimization.
//!
//! Each round fits shift and continuum, then the convolution width, then the
//! abundance, and finally measures equivalent widths on the plot window.

mod progress;
mod settings;

pub use progress::{CancellationToken, FitObserver, FitStage, LineState, NoopObserver};
pub use settings::{FitSettings, ParameterSeed, StageIterations, WindowSet};

use crate::domain::{EquivalentWidths, FitError, FitParameters, FitRecord, FitResult, LineEntry};
use crate::numerics::{
    Bounds, SimplexOptions, chi_square, equivalent_width, fit_continuum, line_boundaries,
    minimize_bounded,
};
use crate::spectrum::Spectrum;
use crate::synthesis::{SynthesisBackend, SynthesisRequest, WavelengthWindow};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Fitted(FitRecord),
    /// The line cannot be fitted with this spectrum or back-end.
    Skipped { record: FitRecord, reason: FitError },
    /// Fitting started but a stage failed.
    Failed { record: FitRecord, error: FitError },
    Cancelled,
}

impl LineOutcome {
    pub fn record(&self) -> Option<&FitRecord> {
        match self {
            Self::Fitted(record)
            | Self::Skipped { record, .. }
            | Self::Failed { record, .. } => Some(record),
            Self::Cancelled => None,
        }
    }
}

/// Observed cuts shared by every round of one line.
struct LineCuts {
    continuum: Spectrum,
    convolution: Spectrum,
    abundance: Spectrum,
    plot: Spectrum,
}

pub struct LineFitter<'a, B: SynthesisBackend + ?Sized> {
    backend: &'a B,
    settings: &'a FitSettings,
    cancellation: &'a CancellationToken,
}

impl<'a, B: SynthesisBackend + ?Sized> LineFitter<'a, B> {
    pub fn new(
        backend: &'a B,
        settings: &'a FitSettings,
        cancellation: &'a CancellationToken,
    ) -> Self {
        Self {
            backend,
            settings,
            cancellation,
        }
    }

    pub fn backend(&self) -> &'a B {
        self.backend
    }

    /// Fits one line against `observed`. `reference` is the element's
    /// reference abundance, `None` when the reference table has no value.
    pub fn fit_line(
        &self,
        observed: &Spectrum,
        line: &LineEntry,
        reference: Option<f64>,
        observer: &mut dyn FitObserver,
    ) -> LineOutcome {
        let reference_value = reference.unwrap_or(0.0);
        observer.state_changed(line, LineState::Pending);
        if self.cancellation.is_cancelled() {
            observer.state_changed(line, LineState::Cancelled);
            return LineOutcome::Cancelled;
        }

        observer.state_changed(line, LineState::RangeCheck);
        match self.check_range(observed, line) {
            Ok(true) => {}
            Ok(false) => {
                let reason = FitError::input_validation(
                    "INPUT.ELEMENT_UNSUPPORTED",
                    format!(
                        "the {} back-end cannot synthesize element '{}'",
                        self.backend.name(),
                        line.element
                    ),
                );
                return self.skip(line, reference_value, reason, observer);
            }
            Err(reason) if reason.placeholder() == INFEASIBLE_RANGE => {
                return self.skip(line, reference_value, reason, observer);
            }
            Err(error) => {
                return self.fail(line, reference_value, error);
            }
        }

        let limit = self.settings.abundance_limit_for(reference);
        let result = self.fit_rounds(observed, line, reference_value, limit, observer);

        if let Err(error) = self
            .backend
            .restore_abundance(&line.element, reference_value)
        {
            warn!(
                line = %line.identifier,
                %error,
                "failed to restore the reference abundance"
            );
        }

        match result {
            Ok(Some(record)) => {
                observer.state_changed(line, LineState::Done);
                LineOutcome::Fitted(record)
            }
            Ok(None) => {
                observer.state_changed(line, LineState::Cancelled);
                LineOutcome::Cancelled
            }
            Err(error) => self.fail(line, reference_value, error),
        }
    }

    fn skip(
        &self,
        line: &LineEntry,
        reference: f64,
        reason: FitError,
        observer: &mut dyn FitObserver,
    ) -> LineOutcome {
        warn!(line = %line.identifier, wavelength = line.wavelength, %reason, "line skipped");
        observer.state_changed(line, LineState::Skipped);
        LineOutcome::Skipped {
            record: FitRecord::unresolved(line, reference),
            reason,
        }
    }

    fn fail(&self, line: &LineEntry, reference: f64, error: FitError) -> LineOutcome {
        warn!(line = %line.identifier, wavelength = line.wavelength, %error, "line fit failed");
        LineOutcome::Failed {
            record: FitRecord::unresolved(line, reference),
            error,
        }
    }

    /// `Ok(false)` when the back-end does not know the element; an
    /// `INFEASIBLE_RANGE` error when the spectrum cannot support the windows.
    fn check_range(&self, observed: &Spectrum, line: &LineEntry) -> FitResult<bool> {
        if !self.backend.supports_element(&line.element)? {
            return Ok(false);
        }
        if !observed.covers(line.wavelength) {
            return Err(FitError::computation(
                INFEASIBLE_RANGE,
                format!(
                    "line at {} A lies outside the observed coverage [{}, {}]",
                    line.wavelength,
                    observed.first_wavelength().unwrap_or(f64::NAN),
                    observed.last_wavelength().unwrap_or(f64::NAN)
                ),
            ));
        }
        for (name, half_width) in self.settings.windows.named() {
            let samples = observed.cut(line.wavelength, half_width).len();
            if samples <= 1 {
                return Err(FitError::computation(
                    INFEASIBLE_RANGE,
                    format!(
                        "{name} window of +/-{half_width} A around {} A holds {samples} observed sample(s)",
                        line.wavelength
                    ),
                ));
            }
        }
        Ok(true)
    }

    /// `Ok(None)` when cancellation was observed at a checkpoint.
    fn fit_rounds(
        &self,
        observed: &Spectrum,
        line: &LineEntry,
        reference: f64,
        abundance_limit: f64,
        observer: &mut dyn FitObserver,
    ) -> FitResult<Option<FitRecord>> {
        let settings = self.settings;
        let windows = settings.windows;
        let center = line.wavelength;
        let cuts = LineCuts {
            continuum: observed.cut(center, windows.continuum),
            convolution: observed.cut(center, windows.convolution),
            abundance: observed.cut(center, windows.abundance),
            plot: observed.cut(center, windows.plot),
        };

        let shift_bounds = Bounds::around(0.0, settings.wavelength_bound);
        let convolution_bounds = settings
            .convolution_bounds
            .unwrap_or_else(|| self.backend.convolution_bounds());
        let abundance_bounds = Bounds::around(reference, abundance_limit);

        let mut parameters = FitParameters {
            shift: settings.seed.map_or(0.0, |seed| seed.shift),
            continuum: settings.seed.map_or(1.0, |seed| seed.continuum),
            convolution: settings
                .seed
                .map(|seed| seed.convolution)
                .or(settings.convolution_seed)
                .unwrap_or_else(|| self.backend.convolution_seed()),
            abundance: reference,
        };
        let mut chi = f64::NAN;
        let mut widths = EquivalentWidths {
            observed: 0.0,
            fitted: 0.0,
        };

        for round in 1..=settings.repeat_rounds {
            observer.state_changed(line, LineState::Fitting { round });

            if settings.fit_nuisance {
                let level = match settings.seed {
                    Some(seed) => seed.continuum,
                    None => {
                        fit_continuum(
                            cuts.continuum.flux(),
                            settings.continuum,
                            settings.continuum_iterations,
                        )?
                        .level
                    }
                };
                let continuum_bounds =
                    Bounds::around(level, settings.continuum_tolerance * level.abs());
                let start_continuum = if round == 1 { level } else { parameters.continuum };

                // Synthesized past the cut so a shifted trial still overlaps
                // every observed sample.
                let window = windows.continuum + settings.wavelength_bound;
                let fixed = parameters;
                let outcome = minimize_bounded(
                    |p| {
                        self.score(
                            line,
                            &cuts.continuum,
                            window,
                            FitParameters {
                                shift: p[0],
                                continuum: p[1],
                                ..fixed
                            },
                        )
                    },
                    &[parameters.shift, start_continuum],
                    &[shift_bounds, continuum_bounds],
                    self.options(settings.max_iterations.shift_continuum),
                )?;
                parameters.shift = outcome.parameters[0];
                parameters.continuum = outcome.parameters[1];
                if self.checkpoint(line, FitStage::ShiftAndContinuum, &parameters, outcome.cost, observer) {
                    return Ok(None);
                }

                let fixed = parameters;
                let outcome = minimize_bounded(
                    |p| {
                        self.score(
                            line,
                            &cuts.convolution,
                            windows.convolution,
                            FitParameters {
                                convolution: p[0],
                                ..fixed
                            },
                        )
                    },
                    &[parameters.convolution],
                    &[convolution_bounds],
                    self.options(settings.max_iterations.convolution),
                )?;
                parameters.convolution = outcome.parameters[0];
                if self.checkpoint(line, FitStage::Convolution, &parameters, outcome.cost, observer) {
                    return Ok(None);
                }
            }

            let fixed = parameters;
            let outcome = minimize_bounded(
                |p| {
                    self.score(
                        line,
                        &cuts.abundance,
                        windows.plot,
                        FitParameters {
                            abundance: p[0],
                            ..fixed
                        },
                    )
                },
                &[parameters.abundance],
                &[abundance_bounds],
                self.options(settings.max_iterations.abundance),
            )?;
            parameters.abundance = outcome.parameters[0];
            chi = outcome.cost;
            if self.checkpoint(line, FitStage::Abundance, &parameters, chi, observer) {
                return Ok(None);
            }

            widths = self.equivalent_widths(line, &cuts.plot, parameters)?;
            observer.stage_finished(line, FitStage::EquivalentWidth, &parameters, chi);
        }

        Ok(Some(FitRecord::fitted(line, reference, parameters, chi, widths)))
    }

    fn score(
        &self,
        line: &LineEntry,
        observed: &Spectrum,
        half_width: f64,
        parameters: FitParameters,
    ) -> FitResult<f64> {
        let synthetic = self.backend.synthesize(&SynthesisRequest {
            element: &line.element,
            line_center: line.wavelength,
            window: WavelengthWindow::new(line.wavelength, half_width),
            parameters,
        })?;
        Ok(chi_square(observed, &synthetic))
    }

    fn equivalent_widths(
        &self,
        line: &LineEntry,
        observed_plot: &Spectrum,
        parameters: FitParameters,
    ) -> FitResult<EquivalentWidths> {
        let settings = self.settings;
        let synthetic = self.backend.synthesize(&SynthesisRequest {
            element: &line.element,
            line_center: line.wavelength,
            window: WavelengthWindow::new(line.wavelength, settings.windows.plot),
            parameters,
        })?;

        let shifted_center = line.wavelength + parameters.shift;
        let measure = |spectrum: &Spectrum| -> FitResult<f64> {
            let center = clamp_to_coverage(spectrum, shifted_center);
            let boundaries = line_boundaries(
                spectrum,
                center,
                settings.boundary_threshold,
                settings.continuum,
                settings.continuum_iterations,
            )?;
            Ok(equivalent_width(spectrum, &boundaries))
        };

        Ok(EquivalentWidths {
            observed: measure(observed_plot)?,
            fitted: measure(&synthetic)?,
        })
    }

    fn options(&self, max_iters: u64) -> SimplexOptions {
        SimplexOptions {
            max_iters,
            sd_tolerance: self.settings.sd_tolerance,
        }
    }

    /// Reports a finished stage; true when the fit should stop.
    fn checkpoint(
        &self,
        line: &LineEntry,
        stage: FitStage,
        parameters: &FitParameters,
        chi: f64,
        observer: &mut dyn FitObserver,
    ) -> bool {
        debug!(
            line = %line.identifier,
            stage = stage.as_str(),
            shift = parameters.shift,
            continuum = parameters.continuum,
            convolution = parameters.convolution,
            abundance = parameters.abundance,
            chi,
            "stage finished"
        );
        observer.stage_finished(line, stage, parameters, chi);
        self.cancellation.is_cancelled()
    }
}

const INFEASIBLE_RANGE: &str = "RUN.INFEASIBLE_RANGE";

fn clamp_to_coverage(spectrum: &Spectrum, target: f64) -> f64 {
    match (spectrum.first_wavelength(), spectrum.last_wavelength()) {
        (Some(first), Some(last)) => target.clamp(first, last),
        _ => target,
    }
}
