//! End-to-end fitting runs: inputs, per-spectrum loops, results and logs.

pub mod config;
pub mod curves;
pub mod run_log;

pub use config::{RunConfig, RunConfigError, SpectrumSource};
pub use curves::{CURVES_DIR_NAME, CurveVariant, LineCurve, line_curves, write_line_curves};
pub use run_log::{RUN_LOG_FILE_NAME, RunLog};

use crate::catalog::{ElementFilter, ReferenceTable, load_line_list};
use crate::domain::{FitError, FitParameters, FitResult, LineEntry};
use crate::fitting::{CancellationToken, FitObserver, LineFitter, LineOutcome};
use crate::ledger::{RESULTS_FILE_NAME, ResultsLedger};
use crate::spectrum::{Spectrum, load_spectrum};
use crate::synthesis::SynthesisBackend;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpectrumReport {
    pub spectrum: PathBuf,
    pub results: PathBuf,
    pub selected: usize,
    pub already_resolved: usize,
    pub fitted: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub backend: String,
    pub line_count: usize,
    pub filtered_out: usize,
    pub spectra: Vec<SpectrumReport>,
    pub cancelled: bool,
    pub elapsed_seconds: f64,
}

impl RunReport {
    pub fn fitted(&self) -> usize {
        self.spectra.iter().map(|spectrum| spectrum.fitted).sum()
    }

    pub fn skipped(&self) -> usize {
        self.spectra.iter().map(|spectrum| spectrum.skipped).sum()
    }

    pub fn failed(&self) -> usize {
        self.spectra.iter().map(|spectrum| spectrum.failed).sum()
    }
}

struct RunInputs {
    lines: Vec<LineEntry>,
    references: ReferenceTable,
    filter: ElementFilter,
    spectra: Vec<(SpectrumSource, Spectrum)>,
}

impl RunInputs {
    fn load(config: &RunConfig) -> FitResult<Self> {
        let lines = load_line_list(&config.line_list, config.delimiter, config.order_suffix)?;
        let references = ReferenceTable::load(&config.references, config.delimiter)?;
        let filter = ElementFilter::new(&config.elements)?;
        let spectra = config
            .spectra
            .iter()
            .map(|source| Ok((source.clone(), load_spectrum(&source.path, source.delimiter)?)))
            .collect::<FitResult<Vec<_>>>()?;

        Ok(Self {
            lines,
            references,
            filter,
            spectra,
        })
    }
}

/// Fits every selected line of the line list against each observed spectrum.
///
/// Inputs are read and the output directory created before any fitting, so
/// failures there abort the run; per-line failures only produce null rows.
pub fn run_fit<B: SynthesisBackend + ?Sized>(
    config: &RunConfig,
    backend: &B,
    cancellation: &CancellationToken,
    observer: &mut dyn FitObserver,
) -> FitResult<RunReport> {
    config.validate()?;
    let inputs = RunInputs::load(config)?;
    create_directory(&config.output_dir)?;

    let run_log = RunLog::start(config.output_dir.join(RUN_LOG_FILE_NAME));
    info!(
        backend = backend.name(),
        lines = inputs.lines.len(),
        spectra = inputs.spectra.len(),
        output = %config.output_dir.display(),
        "fitting run started"
    );

    let result = fit_spectra(config, &inputs, backend, cancellation, observer);
    let elapsed = run_log.finish();
    let mut report = result?;
    report.elapsed_seconds = elapsed?.as_secs_f64();

    info!(
        fitted = report.fitted(),
        skipped = report.skipped(),
        failed = report.failed(),
        cancelled = report.cancelled,
        elapsed_seconds = report.elapsed_seconds,
        "fitting run finished"
    );
    Ok(report)
}

fn fit_spectra<B: SynthesisBackend + ?Sized>(
    config: &RunConfig,
    inputs: &RunInputs,
    backend: &B,
    cancellation: &CancellationToken,
    observer: &mut dyn FitObserver,
) -> FitResult<RunReport> {
    let selected: Vec<LineEntry> = inputs
        .lines
        .iter()
        .filter(|line| inputs.filter.matches(line))
        .cloned()
        .collect();
    let mut report = RunReport {
        backend: backend.name().to_string(),
        line_count: inputs.lines.len(),
        filtered_out: inputs.lines.len() - selected.len(),
        ..RunReport::default()
    };

    let fitter = LineFitter::new(backend, &config.fit, cancellation);
    let mut shared = if config.per_spectrum_ledger {
        None
    } else {
        Some(open_ledger(&config.output_dir, config.restart)?)
    };

    for (source, observed) in &inputs.spectra {
        let directory = config.results_dir(source);
        let mut own;
        let ledger = match shared.as_mut() {
            Some(ledger) => ledger,
            None => {
                own = open_ledger(&directory, config.restart)?;
                &mut own
            }
        };

        let run = SpectrumRun {
            config,
            fitter: &fitter,
            references: &inputs.references,
            curves_dir: directory.join(CURVES_DIR_NAME),
        };
        let (spectrum_report, cancelled) =
            run.fit(source, observed, &selected, ledger, cancellation, observer)?;
        report.spectra.push(spectrum_report);
        if cancelled {
            report.cancelled = true;
            break;
        }
    }

    Ok(report)
}

struct SpectrumRun<'r, 'f, B: SynthesisBackend + ?Sized> {
    config: &'r RunConfig,
    fitter: &'r LineFitter<'f, B>,
    references: &'r ReferenceTable,
    curves_dir: PathBuf,
}

impl<B: SynthesisBackend + ?Sized> SpectrumRun<'_, '_, B> {
    /// Returns the spectrum's report and whether cancellation stopped it.
    fn fit(
        &self,
        source: &SpectrumSource,
        observed: &Spectrum,
        selected: &[LineEntry],
        ledger: &mut ResultsLedger,
        cancellation: &CancellationToken,
        observer: &mut dyn FitObserver,
    ) -> FitResult<(SpectrumReport, bool)> {
        let pending = ledger.unresolved(selected);
        let mut report = SpectrumReport {
            spectrum: source.path.clone(),
            results: ledger.path().to_path_buf(),
            selected: selected.len(),
            already_resolved: selected.len() - pending.len(),
            ..SpectrumReport::default()
        };
        info!(
            spectrum = %source.path.display(),
            pending = pending.len(),
            already_resolved = report.already_resolved,
            "fitting spectrum"
        );

        for (position, line) in pending.iter().enumerate() {
            if cancellation.is_cancelled() {
                return Ok((report, true));
            }
            observer.line_started(line, position + 1, pending.len());
            info!(
                line = %line.identifier,
                wavelength = line.wavelength,
                position = position + 1,
                total = pending.len(),
                "fitting line"
            );

            let reference = self.references.lookup(&line.element);
            let outcome = self.fitter.fit_line(observed, line, reference, observer);
            let record = match &outcome {
                LineOutcome::Cancelled => {
                    info!(line = %line.identifier, "fit cancelled");
                    return Ok((report, true));
                }
                LineOutcome::Fitted(record) => {
                    report.fitted += 1;
                    record
                }
                LineOutcome::Skipped { record, .. } => {
                    report.skipped += 1;
                    record
                }
                LineOutcome::Failed { record, .. } => {
                    report.failed += 1;
                    record
                }
            };

            ledger.upsert_and_persist(record.clone())?;
            if self.config.write_curves
                && let Some(parameters) = record.parameters()
            {
                self.write_curves(observed, line, parameters, record.reference_abundance);
            }

            info!(
                line = %line.identifier,
                fit_abundance = ?record.fit_abundance,
                chi = ?record.chi,
                "line finished"
            );
            observer.line_finished(record);
        }

        Ok((report, false))
    }

    fn write_curves(
        &self,
        observed: &Spectrum,
        line: &LineEntry,
        parameters: FitParameters,
        reference: f64,
    ) {
        let written = line_curves(
            self.fitter.backend(),
            observed,
            line,
            parameters,
            reference,
            self.config.fit.windows.plot,
            self.config.curve_offset,
        )
        .and_then(|curves| write_line_curves(&self.curves_dir, line, &curves));

        match written {
            Ok(paths) => debug!(line = %line.identifier, files = paths.len(), "line curves written"),
            Err(error) => warn!(line = %line.identifier, %error, "failed to write line curves"),
        }
    }
}

/// Rewrites the curve files of every resolved row in the results of
/// `config.spectra[spectrum_index]`.
pub fn write_ledger_curves<B: SynthesisBackend + ?Sized>(
    config: &RunConfig,
    backend: &B,
    spectrum_index: usize,
) -> FitResult<Vec<PathBuf>> {
    config.validate()?;
    let source = config.spectra.get(spectrum_index).ok_or_else(|| {
        FitError::input_validation(
            "INPUT.SPECTRUM_INDEX",
            format!(
                "spectrum index {} is out of range for {} configured spectra",
                spectrum_index,
                config.spectra.len()
            ),
        )
    })?;
    let observed = load_spectrum(&source.path, source.delimiter)?;
    let lines = load_line_list(&config.line_list, config.delimiter, config.order_suffix)?;
    let directory = config.results_dir(source);
    let ledger = ResultsLedger::load(directory.join(RESULTS_FILE_NAME))?;
    let curves_dir = directory.join(CURVES_DIR_NAME);

    let mut written = Vec::new();
    for line in &lines {
        let Some((parameters, reference)) = ledger
            .find(&line.identifier, line.wavelength)
            .and_then(|record| Some((record.parameters()?, record.reference_abundance)))
        else {
            continue;
        };
        let curves = line_curves(
            backend,
            &observed,
            line,
            parameters,
            reference,
            config.fit.windows.plot,
            config.curve_offset,
        )?;
        written.extend(write_line_curves(&curves_dir, line, &curves)?);
    }
    info!(files = written.len(), directory = %curves_dir.display(), "line curves written");
    Ok(written)
}

fn open_ledger(directory: &Path, restart: bool) -> FitResult<ResultsLedger> {
    create_directory(directory)?;
    let path = directory.join(RESULTS_FILE_NAME);
    if restart {
        info!(results = %path.display(), "restart requested, discarding previous results");
        return ResultsLedger::truncate(path);
    }
    ResultsLedger::load(path)
}

fn create_directory(directory: &Path) -> FitResult<()> {
    fs::create_dir_all(directory).map_err(|source| {
        FitError::io_system(
            "IO.OUTPUT_DIR",
            format!(
                "failed to create output directory '{}': {}",
                directory.display(),
                source
            ),
        )
    })
}

pub fn render_human_summary(report: &RunReport) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Synthesis back-end: {}", report.backend));
    lines.push(format!(
        "Lines: {} listed, {} filtered out",
        report.line_count, report.filtered_out
    ));
    for spectrum in &report.spectra {
        lines.push(format!(
            "{}: fitted {}, skipped {}, failed {}, already resolved {} -> {}",
            spectrum.spectrum.display(),
            spectrum.fitted,
            spectrum.skipped,
            spectrum.failed,
            spectrum.already_resolved,
            spectrum.results.display()
        ));
    }
    if report.cancelled {
        lines.push("Run cancelled before all lines were fitted".to_string());
    }
    lines.push(run_log::elapsed_line(report.elapsed_seconds.round() as u64));
    lines.join("\n")
}
