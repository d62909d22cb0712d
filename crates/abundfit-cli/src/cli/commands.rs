use super::CliError;
use super::helpers::*;
use abundfit_core::domain::{FitError, FitParameters};
use abundfit_core::fitting::{CancellationToken, NoopObserver};
use abundfit_core::numerics::{ContinuumParams, fit_continuum};
use abundfit_core::pipelines::{render_human_summary, run_fit, write_ledger_curves};
use abundfit_core::pipelines::curves::render_curve;
use abundfit_core::spectrum::load_spectrum;
use abundfit_core::synthesis::{Backend, SynthesisBackend, SynthesisRequest, WavelengthWindow};
use std::path::PathBuf;
use tracing::info;

#[derive(clap::Args)]
pub(super) struct FitArgs {
    /// Run configuration (JSON)
    #[arg(long, default_value = "abundfit.json")]
    config: PathBuf,

    /// Discard existing results before fitting
    #[arg(long)]
    restart: bool,

    /// JSON run report output path
    #[arg(long)]
    json_report: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct ContinuumArgs {
    /// Observed spectrum file
    #[arg(long)]
    spectrum: PathBuf,

    /// Window center wavelength
    #[arg(long)]
    center: f64,

    /// Window half width
    #[arg(long, default_value = "5.0")]
    half_width: f64,

    /// Kept band half width, in standard deviations
    #[arg(long, default_value = "0.5")]
    alpha: f64,

    /// Relative spread drop that stops the clipping
    #[arg(long, default_value = "1e-20")]
    eps: f64,

    /// Maximum clipping rounds
    #[arg(long, default_value = "1000")]
    max_iter: usize,

    /// Column delimiter: auto, comma or whitespace
    #[arg(long, default_value = "auto")]
    delimiter: String,
}

#[derive(clap::Args)]
pub(super) struct SynthArgs {
    /// Run configuration providing the synthesis back-end
    #[arg(long, default_value = "abundfit.json")]
    config: PathBuf,

    /// Element symbol, without ionization order
    #[arg(long)]
    element: String,

    /// Line center wavelength
    #[arg(long)]
    wavelength: f64,

    #[arg(long)]
    abundance: f64,

    #[arg(long, default_value = "0.0")]
    shift: f64,

    #[arg(long, default_value = "1.0")]
    continuum: f64,

    /// Convolution FWHM; the back-end's seed when absent
    #[arg(long)]
    convolution: Option<f64>,

    /// Half width of the synthesized window; the plot window when absent
    #[arg(long)]
    half_width: Option<f64>,

    /// Curve output path; stdout when absent
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct CurvesArgs {
    /// Run configuration (JSON)
    #[arg(long, default_value = "abundfit.json")]
    config: PathBuf,

    /// Position of the observed spectrum in the configuration
    #[arg(long, default_value = "0")]
    spectrum_index: usize,
}

pub(super) fn run_fit_command(args: FitArgs) -> Result<i32, CliError> {
    let mut config = load_run_config(&args.config)?;
    config.restart |= args.restart;
    let backend = Backend::from_method(&config.synthesis)?;
    info!(
        config = %args.config.display(),
        backend = backend.name(),
        restart = config.restart,
        "run configuration loaded"
    );

    let cancellation = CancellationToken::new();
    let report = run_fit(&config, &backend, &cancellation, &mut NoopObserver)?;
    println!("{}", render_human_summary(&report));

    if let Some(path) = &args.json_report {
        write_json_report(path, &report)?;
        println!("JSON report: {}", path.display());
    }

    if report.failed() == 0 { Ok(0) } else { Ok(1) }
}

pub(super) fn run_continuum_command(args: ContinuumArgs) -> Result<i32, CliError> {
    let delimiter = parse_delimiter(&args.delimiter)?;
    let observed = load_spectrum(&args.spectrum, delimiter)?;
    let window = observed.cut(args.center, args.half_width);
    if window.is_empty() {
        return Err(CliError::Compute(FitError::input_validation(
            "INPUT.CONTINUUM_WINDOW",
            format!(
                "no samples of '{}' within {} +/- {}",
                args.spectrum.display(),
                args.center,
                args.half_width
            ),
        )));
    }

    let params = ContinuumParams {
        alpha: args.alpha,
        eps: args.eps,
    };
    let estimate = fit_continuum(window.flux(), params, args.max_iter)?;
    println!("Samples: {}", window.len());
    println!("Continuum level: {}", estimate.level);
    println!("Spread: {}", estimate.spread);
    println!("Iterations: {}", estimate.iterations);
    println!("Converged: {}", estimate.converged);
    Ok(0)
}

pub(super) fn run_synth_command(args: SynthArgs) -> Result<i32, CliError> {
    let config = load_run_config(&args.config)?;
    let backend = Backend::from_method(&config.synthesis)?;
    if !backend.supports_element(&args.element)? {
        return Err(CliError::Compute(FitError::input_validation(
            "INPUT.ELEMENT_UNSUPPORTED",
            format!(
                "{} back-end cannot synthesize element '{}'",
                backend.name(),
                args.element
            ),
        )));
    }

    let half_width = args.half_width.unwrap_or(config.fit.windows.plot);
    let request = SynthesisRequest {
        element: &args.element,
        line_center: args.wavelength,
        window: WavelengthWindow::new(args.wavelength, half_width),
        parameters: FitParameters {
            shift: args.shift,
            continuum: args.continuum,
            convolution: args.convolution.unwrap_or_else(|| backend.convolution_seed()),
            abundance: args.abundance,
        },
    };
    let previous = backend.current_abundance(&args.element)?;
    let spectrum = backend.synthesize(&request);
    if let Some(abundance) = previous {
        backend.restore_abundance(&args.element, abundance)?;
    }
    let spectrum = spectrum?;
    let rendered = render_curve(&spectrum);

    match &args.output {
        Some(path) => {
            write_output(path, &rendered)?;
            println!("Synthetic curve: {} ({} samples)", path.display(), spectrum.len());
        }
        None => print!("{rendered}"),
    }
    Ok(0)
}

pub(super) fn run_curves_command(args: CurvesArgs) -> Result<i32, CliError> {
    let config = load_run_config(&args.config)?;
    let backend = Backend::from_method(&config.synthesis)?;
    let written = write_ledger_curves(&config, &backend, args.spectrum_index)?;
    println!("Curve files written: {}", written.len());
    for path in &written {
        println!("{}", path.display());
    }
    Ok(0)
}
