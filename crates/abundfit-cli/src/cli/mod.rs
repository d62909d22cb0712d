mod commands;
mod helpers;

use abundfit_core::domain::FitError;
use clap::Parser;

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let fit_error = error.as_fit_error();
            eprintln!("{}", fit_error.diagnostic_line());
            eprintln!("{}", fit_error.fatal_exit_line());
            fit_error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("abundfit".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    parse_and_dispatch(full_args)
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => {
            helpers::init_tracing(cli.log_level.as_deref());
            dispatch_parsed(cli.command)
        }
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

#[derive(Parser)]
#[command(
    name = "abundfit",
    version,
    about = "Stellar absorption-line abundance fitting"
)]
struct Cli {
    /// Log filter (e.g. `debug`, `abundfit_core=trace`); overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Fit every line of a run configuration
    Fit(commands::FitArgs),
    /// Estimate the continuum level around a wavelength of an observed spectrum
    Continuum(commands::ContinuumArgs),
    /// Write one synthetic curve without fitting
    Synth(commands::SynthArgs),
    /// Rewrite the diagnostic curves of already fitted lines
    Curves(commands::CurvesArgs),
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Fit(args) => commands::run_fit_command(args),
        CliCommand::Continuum(args) => commands::run_continuum_command(args),
        CliCommand::Synth(args) => commands::run_synth_command(args),
        CliCommand::Curves(args) => commands::run_curves_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(FitError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<FitError> for CliError {
    fn from(error: FitError) -> Self {
        Self::Compute(error)
    }
}

impl CliError {
    fn as_fit_error(&self) -> FitError {
        match self {
            Self::Usage(message) => FitError::input_validation("INPUT.CLI_USAGE", message.clone()),
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => FitError::io_system("IO.CLI", format!("{error:#}")),
        }
    }
}
