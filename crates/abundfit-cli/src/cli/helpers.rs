use super::CliError;
use abundfit_core::domain::FitError;
use abundfit_core::pipelines::RunConfig;
use abundfit_core::serialization::Delimiter;
use anyhow::Context;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Installs the stderr subscriber. `--log-level` wins over `RUST_LOG`; the
/// default keeps per-line progress at `info`.
pub(super) fn init_tracing(level: Option<&str>) {
    let env_filter = match level {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    // Repeated initialisation inside one test process is harmless.
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(env_filter),
        )
        .try_init();
}

pub(super) fn load_run_config(path: &Path) -> Result<RunConfig, CliError> {
    RunConfig::load(path).map_err(CliError::Compute)
}

pub(super) fn parse_delimiter(value: &str) -> Result<Delimiter, CliError> {
    match value.to_ascii_lowercase().as_str() {
        "auto" => Ok(Delimiter::Auto),
        "comma" | "," => Ok(Delimiter::Comma),
        "whitespace" | "space" => Ok(Delimiter::Whitespace),
        other => Err(CliError::Compute(FitError::input_validation(
            "INPUT.CLI_DELIMITER",
            format!("unknown delimiter '{other}'; expected auto, comma or whitespace"),
        ))),
    }
}

pub(super) fn write_json_report<T: Serialize>(path: &Path, report: &T) -> Result<(), CliError> {
    let content = serde_json::to_string_pretty(report)
        .with_context(|| format!("failed to serialize report for '{}'", path.display()))?;
    write_output(path, &format!("{content}\n"))
}

pub(super) fn write_output(path: &Path, content: &str) -> Result<(), CliError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory '{}'", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("failed to write '{}'", path.display()))?;
    Ok(())
}
