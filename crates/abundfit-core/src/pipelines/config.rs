use crate::catalog::ElementFilter;
use crate::domain::{FitError, FitResult};
use crate::fitting::FitSettings;
use crate::serialization::Delimiter;
use crate::synthesis::SynthesisMethod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SpectrumSource {
    pub path: PathBuf,
    #[serde(default)]
    pub delimiter: Delimiter,
}

impl SpectrumSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: Delimiter::Auto,
        }
    }

    /// Directory name used for this spectrum's results in per-spectrum mode.
    pub fn label(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "spectrum".to_string())
    }
}

/// A complete fitting run, as read from a JSON document.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RunConfig {
    pub line_list: PathBuf,
    pub references: PathBuf,
    pub spectra: Vec<SpectrumSource>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Delimiter of the line list and reference files.
    #[serde(default)]
    pub delimiter: Delimiter,
    #[serde(default)]
    pub synthesis: SynthesisMethod,
    #[serde(default)]
    pub fit: FitSettings,
    /// Discard existing results before fitting.
    #[serde(default)]
    pub restart: bool,
    /// The last character of each line identifier is the ionization order.
    #[serde(default = "default_order_suffix")]
    pub order_suffix: bool,
    /// Glob patterns over line identifiers; empty selects every line.
    #[serde(default)]
    pub elements: Vec<String>,
    #[serde(default)]
    pub per_spectrum_ledger: bool,
    #[serde(default)]
    pub write_curves: bool,
    #[serde(default = "default_curve_offset")]
    pub curve_offset: f64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_order_suffix() -> bool {
    true
}

fn default_curve_offset() -> f64 {
    0.1
}

impl RunConfig {
    pub fn new(
        line_list: impl Into<PathBuf>,
        references: impl Into<PathBuf>,
        spectra: Vec<SpectrumSource>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            line_list: line_list.into(),
            references: references.into(),
            spectra,
            output_dir: output_dir.into(),
            delimiter: Delimiter::Auto,
            synthesis: SynthesisMethod::default(),
            fit: FitSettings::default(),
            restart: false,
            order_suffix: default_order_suffix(),
            elements: Vec::new(),
            per_spectrum_ledger: false,
            write_curves: false,
            curve_offset: default_curve_offset(),
        }
    }

    /// Reads, resolves and validates a run configuration. Relative paths are
    /// taken against the configuration file's directory.
    pub fn load(path: &Path) -> FitResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| RunConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_str(&content).map_err(|source| RunConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.resolve_paths(base);
        config.validate()?;
        Ok(config)
    }

    /// Directory holding the results table and line curves of `source`.
    pub fn results_dir(&self, source: &SpectrumSource) -> PathBuf {
        if self.per_spectrum_ledger {
            self.output_dir.join(source.label())
        } else {
            self.output_dir.clone()
        }
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        self.line_list = resolve(base, &self.line_list);
        self.references = resolve(base, &self.references);
        self.output_dir = resolve(base, &self.output_dir);
        for spectrum in &mut self.spectra {
            spectrum.path = resolve(base, &spectrum.path);
        }
        if let SynthesisMethod::External(external) = &mut self.synthesis {
            external.config_file = resolve(base, &external.config_file);
            // Bare program names are looked up on PATH.
            if let Some(program) = &external.program
                && program.components().count() > 1
            {
                external.program = Some(resolve(base, program));
            }
        }
    }

    pub fn validate(&self) -> FitResult<()> {
        if self.spectra.is_empty() {
            return Err(invalid("run configuration lists no observed spectra"));
        }
        if self.per_spectrum_ledger {
            let mut labels = BTreeSet::new();
            for spectrum in &self.spectra {
                if !labels.insert(spectrum.label()) {
                    return Err(invalid(format!(
                        "spectra share the file name '{}', which per-spectrum results cannot tell apart",
                        spectrum.label()
                    )));
                }
            }
        }
        if !self.curve_offset.is_finite() {
            return Err(invalid(format!(
                "curve_offset must be finite, got {}",
                self.curve_offset
            )));
        }
        ElementFilter::new(&self.elements)?;
        self.fit.validate()
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn invalid(message: impl Into<String>) -> FitError {
    FitError::input_validation("INPUT.RUN_CONFIG", message)
}

#[derive(Debug, thiserror::Error)]
pub enum RunConfigError {
    #[error("failed to read run configuration '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse run configuration '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<RunConfigError> for FitError {
    fn from(error: RunConfigError) -> Self {
        let message = error.to_string();
        match error {
            RunConfigError::Read { .. } => FitError::io_system("IO.RUN_CONFIG", message),
            RunConfigError::Parse { .. } => FitError::input_validation("INPUT.RUN_CONFIG", message),
        }
    }
}
