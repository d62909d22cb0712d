use super::config_file::SynthesisConfigFile;
use super::{SynthesisBackend, SynthesisRequest, WavelengthWindow};
use crate::domain::{FitError, FitResult};
use crate::numerics::Bounds;
use crate::serialization::Delimiter;
use crate::spectrum::{Spectrum, parse_spectrum, shift_scale_convolve};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

const CONVOLUTION_SEED: f64 = 3.85;
const CONVOLUTION_BOUNDS: Bounds = Bounds::new(3.5, 4.2);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const DEFAULT_TIMEOUT_SECS: f64 = 600.0;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExternalSynthesisConfig {
    /// Run script holding the window and abundance markers.
    pub config_file: PathBuf,
    /// Spectrum file the program writes, relative to the script directory
    /// unless absolute.
    pub output_file: PathBuf,
    /// Program to launch; the run script itself when absent.
    #[serde(default)]
    pub program: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds before a run is killed; `null` waits indefinitely.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: Option<f64>,
}

fn default_timeout_secs() -> Option<f64> {
    Some(DEFAULT_TIMEOUT_SECS)
}

impl ExternalSynthesisConfig {
    pub fn new(config_file: impl Into<PathBuf>, output_file: impl Into<PathBuf>) -> Self {
        Self {
            config_file: config_file.into(),
            output_file: output_file.into(),
            program: None,
            args: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug)]
struct RawSynthesis {
    element: String,
    abundance: f64,
    window: WavelengthWindow,
    spectrum: Spectrum,
}

impl RawSynthesis {
    fn serves(&self, element: &str, abundance: f64, window: &WavelengthWindow) -> bool {
        self.element == element
            && self.abundance.to_bits() == abundance.to_bits()
            && self.window.low() <= window.low()
            && window.high() <= self.window.high()
    }
}

#[derive(Debug)]
struct ExternalState {
    config: SynthesisConfigFile,
    last_run: Option<RawSynthesis>,
}

/// Runs an external synthesis program that is driven through its run script.
///
/// The script and the last raw output sit behind one lock: a single run is in
/// flight at any time and a window already covered by the last run at the
/// same abundance is served by cutting that output instead of rerunning.
#[derive(Debug)]
pub struct ExternalSynthesizer {
    state: Mutex<ExternalState>,
    program: PathBuf,
    args: Vec<String>,
    working_dir: PathBuf,
    output_path: PathBuf,
    timeout: Option<Duration>,
}

impl ExternalSynthesizer {
    pub fn new(config: &ExternalSynthesisConfig) -> FitResult<Self> {
        let config_path = fs::canonicalize(&config.config_file).map_err(|source| {
            FitError::io_system(
                "IO.SYNTH_CONFIG_READ",
                format!(
                    "failed to resolve synthesis configuration '{}': {}",
                    config.config_file.display(),
                    source
                ),
            )
        })?;
        let working_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let timeout = match config.timeout_secs {
            Some(seconds) if seconds.is_finite() && seconds > 0.0 => {
                Some(Duration::from_secs_f64(seconds))
            }
            Some(seconds) => {
                return Err(FitError::input_validation(
                    "INPUT.SYNTH_TIMEOUT",
                    format!("synthesis timeout must be a positive number of seconds, got {seconds}"),
                ));
            }
            None => None,
        };

        Ok(Self {
            state: Mutex::new(ExternalState {
                config: SynthesisConfigFile::open(&config_path)?,
                last_run: None,
            }),
            program: config.program.clone().unwrap_or_else(|| config_path.clone()),
            args: config.args.clone(),
            output_path: working_dir.join(&config.output_file),
            working_dir,
            timeout,
        })
    }

    fn lock(&self) -> FitResult<MutexGuard<'_, ExternalState>> {
        self.state.lock().map_err(|_| {
            FitError::internal(
                "SYS.SYNTH_LOCK",
                "external synthesis state was poisoned by an earlier panic",
            )
        })
    }

    fn run_program(&self) -> FitResult<Spectrum> {
        if self.output_path.exists() {
            fs::remove_file(&self.output_path).map_err(|source| {
                FitError::io_system(
                    "IO.SYNTH_OUTPUT_CLEAR",
                    format!(
                        "failed to remove stale synthesis output '{}': {}",
                        self.output_path.display(),
                        source
                    ),
                )
            })?;
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| {
                FitError::io_system(
                    "IO.SYNTH_SPAWN",
                    format!(
                        "failed to launch synthesis program '{}': {}",
                        self.program.display(),
                        source
                    ),
                )
            })?;
        let stderr = drain_stderr(&mut child);

        let status = self.wait(&mut child)?;
        let stderr = stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        if !status.success() {
            let status_text = status.code().map_or_else(
                || "terminated by signal".to_string(),
                |code| format!("exit code {}", code),
            );
            error!(program = %self.program.display(), %status_text, "synthesis program failed");
            return Err(FitError::computation(
                "RUN.SYNTH_SUBPROCESS",
                format!(
                    "synthesis program '{}' failed with {}: {}",
                    self.program.display(),
                    status_text,
                    stderr.trim()
                ),
            ));
        }

        self.read_output()
    }

    fn wait(&self, child: &mut Child) -> FitResult<ExitStatus> {
        let wait_error = |source: std::io::Error| {
            FitError::io_system(
                "IO.SYNTH_WAIT",
                format!("failed to wait for synthesis program: {}", source),
            )
        };

        let Some(timeout) = self.timeout else {
            return child.wait().map_err(wait_error);
        };

        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait().map_err(wait_error)? {
                return Ok(status);
            }
            if started.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                error!(program = %self.program.display(), ?timeout, "synthesis program timed out");
                return Err(FitError::computation(
                    "RUN.SYNTH_TIMEOUT",
                    format!(
                        "synthesis program '{}' did not finish within {:.1} s",
                        self.program.display(),
                        timeout.as_secs_f64()
                    ),
                ));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn read_output(&self) -> FitResult<Spectrum> {
        let source = fs::read_to_string(&self.output_path).map_err(|source| {
            FitError::io_system(
                "IO.SYNTH_OUTPUT_MISSING",
                format!(
                    "synthesis output '{}' could not be read: {}",
                    self.output_path.display(),
                    source
                ),
            )
        })?;
        parse_spectrum(&source, Delimiter::Whitespace).map_err(|error| {
            FitError::computation(
                "RUN.SYNTH_OUTPUT",
                format!(
                    "invalid synthesis output '{}': {}",
                    self.output_path.display(),
                    error
                ),
            )
        })
    }
}

fn drain_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    let mut pipe = child.stderr.take()?;
    Some(thread::spawn(move || {
        let mut captured = String::new();
        let _ = pipe.read_to_string(&mut captured);
        captured
    }))
}

impl SynthesisBackend for ExternalSynthesizer {
    fn name(&self) -> &'static str {
        "external"
    }

    fn supports_element(&self, element: &str) -> FitResult<bool> {
        self.lock()?.config.contains_element(element)
    }

    fn synthesize(&self, request: &SynthesisRequest<'_>) -> FitResult<Spectrum> {
        let mut state = self.lock()?;
        let parameters = request.parameters;
        let window = request.window;

        let cached = state
            .last_run
            .as_ref()
            .filter(|run| run.serves(request.element, parameters.abundance, &window))
            .map(|run| {
                if run.window == window {
                    run.spectrum.clone()
                } else {
                    run.spectrum.cut(window.center, window.half_width)
                }
            });

        let raw = match cached {
            Some(spectrum) => spectrum,
            None => {
                state.config.set_wavelength_range(window.low(), window.high())?;
                state
                    .config
                    .set_abundance(request.element, parameters.abundance)?;
                debug!(
                    element = request.element,
                    abundance = parameters.abundance,
                    low = window.low(),
                    high = window.high(),
                    "running synthesis program"
                );
                let spectrum = self.run_program()?;
                state.last_run = Some(RawSynthesis {
                    element: request.element.to_string(),
                    abundance: parameters.abundance,
                    window,
                    spectrum: spectrum.clone(),
                });
                spectrum
            }
        };

        Ok(shift_scale_convolve(
            &raw,
            parameters.shift,
            parameters.continuum,
            parameters.convolution,
        ))
    }

    fn current_abundance(&self, element: &str) -> FitResult<Option<f64>> {
        self.lock()?.config.abundance(element).map(Some)
    }

    fn restore_abundance(&self, element: &str, abundance: f64) -> FitResult<()> {
        self.lock()?.config.set_abundance(element, abundance)
    }

    fn convolution_seed(&self) -> f64 {
        CONVOLUTION_SEED
    }

    fn convolution_bounds(&self) -> Bounds {
        CONVOLUTION_BOUNDS
    }
}
