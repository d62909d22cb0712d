//! Marker-based editing of the external synthesizer's run script.
//!
//! The script carries the synthesis window as
//! `set lam_min    = '<value>'` / `set lam_max    = '<value>'` and each element's
//! abundance as `foreach <element>_ab (<value>)`. Each marker must occur
//! exactly once; values are rewritten in place and everything else in the
//! file is left untouched.

use crate::domain::{FitError, FitResult};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

pub const LAMBDA_MIN_MARKER: &str = "set lam_min    = ";
pub const LAMBDA_MAX_MARKER: &str = "set lam_max    = ";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigMarkerError {
    #[error("marker '{marker}' not found")]
    Missing { marker: String },
    #[error("marker '{marker}' occurs {count} times, expected exactly once")]
    Duplicated { marker: String, count: usize },
    #[error("value after marker '{marker}' is not enclosed in '{open}' ... '{close}' on the same line")]
    Unterminated {
        marker: String,
        open: char,
        close: char,
    },
    #[error("value '{value}' after marker '{marker}' is not a number")]
    InvalidValue { marker: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigField {
    LambdaMin,
    LambdaMax,
    Abundance(String),
}

impl ConfigField {
    pub fn marker(&self) -> String {
        match self {
            Self::LambdaMin => LAMBDA_MIN_MARKER.to_string(),
            Self::LambdaMax => LAMBDA_MAX_MARKER.to_string(),
            Self::Abundance(element) => format!("foreach {element}_ab"),
        }
    }

    const fn delimiters(&self) -> (char, char) {
        match self {
            Self::LambdaMin | Self::LambdaMax => ('\'', '\''),
            Self::Abundance(_) => ('(', ')'),
        }
    }
}

pub fn read_field(text: &str, field: &ConfigField) -> Result<f64, ConfigMarkerError> {
    let range = locate(text, field)?;
    let value = text[range].trim();
    value
        .parse::<f64>()
        .map_err(|_| ConfigMarkerError::InvalidValue {
            marker: field.marker(),
            value: value.to_string(),
        })
}

pub fn write_field(text: &str, field: &ConfigField, value: f64) -> Result<String, ConfigMarkerError> {
    let range = locate(text, field)?;
    let mut edited = String::with_capacity(text.len() + 16);
    edited.push_str(&text[..range.start]);
    edited.push_str(&format!("{value:?}"));
    edited.push_str(&text[range.end..]);
    Ok(edited)
}

fn locate(text: &str, field: &ConfigField) -> Result<Range<usize>, ConfigMarkerError> {
    let marker = field.marker();
    let count = text.matches(marker.as_str()).count();
    match count {
        0 => return Err(ConfigMarkerError::Missing { marker }),
        1 => {}
        _ => return Err(ConfigMarkerError::Duplicated { marker, count }),
    }

    let (open, close) = field.delimiters();
    let unterminated = || ConfigMarkerError::Unterminated {
        marker: marker.clone(),
        open,
        close,
    };

    let after_marker = text.find(marker.as_str()).ok_or_else(unterminated)? + marker.len();
    let line_end = text[after_marker..]
        .find('\n')
        .map_or(text.len(), |offset| after_marker + offset);
    let line = &text[after_marker..line_end];

    let value_start = line.find(open).ok_or_else(unterminated)? + open.len_utf8();
    let value_len = line[value_start..].find(close).ok_or_else(unterminated)?;
    let start = after_marker + value_start;
    Ok(start..start + value_len)
}

/// The run script on disk. Every accessor re-reads the file, so edits made by
/// other tools between runs are picked up.
#[derive(Debug)]
pub struct SynthesisConfigFile {
    path: PathBuf,
}

impl SynthesisConfigFile {
    /// Opens the script and checks that both window markers are usable.
    pub fn open(path: &Path) -> FitResult<Self> {
        let file = Self {
            path: path.to_path_buf(),
        };
        let text = file.read()?;
        for field in [ConfigField::LambdaMin, ConfigField::LambdaMax] {
            read_field(&text, &field).map_err(|error| file.marker_error(error))?;
        }
        Ok(file)
    }

    /// `Ok(false)` when the element has no abundance marker at all.
    pub fn contains_element(&self, element: &str) -> FitResult<bool> {
        let text = self.read()?;
        match read_field(&text, &ConfigField::Abundance(element.to_string())) {
            Ok(_) => Ok(true),
            Err(ConfigMarkerError::Missing { .. }) => Ok(false),
            Err(error) => Err(self.marker_error(error)),
        }
    }

    pub fn abundance(&self, element: &str) -> FitResult<f64> {
        let text = self.read()?;
        read_field(&text, &ConfigField::Abundance(element.to_string()))
            .map_err(|error| self.marker_error(error))
    }

    pub fn set_abundance(&self, element: &str, abundance: f64) -> FitResult<()> {
        self.edit(&[(ConfigField::Abundance(element.to_string()), abundance)])
    }

    pub fn set_wavelength_range(&self, lambda_min: f64, lambda_max: f64) -> FitResult<()> {
        self.edit(&[
            (ConfigField::LambdaMin, lambda_min),
            (ConfigField::LambdaMax, lambda_max),
        ])
    }

    fn edit(&self, updates: &[(ConfigField, f64)]) -> FitResult<()> {
        let mut text = self.read()?;
        for (field, value) in updates {
            text = write_field(&text, field, *value).map_err(|error| self.marker_error(error))?;
        }
        fs::write(&self.path, text).map_err(|source| {
            FitError::io_system(
                "IO.SYNTH_CONFIG_WRITE",
                format!(
                    "failed to write synthesis configuration '{}': {}",
                    self.path.display(),
                    source
                ),
            )
        })
    }

    fn read(&self) -> FitResult<String> {
        fs::read_to_string(&self.path).map_err(|source| {
            FitError::io_system(
                "IO.SYNTH_CONFIG_READ",
                format!(
                    "failed to read synthesis configuration '{}': {}",
                    self.path.display(),
                    source
                ),
            )
        })
    }

    fn marker_error(&self, error: ConfigMarkerError) -> FitError {
        FitError::input_validation(
            "INPUT.SYNTH_CONFIG_MARKER",
            format!("synthesis configuration '{}': {}", self.path.display(), error),
        )
    }
}
