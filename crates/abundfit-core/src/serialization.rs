use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Column separator of the delimited text inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delimiter {
    Comma,
    Whitespace,
    /// Comma when the line contains one, whitespace otherwise.
    #[default]
    Auto,
}

impl Delimiter {
    pub fn split(self, line: &str) -> Vec<&str> {
        let comma = match self {
            Self::Comma => true,
            Self::Whitespace => false,
            Self::Auto => line.contains(','),
        };

        if comma {
            line.split(',').map(str::trim).collect()
        } else {
            line.split_whitespace().collect()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRow<'a> {
    /// 1-based line number in the source text.
    pub line_number: usize,
    pub fields: Vec<&'a str>,
}

/// Non-blank, non-comment (`#`) lines of a delimited text source.
pub fn data_rows(source: &str, delimiter: Delimiter) -> impl Iterator<Item = DataRow<'_>> {
    source
        .lines()
        .enumerate()
        .filter_map(move |(index, line)| {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                return None;
            }
            Some(DataRow {
                line_number: index + 1,
                fields: delimiter.split(trimmed),
            })
        })
}

/// Parses a numeric field; blank and `nan` spellings read as absent.
pub fn parse_optional_f64(field: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    let field = field.trim();
    if field.is_empty() || field.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    field.parse::<f64>().map(Some)
}

pub fn format_decimal(value: f64) -> String {
    format!("{value:.4}")
}

/// `%.4e` rendering with a signed, two-digit exponent (`1.2340e-05`).
pub fn format_scientific(value: f64) -> String {
    let rendered = format!("{value:.4e}");
    match rendered.split_once('e') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(exponent) => {
                let sign = if exponent < 0 { '-' } else { '+' };
                format!("{mantissa}e{sign}{:02}", exponent.abs())
            }
            Err(_) => rendered,
        },
        None => rendered,
    }
}

pub fn normalize_text_artifact(content: &str) -> String {
    let mut normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    if !normalized.is_empty() && !normalized.ends_with('\n') {
        normalized.push('\n');
    }
    normalized
}

/// Writes through a sibling temporary file and a rename, so readers never
/// observe a half-written artifact.
pub fn write_text_artifact(path: &Path, content: &str) -> std::io::Result<()> {
    let staging = staging_path(path);
    fs::write(&staging, normalize_text_artifact(content))?;
    fs::rename(&staging, path)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}
