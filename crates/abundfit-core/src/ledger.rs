//! Persistent table of per-line fit results (`found_values.csv`).
//!
//! Every update rewrites the whole file through a staging sibling, so an
//! interrupted run leaves either the previous table or the new one.

use crate::domain::{FitError, FitRecord, FitResult, LineEntry};
use crate::serialization::{
    Delimiter, data_rows, format_decimal, format_scientific, parse_optional_f64,
    write_text_artifact,
};
use std::fs;
use std::path::{Path, PathBuf};

pub const RESULTS_FILE_NAME: &str = "found_values.csv";

pub const RESULTS_HEADER: [&str; 11] = [
    "Element",
    "Lambda (A)",
    "Lamb Shift",
    "Continuum",
    "Convolution",
    "Refer Abundance",
    "Fit Abundance",
    "Differ",
    "Chi",
    "Equiv Width (A)",
    "Equiv Width Fit (A)",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ResultsLedger {
    path: PathBuf,
    records: Vec<FitRecord>,
}

impl ResultsLedger {
    /// Opens the table at `path`; a missing or empty file is an empty table.
    pub fn load(path: impl Into<PathBuf>) -> FitResult<Self> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(source) => parse_records(&source).map_err(|error| {
                FitError::input_validation(
                    error.placeholder(),
                    format!("{}: {}", path.display(), error.message()),
                )
            })?,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(FitError::io_system(
                    "IO.LEDGER_READ",
                    format!("failed to read results '{}': {}", path.display(), source),
                ));
            }
        };
        Ok(Self { path, records })
    }

    /// Replaces whatever is at `path` with a bare header, without reading it.
    pub fn truncate(path: impl Into<PathBuf>) -> FitResult<Self> {
        let ledger = Self {
            path: path.into(),
            records: Vec::new(),
        };
        ledger.persist()?;
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[FitRecord] {
        &self.records
    }

    pub fn find(&self, identifier: &str, wavelength: f64) -> Option<&FitRecord> {
        self.records
            .iter()
            .find(|record| record.same_key(identifier, wavelength))
    }

    pub fn is_resolved(&self, line: &LineEntry) -> bool {
        self.find(&line.identifier, line.wavelength)
            .is_some_and(FitRecord::is_resolved)
    }

    /// Lines without a resolved row, in list order.
    pub fn unresolved<'l>(&self, lines: &'l [LineEntry]) -> Vec<&'l LineEntry> {
        lines.iter().filter(|line| !self.is_resolved(line)).collect()
    }

    pub fn upsert_and_persist(&mut self, record: FitRecord) -> FitResult<()> {
        match self
            .records
            .iter_mut()
            .find(|existing| existing.same_key(&record.identifier, record.wavelength))
        {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
        self.persist()
    }

    pub fn render(&self) -> String {
        let mut content = RESULTS_HEADER.join(",");
        content.push('\n');
        for record in &self.records {
            content.push_str(&render_row(record));
            content.push('\n');
        }
        content
    }

    fn persist(&self) -> FitResult<()> {
        write_text_artifact(&self.path, &self.render()).map_err(|source| {
            FitError::io_system(
                "IO.LEDGER_WRITE",
                format!(
                    "failed to write results '{}': {}",
                    self.path.display(),
                    source
                ),
            )
        })
    }
}

fn render_row(record: &FitRecord) -> String {
    let decimal = |value: Option<f64>| value.map(format_decimal).unwrap_or_default();
    let scientific = |value: Option<f64>| value.map(format_scientific).unwrap_or_default();

    [
        record.identifier.clone(),
        format_wavelength(record.wavelength),
        decimal(record.shift),
        decimal(record.continuum),
        decimal(record.convolution),
        format_decimal(record.reference_abundance),
        decimal(record.fit_abundance),
        decimal(record.difference),
        scientific(record.chi),
        scientific(record.equivalent_width),
        scientific(record.equivalent_width_fit),
    ]
    .join(",")
}

/// Row key: four decimals when that is exact, the shortest round-trip
/// form otherwise, so a reloaded row still matches its line.
fn format_wavelength(value: f64) -> String {
    let fixed = format_decimal(value);
    if fixed.parse::<f64>() == Ok(value) {
        fixed
    } else {
        format!("{value:?}")
    }
}

fn parse_records(source: &str) -> FitResult<Vec<FitRecord>> {
    let mut records = Vec::new();
    for (position, row) in data_rows(source, Delimiter::Comma).enumerate() {
        if position == 0 && row.fields.first() == Some(&RESULTS_HEADER[0]) {
            continue;
        }
        if row.fields.len() != RESULTS_HEADER.len() {
            return Err(FitError::input_validation(
                "INPUT.LEDGER_ROW",
                format!(
                    "results row {} has {} column(s), expected {}",
                    row.line_number,
                    row.fields.len(),
                    RESULTS_HEADER.len()
                ),
            ));
        }

        let field = |index: usize| -> FitResult<Option<f64>> {
            parse_optional_f64(row.fields[index]).map_err(|_| {
                FitError::input_validation(
                    "INPUT.LEDGER_ROW",
                    format!(
                        "results row {} has invalid '{}' value '{}'",
                        row.line_number, RESULTS_HEADER[index], row.fields[index]
                    ),
                )
            })
        };
        let wavelength = field(1)?.ok_or_else(|| {
            FitError::input_validation(
                "INPUT.LEDGER_ROW",
                format!("results row {} has no wavelength", row.line_number),
            )
        })?;

        records.push(FitRecord {
            identifier: row.fields[0].to_string(),
            wavelength,
            shift: field(2)?,
            continuum: field(3)?,
            convolution: field(4)?,
            reference_abundance: field(5)?.unwrap_or(0.0),
            fit_abundance: field(6)?,
            difference: field(7)?,
            chi: field(8)?,
            equivalent_width: field(9)?,
            equivalent_width_fit: field(10)?,
        });
    }
    Ok(records)
}
