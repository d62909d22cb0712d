use super::{Spectrum, SpectrumError};
use crate::domain::{FitError, FitResult};
use crate::serialization::{Delimiter, data_rows};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpectrumParseError {
    #[error("row {line_number} needs wavelength and flux columns, found {found} column(s)")]
    MissingColumn { line_number: usize, found: usize },
    #[error("row {line_number} has non-numeric value '{value}'")]
    InvalidNumber { line_number: usize, value: String },
    #[error("spectrum needs at least 2 samples, found {found}")]
    TooFewSamples { found: usize },
    #[error(transparent)]
    Invalid(#[from] SpectrumError),
}

/// Reads `[wavelength, flux, ...]` rows; extra columns are ignored.
///
/// A first row whose wavelength is not numeric is taken as a header.
pub fn parse_spectrum(source: &str, delimiter: Delimiter) -> Result<Spectrum, SpectrumParseError> {
    let mut wavelength = Vec::new();
    let mut flux = Vec::new();

    for (position, row) in data_rows(source, delimiter).enumerate() {
        if row.fields.len() < 2 {
            return Err(SpectrumParseError::MissingColumn {
                line_number: row.line_number,
                found: row.fields.len(),
            });
        }

        let x = row.fields[0].parse::<f64>();
        if position == 0 && x.is_err() {
            continue;
        }
        let x = x.map_err(|_| SpectrumParseError::InvalidNumber {
            line_number: row.line_number,
            value: row.fields[0].to_string(),
        })?;
        let y = row.fields[1]
            .parse::<f64>()
            .map_err(|_| SpectrumParseError::InvalidNumber {
                line_number: row.line_number,
                value: row.fields[1].to_string(),
            })?;

        wavelength.push(x);
        flux.push(y);
    }

    if wavelength.len() < 2 {
        return Err(SpectrumParseError::TooFewSamples {
            found: wavelength.len(),
        });
    }
    Ok(Spectrum::new(wavelength, flux)?)
}

pub fn load_spectrum(path: &Path, delimiter: Delimiter) -> FitResult<Spectrum> {
    let source = fs::read_to_string(path).map_err(|source| {
        FitError::io_system(
            "IO.SPECTRUM_READ",
            format!("failed to read spectrum '{}': {}", path.display(), source),
        )
    })?;

    parse_spectrum(&source, delimiter).map_err(|error| {
        FitError::input_validation(
            "INPUT.SPECTRUM",
            format!("invalid spectrum '{}': {}", path.display(), error),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::{SpectrumParseError, load_spectrum, parse_spectrum};
    use crate::serialization::Delimiter;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn parses_comma_and_whitespace_rows_with_header() {
        let source = "# observed\nwavelength,flux\n4999.0,1.0\n4999.5, 0.8\n5000.0 0.5 0.49\n";
        let spectrum = parse_spectrum(source, Delimiter::Auto).expect("spectrum should parse");

        assert_eq!(spectrum.wavelength(), &[4999.0, 4999.5, 5000.0]);
        assert_eq!(spectrum.flux(), &[1.0, 0.8, 0.5]);
    }

    #[test]
    fn rejects_malformed_rows() {
        let error = parse_spectrum("1.0 2.0\n3.0\n", Delimiter::Whitespace)
            .expect_err("single column row should fail");
        assert_eq!(
            error,
            SpectrumParseError::MissingColumn {
                line_number: 2,
                found: 1
            }
        );

        let error = parse_spectrum("1.0 2.0\nx 3.0\n", Delimiter::Whitespace)
            .expect_err("non-numeric wavelength after the first row should fail");
        assert!(matches!(error, SpectrumParseError::InvalidNumber { line_number: 2, .. }));

        let error = parse_spectrum("2.0 1.0\n1.0 1.0\n", Delimiter::Whitespace)
            .expect_err("descending axis should fail");
        assert!(matches!(error, SpectrumParseError::Invalid(_)));

        let error = parse_spectrum("# nothing\n1.0 1.0\n", Delimiter::Whitespace)
            .expect_err("one sample is too few");
        assert_eq!(error, SpectrumParseError::TooFewSamples { found: 1 });
    }

    #[test]
    fn load_maps_failures_to_placeholders() {
        let temp = TempDir::new().expect("tempdir should be created");
        let missing = temp.path().join("missing.txt");
        let error = load_spectrum(&missing, Delimiter::Auto).expect_err("missing file should fail");
        assert_eq!(error.placeholder(), "IO.SPECTRUM_READ");

        let broken = temp.path().join("broken.txt");
        fs::write(&broken, "1.0 a\n").expect("fixture should be written");
        let error = load_spectrum(&broken, Delimiter::Auto).expect_err("broken file should fail");
        assert_eq!(error.placeholder(), "INPUT.SPECTRUM");
    }
}
