//! Line list and reference abundance inputs.

mod filter;

pub use filter::ElementFilter;

use crate::domain::{FitError, FitResult, LineEntry};
use crate::serialization::{Delimiter, data_rows, parse_optional_f64};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Parses `[identifier, wavelength]` rows.
///
/// A first row whose wavelength does not parse is taken as a header.
pub fn parse_line_list(
    source: &str,
    delimiter: Delimiter,
    split_order: bool,
) -> FitResult<Vec<LineEntry>> {
    let mut lines = Vec::new();
    for (position, row) in data_rows(source, delimiter).enumerate() {
        if row.fields.len() < 2 {
            return Err(FitError::input_validation(
                "INPUT.LINE_LIST_ROW",
                format!(
                    "line list row {} needs identifier and wavelength columns",
                    row.line_number
                ),
            ));
        }

        let identifier = row.fields[0];
        let wavelength = match row.fields[1].parse::<f64>() {
            Ok(value) if value.is_finite() => value,
            Err(_) if position == 0 => continue,
            _ => {
                return Err(FitError::input_validation(
                    "INPUT.LINE_LIST_ROW",
                    format!(
                        "line list row {} has invalid wavelength '{}'",
                        row.line_number, row.fields[1]
                    ),
                ));
            }
        };
        if identifier.is_empty() {
            return Err(FitError::input_validation(
                "INPUT.LINE_LIST_ROW",
                format!("line list row {} has an empty identifier", row.line_number),
            ));
        }

        lines.push(LineEntry::new(identifier, wavelength, split_order));
    }
    Ok(lines)
}

pub fn load_line_list(
    path: &Path,
    delimiter: Delimiter,
    split_order: bool,
) -> FitResult<Vec<LineEntry>> {
    let source = read_input(path, "IO.LINE_LIST_READ", "line list")?;
    parse_line_list(&source, delimiter, split_order).map_err(|error| {
        FitError::input_validation(
            error.placeholder(),
            format!("{}: {}", path.display(), error.message()),
        )
    })
}

/// Reference abundances keyed by element.
///
/// Blank and `nan` values are kept as absent so that lookups can tell an
/// element listed without a value from a measured one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceTable {
    values: BTreeMap<String, Option<f64>>,
}

impl ReferenceTable {
    pub fn parse(source: &str, delimiter: Delimiter) -> FitResult<Self> {
        let mut values = BTreeMap::new();
        for (position, row) in data_rows(source, delimiter).enumerate() {
            let element = row.fields[0];
            let value = match row.fields.get(1) {
                None => None,
                Some(field) => match parse_optional_f64(field) {
                    Ok(value) => value,
                    Err(_) if position == 0 => continue,
                    Err(_) => {
                        return Err(FitError::input_validation(
                            "INPUT.REFERENCE_ROW",
                            format!(
                                "reference row {} has invalid abundance '{}'",
                                row.line_number, field
                            ),
                        ));
                    }
                },
            };
            values.insert(element.to_string(), value);
        }
        Ok(Self { values })
    }

    pub fn load(path: &Path, delimiter: Delimiter) -> FitResult<Self> {
        let source = read_input(path, "IO.REFERENCE_READ", "reference abundances")?;
        Self::parse(&source, delimiter).map_err(|error| {
            FitError::input_validation(
                error.placeholder(),
                format!("{}: {}", path.display(), error.message()),
            )
        })
    }

    /// `None` when the element is missing or listed without a value.
    pub fn lookup(&self, element: &str) -> Option<f64> {
        self.values.get(element).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn read_input(path: &Path, placeholder: &'static str, what: &str) -> FitResult<String> {
    fs::read_to_string(path).map_err(|source| {
        FitError::io_system(
            placeholder,
            format!("failed to read {} '{}': {}", what, path.display(), source),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::{ReferenceTable, load_line_list, parse_line_list};
    use crate::serialization::Delimiter;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn line_list_skips_header_and_comments() {
        let source = "Element,Lambda\n# iron lines\nFe1,5000.0\n\nTi2 4500.25\n";
        let lines = parse_line_list(source, Delimiter::Auto, true).expect("line list should parse");

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].identifier, "Fe1");
        assert_eq!(lines[0].element, "Fe");
        assert_eq!(lines[1].element, "Ti");
        assert_eq!(lines[1].order, "2");
        assert_eq!(lines[1].wavelength, 4500.25);
    }

    #[test]
    fn order_suffix_can_be_kept_on_the_element() {
        let lines =
            parse_line_list("Fe 5000.0\n", Delimiter::Whitespace, false).expect("should parse");
        assert_eq!(lines[0].element, "Fe");
        assert_eq!(lines[0].order, "");
    }

    #[test]
    fn malformed_rows_after_the_first_are_errors() {
        let error = parse_line_list("Fe1,5000\nTi2,abc\n", Delimiter::Comma, true)
            .expect_err("second row is malformed");
        assert_eq!(error.placeholder(), "INPUT.LINE_LIST_ROW");
        assert!(error.message().contains("row 2"));

        let error =
            parse_line_list("Fe1\n", Delimiter::Comma, true).expect_err("missing wavelength");
        assert_eq!(error.placeholder(), "INPUT.LINE_LIST_ROW");
    }

    #[test]
    fn missing_line_list_is_an_io_error() {
        let temp = TempDir::new().expect("tempdir should be created");
        let error = load_line_list(&temp.path().join("lines.csv"), Delimiter::Auto, true)
            .expect_err("file does not exist");
        assert_eq!(error.placeholder(), "IO.LINE_LIST_READ");
    }

    #[test]
    fn reference_table_reads_absent_values() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("refs.csv");
        fs::write(&path, "Element,Abundance\nFe,7.5\nTi,\nMg,nan\nCa 6.3\nNa\n")
            .expect("reference file should be written");

        let table = ReferenceTable::load(&path, Delimiter::Auto).expect("table should load");
        assert_eq!(table.len(), 5);
        assert_eq!(table.lookup("Fe"), Some(7.5));
        assert_eq!(table.lookup("Ca"), Some(6.3));
        assert_eq!(table.lookup("Ti"), None);
        assert_eq!(table.lookup("Mg"), None);
        assert_eq!(table.lookup("Na"), None);
        assert_eq!(table.lookup("Si"), None);
    }

    #[test]
    fn invalid_reference_values_are_rejected() {
        let error = ReferenceTable::parse("Fe,7.5\nTi,high\n", Delimiter::Comma)
            .expect_err("value is not numeric");
        assert_eq!(error.placeholder(), "INPUT.REFERENCE_ROW");
    }
}
