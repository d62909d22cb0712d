mod errors;

pub use errors::{FitError, FitErrorCategory, FitResult};

/// Abundance used to synthesize a curve with the line removed.
pub const ABSENT_ABUNDANCE: f64 = -99999.0;

/// Two line wavelengths closer than this share a ledger key.
pub const WAVELENGTH_KEY_TOLERANCE: f64 = 5e-5;

/// One row of the line list.
#[derive(Debug, Clone, PartialEq)]
pub struct LineEntry {
    /// Identifier as written in the line list, order suffix included.
    pub identifier: String,
    /// Element used for reference lookups and synthesis markers.
    pub element: String,
    pub order: String,
    pub wavelength: f64,
}

impl LineEntry {
    pub fn new(identifier: impl Into<String>, wavelength: f64, split_order: bool) -> Self {
        let identifier = identifier.into();
        let (element, order) = match identifier.char_indices().last() {
            Some((index, _)) if split_order && index > 0 => (
                identifier[..index].to_string(),
                identifier[index..].to_string(),
            ),
            _ => (identifier.clone(), String::new()),
        };

        Self {
            identifier,
            element,
            order,
            wavelength,
        }
    }
}

/// Free parameters of one synthetic trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitParameters {
    pub shift: f64,
    pub continuum: f64,
    pub convolution: f64,
    pub abundance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquivalentWidths {
    pub observed: f64,
    pub fitted: f64,
}

/// One ledger row. `None` fields are written as empty cells.
#[derive(Debug, Clone, PartialEq)]
pub struct FitRecord {
    pub identifier: String,
    pub wavelength: f64,
    pub shift: Option<f64>,
    pub continuum: Option<f64>,
    pub convolution: Option<f64>,
    pub reference_abundance: f64,
    pub fit_abundance: Option<f64>,
    pub difference: Option<f64>,
    pub chi: Option<f64>,
    pub equivalent_width: Option<f64>,
    pub equivalent_width_fit: Option<f64>,
}

impl FitRecord {
    pub fn unresolved(line: &LineEntry, reference_abundance: f64) -> Self {
        Self {
            identifier: line.identifier.clone(),
            wavelength: line.wavelength,
            shift: None,
            continuum: None,
            convolution: None,
            reference_abundance,
            fit_abundance: None,
            difference: None,
            chi: None,
            equivalent_width: None,
            equivalent_width_fit: None,
        }
    }

    pub fn fitted(
        line: &LineEntry,
        reference_abundance: f64,
        parameters: FitParameters,
        chi: f64,
        widths: EquivalentWidths,
    ) -> Self {
        Self {
            identifier: line.identifier.clone(),
            wavelength: line.wavelength,
            shift: Some(parameters.shift),
            continuum: Some(parameters.continuum),
            convolution: Some(parameters.convolution),
            reference_abundance,
            fit_abundance: Some(parameters.abundance),
            difference: Some((parameters.abundance - reference_abundance).abs()),
            chi: Some(chi),
            equivalent_width: Some(widths.observed),
            equivalent_width_fit: Some(widths.fitted),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.fit_abundance.is_some()
    }

    pub fn same_key(&self, identifier: &str, wavelength: f64) -> bool {
        self.identifier == identifier
            && (self.wavelength - wavelength).abs() <= WAVELENGTH_KEY_TOLERANCE
    }

    /// Parameters of a resolved row.
    pub fn parameters(&self) -> Option<FitParameters> {
        Some(FitParameters {
            shift: self.shift?,
            continuum: self.continuum?,
            convolution: self.convolution?,
            abundance: self.fit_abundance?,
        })
    }
}
