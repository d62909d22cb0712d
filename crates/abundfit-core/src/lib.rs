//! Stellar absorption-line abundance fitting.
//!
//! Observed spectra are compared against synthetic ones from a
//! [`synthesis::SynthesisBackend`]; each line of the line list gets its
//! wavelength shift, continuum, broadening and abundance fitted in turn and
//! the results are kept in a restartable ledger.

pub mod catalog;
pub mod domain;
pub mod fitting;
pub mod ledger;
pub mod numerics;
pub mod pipelines;
pub mod serialization;
pub mod spectrum;
pub mod synthesis;
