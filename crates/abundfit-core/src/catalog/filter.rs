use crate::domain::{FitError, FitResult, LineEntry};
use globset::{Glob, GlobMatcher};

/// Glob patterns selecting which line identifiers a run processes.
///
/// An empty pattern list selects every line.
#[derive(Debug, Clone, Default)]
pub struct ElementFilter {
    matchers: Vec<GlobMatcher>,
}

impl ElementFilter {
    pub fn new(patterns: &[String]) -> FitResult<Self> {
        let mut matchers = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let matcher = Glob::new(pattern)
                .map_err(|source| {
                    FitError::input_validation(
                        "INPUT.ELEMENT_FILTER",
                        format!("invalid element pattern '{}': {}", pattern, source),
                    )
                })?
                .compile_matcher();
            matchers.push(matcher);
        }
        Ok(Self { matchers })
    }

    pub fn matches(&self, line: &LineEntry) -> bool {
        self.matchers.is_empty()
            || self
                .matchers
                .iter()
                .any(|matcher| matcher.is_match(&line.identifier))
    }
}
