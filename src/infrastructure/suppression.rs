//! Rule-based identifier suppression

use std::path::Path;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::domain::entities::Dependency;
use crate::domain::services::SuppressionFilter;
use crate::domain::value_objects::Identifier;

/// Errors loading suppression rules
#[derive(Error, Debug)]
pub enum SuppressionError {
    #[error("I/O error reading suppression rules: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid suppression pattern '{pattern}': {error}")]
    Pattern {
        pattern: String,
        error: regex::Error,
    },
}

/// Suppresses identifiers whose value matches any configured pattern.
///
/// Rules are regexes over the identifier value, one per line in the rules
/// file; blank lines and `#` comments are skipped.
pub struct PatternSuppressionFilter {
    patterns: Vec<Regex>,
}

impl PatternSuppressionFilter {
    pub fn new(patterns: &[String]) -> Result<Self, SuppressionError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|error| SuppressionError::Pattern {
                    pattern: p.clone(),
                    error,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn from_file(path: &Path) -> Result<Self, SuppressionError> {
        let raw = std::fs::read_to_string(path)?;
        let lines: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_owned)
            .collect();
        Self::new(&lines)
    }
}

impl SuppressionFilter for PatternSuppressionFilter {
    fn should_suppress(&self, dependency: &Dependency, identifier: &Identifier) -> bool {
        let suppressed = self.patterns.iter().any(|p| p.is_match(&identifier.value));
        if suppressed {
            debug!(
                dependency = %dependency.display_name,
                identifier = %identifier.value,
                "suppressed identifier"
            );
        }
        suppressed
    }
}
