//! Ignore/include filtering of serving paths.
//!
//! A path is valid unless an ignore pattern matches it; an include pattern
//! overrides the ignore. Without explicit ignores, dotfiles are ignored.
//! Patterns are unanchored regular expressions.

use regex::Regex;
use serde::Serialize;

const DEFAULT_IGNORED: &[&str] = &[r"^.*/\.[^/]*$"];

#[derive(Debug, Clone)]
pub struct PathFilter {
    ignored: Vec<Regex>,
    included: Vec<Regex>,
}

/// Serialized form of a [`PathFilter`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathFilterExport {
    pub ignored: Vec<String>,
    pub included: Vec<String>,
}

impl Default for PathFilter {
    fn default() -> Self {
        Self {
            ignored: DEFAULT_IGNORED
                .iter()
                .map(|p| Regex::new(p).expect("valid regex"))
                .collect(),
            included: Vec::new(),
        }
    }
}

impl PathFilter {
    /// Build from raw patterns; empty `ignored` keeps the dotfile default.
    pub fn new<S: AsRef<str>>(ignored: &[S], included: &[S]) -> Result<Self, regex::Error> {
        let mut filter = Self::default();
        if !ignored.is_empty() {
            filter.ignored = compile(ignored)?;
        }
        filter.included = compile(included)?;
        Ok(filter)
    }

    pub fn add_ignored(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.ignored.push(Regex::new(pattern)?);
        Ok(())
    }

    pub fn add_included(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.included.push(Regex::new(pattern)?);
        Ok(())
    }

    pub fn is_valid(&self, path: &str) -> bool {
        if self.ignored.iter().any(|re| re.is_match(path)) {
            return self.included.iter().any(|re| re.is_match(path));
        }
        true
    }

    pub fn export(&self) -> PathFilterExport {
        PathFilterExport {
            ignored: self.ignored.iter().map(|r| r.as_str().to_string()).collect(),
            included: self.included.iter().map(|r| r.as_str().to_string()).collect(),
        }
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|p| Regex::new(p.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotfiles_ignored_by_default() {
        let filter = PathFilter::default();
        assert!(!filter.is_valid("/static/.DS_Store"));
        assert!(filter.is_valid("/static/app.js"));
        assert!(filter.is_valid("/.well-known/x"));
    }

    #[test]
    fn includes_override_ignores() {
        let filter = PathFilter::new(&[r"\.txt$"], &[r"robots\.txt$"]).unwrap();
        assert!(!filter.is_valid("/notes.txt"));
        assert!(filter.is_valid("/robots.txt"));
        assert!(filter.is_valid("/.hidden"));
    }

    #[test]
    fn bad_pattern_is_an_error() {
        assert!(PathFilter::new(&["("], &[]).is_err());
    }

    #[test]
    fn export_lists_patterns() {
        let mut filter = PathFilter::default();
        filter.add_included(r"\.htaccess$").unwrap();
        let export = filter.export();
        assert_eq!(export.ignored, vec![r"^.*/\.[^/]*$"]);
        assert_eq!(export.included, vec![r"\.htaccess$"]);
    }
}
