//! Instrument Universe
//!
//! Code → category map produced by the constituents cache job. Codes may
//! carry an exchange suffix (`600000.SH`); they are stored bare.

use std::collections::BTreeMap;
use std::path::Path;

use crate::domain::market::Category;

/// Errors loading the universe file.
#[derive(Debug, thiserror::Error)]
pub enum UniverseError {
    /// File could not be read.
    #[error("failed to read constituents file: {0}")]
    Io(#[from] std::io::Error),

    /// File is not a JSON object of code → label.
    #[error("failed to parse constituents file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Strip an exchange suffix from an instrument code.
#[must_use]
pub fn normalize_code(code: &str) -> &str {
    let trimmed = code.trim();
    trimmed.split_once('.').map_or(trimmed, |(bare, _)| bare)
}

/// Instruments to poll with their category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Universe {
    members: BTreeMap<String, Category>,
}

impl Universe {
    /// Load the universe from a JSON object file.
    ///
    /// # Errors
    ///
    /// Returns `UniverseError` if the file is missing or malformed.
    pub fn load(path: &Path) -> Result<Self, UniverseError> {
        let raw = std::fs::read_to_string(path)?;
        let labels: BTreeMap<String, String> = serde_json::from_str(&raw)?;
        Ok(Self::from_labels(labels))
    }

    /// Build a universe from code → label pairs.
    #[must_use]
    pub fn from_labels<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let members = labels
            .into_iter()
            .filter_map(|(code, label)| {
                let code = normalize_code(code.as_ref());
                (!code.is_empty())
                    .then(|| (code.to_string(), Category::from_label(label.as_ref())))
            })
            .collect();
        Self { members }
    }

    /// Category for a code (suffix allowed), `Other` when not a member.
    #[must_use]
    pub fn category_of(&self, code: &str) -> Category {
        self.members
            .get(normalize_code(code))
            .copied()
            .unwrap_or_default()
    }

    /// Member codes in sorted order.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the universe has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use test_case::test_case;

    use super::*;

    #[test_case("600000.SH" => "600000" ; "shanghai suffix")]
    #[test_case("000001.SZ" => "000001" ; "shenzhen suffix")]
    #[test_case(" 300750 " => "300750" ; "whitespace")]
    #[test_case("688981" => "688981" ; "bare")]
    fn normalization(code: &str) -> &str {
        normalize_code(code)
    }

    #[test]
    fn labels_map_to_categories() {
        let universe = Universe::from_labels([
            ("600000.SH", "HS300"),
            ("000001", "zz500"),
            ("830799.BJ", "UNKNOWN"),
        ]);
        assert_eq!(universe.len(), 3);
        assert_eq!(universe.category_of("600000"), Category::Hs300);
        assert_eq!(universe.category_of("000001.SZ"), Category::Zz500);
        assert_eq!(universe.category_of("830799"), Category::Other);
        assert_eq!(universe.category_of("999999"), Category::Other);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(r#"{"600519": "HS300", "002594.SZ": "ZZ1000"}"#.as_bytes())
            .unwrap();
        let universe = Universe::load(file.path()).unwrap();
        let codes: Vec<&str> = universe.codes().collect();
        assert_eq!(codes, ["002594", "600519"]);
        assert_eq!(universe.category_of("002594"), Category::Zz1000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[1, 2, 3]").unwrap();
        assert!(matches!(
            Universe::load(file.path()),
            Err(UniverseError::Parse(_))
        ));
    }
}
