//! Baseline Store
//!
//! Per-instrument average volume per 5-minute bar, loaded once at startup
//! from a flat JSON object (`{"600000": 152340, ...}`) written daily by the
//! history job. A missing or corrupt file leaves the store empty, which
//! makes every ratio neutral rather than stopping the service.

use std::collections::HashMap;
use std::path::Path;

use crate::application::ports::BaselineProvider;
use crate::domain::detection::UNKNOWN_BASELINE;

/// Errors reading a baseline file.
#[derive(Debug, thiserror::Error)]
pub enum BaselineError {
    /// File could not be read.
    #[error("failed to read baseline file: {0}")]
    Io(#[from] std::io::Error),

    /// File is not a JSON object of numbers.
    #[error("failed to parse baseline file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// In-memory baseline lookup.
#[derive(Debug, Clone, Default)]
pub struct BaselineStore {
    entries: HashMap<String, f64>,
}

impl BaselineStore {
    /// Load baselines, degrading to an empty store on any error.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(store) => {
                tracing::info!(path = %path.display(), instruments = store.len(), "Baselines loaded");
                store
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Baselines unavailable, volume ratios will be neutral"
                );
                Self::default()
            }
        }
    }

    /// Load baselines from `path`.
    ///
    /// # Errors
    ///
    /// Returns `BaselineError` if the file is missing or malformed.
    pub fn try_load(path: &Path) -> Result<Self, BaselineError> {
        let raw = std::fs::read_to_string(path)?;
        let entries: HashMap<String, f64> = serde_json::from_str(&raw)?;
        Ok(Self { entries })
    }

    /// Build a store from explicit entries.
    #[must_use]
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Number of instruments with a baseline.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no baselines are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl BaselineProvider for BaselineStore {
    fn get(&self, code: &str) -> f64 {
        self.entries.get(code).copied().unwrap_or(UNKNOWN_BASELINE)
    }
}

// =============================================================================
// Tests
// =============================================================================
