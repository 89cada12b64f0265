//! Snapshot Sources
//!
//! Adapters implementing `SnapshotSource`:
//!
//! - `http`: the vendor batch quote API, polled over the constituents universe
//! - `simulated`: a random-walk universe for running without a license
//!
//! `build_source` picks one from configuration.

/// Vendor batch quote client.
pub mod http;

/// Lenient decoding of vendor quote records.
pub mod quote;

/// Random-walk snapshot generator.
pub mod simulated;

/// Code → category universe loaded from the constituents file.
pub mod universe;

use std::sync::Arc;

use chrono::FixedOffset;
use tokio_util::sync::CancellationToken;

pub use http::{HttpSnapshotSource, HttpSourceConfig};
pub use simulated::SimulatedSource;
pub use universe::{Universe, UniverseError};

use crate::application::ports::{FetchError, SnapshotSource};
use crate::infrastructure::config::{SourceKind, SourceSettings};

/// Errors building a snapshot source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The vendor source was selected without a license.
    #[error("vendor source requires a license")]
    MissingLicense,

    /// The constituents file could not be loaded.
    #[error("failed to load universe from {path}: {source}")]
    Universe {
        /// File that was read.
        path: String,
        /// Underlying error.
        #[source]
        source: UniverseError,
    },

    /// The HTTP client could not be created.
    #[error("failed to create vendor client: {0}")]
    Client(#[from] FetchError),
}

/// Build the snapshot source selected by `settings`.
///
/// The vendor source must be built from within a tokio runtime; it abandons
/// an in-progress fetch once `cancel` fires.
///
/// # Errors
///
/// Returns `SourceError` if the vendor source is selected and its license,
/// universe or client is unavailable.
pub fn build_source(
    settings: &SourceSettings,
    offset: FixedOffset,
    cancel: CancellationToken,
) -> Result<Arc<dyn SnapshotSource>, SourceError> {
    match settings.kind {
        SourceKind::Simulated => {
            let source = SimulatedSource::new(settings.simulated_universe_size, offset);
            tracing::info!(instruments = source.len(), "Using simulated snapshot source");
            Ok(Arc::new(source))
        }
        SourceKind::Http => {
            let config = settings.http_config().ok_or(SourceError::MissingLicense)?;
            let universe = Universe::load(&settings.constituents_path).map_err(|source| {
                SourceError::Universe {
                    path: settings.constituents_path.display().to_string(),
                    source,
                }
            })?;
            if universe.is_empty() {
                tracing::warn!(
                    path = %settings.constituents_path.display(),
                    "Constituents file lists no tracked instruments"
                );
            }
            tracing::info!(
                instruments = universe.len(),
                base_url = %config.base_url,
                batch_size = config.batch_size,
                "Using vendor snapshot source"
            );
            let source = HttpSnapshotSource::new(config, Arc::new(universe), offset)?
                .with_cancellation(cancel);
            Ok(Arc::new(source))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
