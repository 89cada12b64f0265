//! Simulated Snapshot Source
//!
//! Random-walk universe for running the pipeline without a vendor license.
//! Each snapshot moves every instrument up to ±2% around its base price,
//! with a 0.5% chance of a fat-tail move of 1.5–5% that also multiplies its
//! volume.

use chrono::{FixedOffset, NaiveDateTime, Utc};
use rand::Rng;

use crate::application::ports::{FetchError, SnapshotSource};
use crate::domain::market::{Category, InstrumentTick};

/// Default number of simulated instruments.
pub const DEFAULT_UNIVERSE_SIZE: usize = 4_000;

const SECTORS: [&str; 6] = [
    "Technology",
    "Finance",
    "Healthcare",
    "Consumer",
    "Energy",
    "Materials",
];

const FAT_TAIL_PROBABILITY: f64 = 0.005;

#[derive(Debug, Clone)]
struct SimulatedInstrument {
    code: String,
    name: String,
    category: Category,
    sector: &'static str,
    base_price: f64,
}

/// Snapshot source generating synthetic ticks.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    instruments: Vec<SimulatedInstrument>,
    offset: FixedOffset,
}

impl SimulatedSource {
    /// Create a universe of `size` instruments spread over the tracked
    /// categories.
    #[must_use]
    pub fn new(size: usize, offset: FixedOffset) -> Self {
        Self::with_rng(size, offset, &mut rand::rng())
    }

    /// Create a universe using the given random source.
    pub fn with_rng<R: Rng + ?Sized>(size: usize, offset: FixedOffset, rng: &mut R) -> Self {
        let instruments = (0..size)
            .map(|i| {
                let code = if i % 2 == 0 {
                    format!("{:06}", 600_000 + i)
                } else {
                    format!("{:06}", 1 + i)
                };
                let base_price = (rng.random_range(5.0..100.0_f64) * 100.0).round() / 100.0;
                SimulatedInstrument {
                    code,
                    name: format!("Stock-{i}"),
                    category: Category::TRACKED[rng.random_range(0..Category::TRACKED.len())],
                    sector: SECTORS[rng.random_range(0..SECTORS.len())],
                    base_price,
                }
            })
            .collect();
        Self {
            instruments,
            offset,
        }
    }

    /// Number of simulated instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether the universe is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Generate one snapshot stamped `at`.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn snapshot_with<R: Rng + ?Sized>(&self, rng: &mut R, at: NaiveDateTime) -> Vec<InstrumentTick> {
        self.instruments
            .iter()
            .map(|instrument| {
                let mut change: f64 = rng.random_range(-0.02..=0.02);
                if rng.random_bool(FAT_TAIL_PROBABILITY) {
                    let magnitude = rng.random_range(0.015..=0.05);
                    change = if rng.random_bool(0.5) { magnitude } else { -magnitude };
                }

                let price = (instrument.base_price * (1.0 + change) * 100.0).round() / 100.0;
                let pct_change = (change * 10_000.0).round() / 100.0;

                let mut volume = rng.random_range(1_000..=50_000_u64) as f64;
                if pct_change.abs() > 1.5 {
                    volume *= rng.random_range(2.0..=5.0);
                }
                let volume = volume as u64;

                InstrumentTick {
                    code: instrument.code.clone(),
                    name: instrument.name.clone(),
                    price,
                    pct_change,
                    volume,
                    // One lot is 100 shares.
                    amount: volume as f64 * price * 100.0,
                    timestamp: at,
                    category: instrument.category,
                    industry: Some(instrument.sector.to_string()),
                    concept: None,
                }
            })
            .collect()
    }
}

impl SnapshotSource for SimulatedSource {
    fn fetch_snapshot(&self) -> Result<Vec<InstrumentTick>, FetchError> {
        if self.instruments.is_empty() {
            return Err(FetchError::EmptyUniverse);
        }
        let at = Utc::now().with_timezone(&self.offset).naive_local();
        Ok(self.snapshot_with(&mut rand::rng(), at))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

// =============================================================================
// Tests
// =============================================================================
