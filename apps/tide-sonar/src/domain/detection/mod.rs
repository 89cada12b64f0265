//! Anomaly Screening Rules
//!
//! Turnover is the primary liquidity signal: a tick qualifies when its
//! turnover clears the floor for its capitalization bucket and it shows a
//! minimal amount of activity. There is deliberately no percent-change gate,
//! so a flat-priced instrument with heavy turnover stays in the feed.
//!
//! # Volume ratio
//!
//! ```text
//! ratio = (volume / elapsed_minutes) / (baseline_per_bar / BAR_LENGTH_MINUTES)
//! ```
//!
//! With no positive baseline the ratio is neutral (1.0).

use std::cmp::Ordering;

use super::market::{Alert, Category, InstrumentTick, NEUTRAL_VOLUME_RATIO};

/// Length of one baseline bar in minutes.
pub const BAR_LENGTH_MINUTES: f64 = 5.0;

/// Sentinel returned by baseline lookups for unknown instruments.
pub const UNKNOWN_BASELINE: f64 = -1.0;

// =============================================================================
// Thresholds
// =============================================================================

/// Per-category turnover floors and the minimal-activity volume floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionThresholds {
    /// Floor for `HS300` and `ZZ500`.
    pub large_cap_min_amount: f64,
    /// Floor for `ZZ1000`.
    pub mid_cap_min_amount: f64,
    /// Floor for `ZZ2000`.
    pub micro_cap_min_amount: f64,
    /// Ticks with less volume than this are ignored.
    pub min_volume: u64,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            large_cap_min_amount: 20_000_000.0,
            mid_cap_min_amount: 10_000_000.0,
            micro_cap_min_amount: 3_000_000.0,
            min_volume: 100,
        }
    }
}

impl DetectionThresholds {
    /// Turnover floor for a category, `None` when the category is untracked.
    #[must_use]
    pub const fn min_amount(&self, category: Category) -> Option<f64> {
        match category {
            Category::Hs300 | Category::Zz500 => Some(self.large_cap_min_amount),
            Category::Zz1000 => Some(self.mid_cap_min_amount),
            Category::Zz2000 => Some(self.micro_cap_min_amount),
            Category::Other => None,
        }
    }
}

/// Why a tick was screened out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Non-positive price or malformed turnover.
    InvalidTick,
    /// Category is not tracked.
    UntrackedCategory,
    /// Turnover does not exceed the category floor.
    BelowTurnoverFloor,
    /// Volume below the minimal-activity floor.
    BelowActivityFloor,
}

impl Rejection {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidTick => "invalid_tick",
            Self::UntrackedCategory => "untracked_category",
            Self::BelowTurnoverFloor => "below_turnover_floor",
            Self::BelowActivityFloor => "below_activity_floor",
        }
    }
}

/// Apply the tracking, turnover and activity gates to a tick.
///
/// # Errors
///
/// Returns the first gate the tick fails.
pub fn screen(tick: &InstrumentTick, thresholds: &DetectionThresholds) -> Result<(), Rejection> {
    if !tick.is_valid() {
        return Err(Rejection::InvalidTick);
    }
    let floor = thresholds
        .min_amount(tick.category)
        .ok_or(Rejection::UntrackedCategory)?;
    if tick.amount <= floor {
        return Err(Rejection::BelowTurnoverFloor);
    }
    if tick.volume < thresholds.min_volume {
        return Err(Rejection::BelowActivityFloor);
    }
    Ok(())
}

/// Current per-minute volume relative to the baseline per-minute volume.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn volume_ratio(volume: u64, elapsed_minutes: f64, baseline_per_bar: f64) -> f64 {
    if !(baseline_per_bar.is_finite() && baseline_per_bar > 0.0) {
        return NEUTRAL_VOLUME_RATIO;
    }
    let elapsed = elapsed_minutes.max(1.0);
    (volume as f64 / elapsed) / (baseline_per_bar / BAR_LENGTH_MINUTES)
}

// =============================================================================
// Ranking
// =============================================================================

/// Select the published batch from a cycle's alerts.
///
/// Alerts are grouped by category in [`Category::TRACKED`] order, each group
/// sorted by turnover descending (stable, so equal turnover keeps snapshot
/// order) and truncated to `top_n`.
#[must_use]
pub fn rank_batch(alerts: Vec<Alert>, top_n: usize) -> Vec<Alert> {
    let mut groups: [Vec<Alert>; 4] = Default::default();
    for alert in alerts {
        if let Some(slot) = Category::TRACKED.iter().position(|c| *c == alert.category) {
            groups[slot].push(alert);
        }
    }

    let mut batch = Vec::with_capacity(groups.iter().map(|g| g.len().min(top_n)).sum());
    for mut group in groups {
        group.sort_by(|a, b| b.amount.partial_cmp(&a.amount).unwrap_or(Ordering::Equal));
        group.truncate(top_n);
        batch.extend(group);
    }
    batch
}

// =============================================================================
// Tests
// =============================================================================
