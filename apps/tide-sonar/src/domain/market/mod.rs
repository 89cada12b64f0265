//! Market Data Types
//!
//! Canonical in-process representation of a snapshot tick and of the alert
//! pushed to dashboard clients. Alerts serialize with the field names the
//! dashboard consumes (`pct_chg`, `volume_ratio`, `index_code`).

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Ratio reported when no usable baseline exists for an instrument.
pub const NEUTRAL_VOLUME_RATIO: f64 = 1.0;

// =============================================================================
// Category
// =============================================================================

/// Capitalization bucket an instrument belongs to.
///
/// The four tracked buckets run from large-cap (`HS300`) to micro-cap
/// (`ZZ2000`). Anything else is `OTHER` and never produces alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Category {
    /// CSI 300 constituents.
    #[serde(rename = "HS300")]
    Hs300,
    /// CSI 500 constituents.
    #[serde(rename = "ZZ500")]
    Zz500,
    /// CSI 1000 constituents.
    #[serde(rename = "ZZ1000")]
    Zz1000,
    /// CSI 2000 constituents.
    #[serde(rename = "ZZ2000")]
    Zz2000,
    /// Not a member of any tracked index.
    #[default]
    #[serde(rename = "OTHER", other)]
    Other,
}

impl Category {
    /// Tracked categories in publish order.
    pub const TRACKED: [Self; 4] = [Self::Hs300, Self::Zz500, Self::Zz1000, Self::Zz2000];

    /// Parse a category label, mapping anything unrecognized to `Other`.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "HS300" => Self::Hs300,
            "ZZ500" => Self::Zz500,
            "ZZ1000" => Self::Zz1000,
            "ZZ2000" => Self::Zz2000,
            _ => Self::Other,
        }
    }

    /// Wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hs300 => "HS300",
            Self::Zz500 => "ZZ500",
            Self::Zz1000 => "ZZ1000",
            Self::Zz2000 => "ZZ2000",
            Self::Other => "OTHER",
        }
    }

    /// Whether alerts are produced for this category.
    #[must_use]
    pub const fn is_tracked(self) -> bool {
        !matches!(self, Self::Other)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Instrument Tick
// =============================================================================

/// One instrument's state within a single poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentTick {
    /// Exchange code without suffix (e.g. `600000`).
    pub code: String,
    /// Display name.
    pub name: String,
    /// Last traded price.
    pub price: f64,
    /// Percent change on the day (1.5 means +1.5%).
    pub pct_change: f64,
    /// Cumulative traded volume.
    pub volume: u64,
    /// Cumulative turnover (traded value).
    pub amount: f64,
    /// Snapshot time in exchange-local time.
    pub timestamp: NaiveDateTime,
    /// Capitalization bucket.
    pub category: Category,
    /// Industry tag, if known.
    pub industry: Option<String>,
    /// Concept/theme tag, if known.
    pub concept: Option<String>,
}

impl InstrumentTick {
    /// A tick is usable when its price is positive and its turnover is a
    /// finite, non-negative number.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0 && self.amount.is_finite() && self.amount >= 0.0
    }
}

// =============================================================================
// Alert
// =============================================================================

/// Alert pushed to dashboard subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Instrument code.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Last traded price.
    pub price: f64,
    /// Percent change on the day.
    #[serde(rename = "pct_chg")]
    pub pct_change: f64,
    /// Turnover.
    pub amount: f64,
    /// Current per-minute volume relative to the historical per-bar baseline.
    #[serde(default = "neutral_ratio")]
    pub volume_ratio: f64,
    /// Capitalization bucket.
    #[serde(rename = "index_code")]
    pub category: Category,
    /// Industry tag.
    #[serde(default)]
    pub industry: Option<String>,
    /// Concept tag.
    #[serde(default)]
    pub concept: Option<String>,
    /// ISO-8601 local timestamp of the source tick.
    pub timestamp: String,
    /// Human-readable trigger summary.
    pub reason: String,
}

const fn neutral_ratio() -> f64 {
    NEUTRAL_VOLUME_RATIO
}

impl Alert {
    /// Build an alert from a screened tick and its computed ratio.
    #[must_use]
    pub fn from_tick(tick: &InstrumentTick, volume_ratio: f64) -> Self {
        Self {
            code: tick.code.clone(),
            name: tick.name.clone(),
            price: tick.price,
            pct_change: tick.pct_change,
            amount: tick.amount,
            volume_ratio,
            category: tick.category,
            industry: tick.industry.clone(),
            concept: tick.concept.clone(),
            timestamp: format_timestamp(tick.timestamp),
            reason: describe_trigger(volume_ratio, tick.amount, tick.pct_change),
        }
    }
}

/// Format a local timestamp as ISO-8601 without offset.
#[must_use]
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

/// Summary line shown on the dashboard card: ratio, turnover in units of
/// 10,000 (万), and percent change.
#[must_use]
pub fn describe_trigger(volume_ratio: f64, amount: f64, pct_change: f64) -> String {
    format!(
        "量比:{volume_ratio:.1}|金额:{:.0}万|涨幅:{pct_change:.2}%",
        amount / 10_000.0
    )
}

// =============================================================================
// Tests
// =============================================================================
