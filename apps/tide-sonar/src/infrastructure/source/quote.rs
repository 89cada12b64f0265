//! Vendor Quote Records
//!
//! The batch quote endpoint answers with a JSON array of loosely typed
//! records using short pinyin keys:
//!
//! | Key | Meaning |
//! |---|---|
//! | `dm` | instrument code |
//! | `mc` / `name` | display name |
//! | `p` | last price |
//! | `pc` / `zdf` | percent change |
//! | `v` | volume |
//! | `cje` | turnover |
//!
//! Numbers arrive either as JSON numbers or as strings. Missing or blank
//! numerics default to zero, a missing name defaults to the code, and a
//! record without a code is dropped.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::universe::{Universe, normalize_code};
use crate::domain::market::InstrumentTick;

/// A record that cannot become a tick.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedRecord {
    /// No `dm` field, or it is blank.
    #[error("quote record has no instrument code")]
    MissingCode,

    /// Record is not a JSON object of the expected shape.
    #[error("quote record has unexpected shape: {0}")]
    Shape(String),
}

/// One vendor quote as received.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawQuote {
    /// Instrument code.
    #[serde(default, deserialize_with = "lenient_text")]
    pub dm: Option<String>,
    /// Display name.
    #[serde(default, deserialize_with = "lenient_text")]
    pub mc: Option<String>,
    /// Alternate display name key.
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: Option<String>,
    /// Last price.
    #[serde(default, deserialize_with = "lenient_number")]
    pub p: Option<f64>,
    /// Percent change.
    #[serde(default, deserialize_with = "lenient_number")]
    pub pc: Option<f64>,
    /// Alternate percent change key.
    #[serde(default, deserialize_with = "lenient_number")]
    pub zdf: Option<f64>,
    /// Volume.
    #[serde(default, deserialize_with = "lenient_number")]
    pub v: Option<f64>,
    /// Turnover.
    #[serde(default, deserialize_with = "lenient_number")]
    pub cje: Option<f64>,
}

impl RawQuote {
    /// Decode one array element.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecord::Shape` when the element is not an object.
    pub fn from_value(value: Value) -> Result<Self, MalformedRecord> {
        serde_json::from_value(value).map_err(|e| MalformedRecord::Shape(e.to_string()))
    }

    /// Convert into a tick stamped `at`, tagged from `universe`.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecord::MissingCode` when the record has no code.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn into_tick(
        self,
        universe: &Universe,
        at: NaiveDateTime,
    ) -> Result<InstrumentTick, MalformedRecord> {
        let code = self
            .dm
            .as_deref()
            .map(normalize_code)
            .filter(|code| !code.is_empty())
            .ok_or(MalformedRecord::MissingCode)?
            .to_string();

        let name = self
            .mc
            .or(self.name)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| code.clone());

        // A zero `pc` falls through to `zdf`.
        let pct_change = self
            .pc
            .filter(|pc| *pc != 0.0)
            .or(self.zdf)
            .unwrap_or(0.0);

        let volume = self.v.filter(|v| *v > 0.0).map_or(0, |v| v as u64);

        Ok(InstrumentTick {
            category: universe.category_of(&code),
            code,
            name,
            price: self.p.unwrap_or(0.0),
            pct_change,
            volume,
            amount: self.cje.unwrap_or(0.0),
            timestamp: at,
            industry: None,
            concept: None,
        })
    }
}

/// Convert a decoded response body into ticks, dropping malformed records.
///
/// Returns the ticks and the number of records dropped.
#[must_use]
pub fn ticks_from_records(
    records: Vec<Value>,
    universe: &Universe,
    at: NaiveDateTime,
) -> (Vec<InstrumentTick>, usize) {
    let mut dropped = 0usize;
    let ticks = records
        .into_iter()
        .filter_map(|value| {
            match RawQuote::from_value(value).and_then(|quote| quote.into_tick(universe, at)) {
                Ok(tick) => Some(tick),
                Err(e) => {
                    dropped += 1;
                    tracing::debug!(error = %e, "Dropping malformed quote record");
                    None
                }
            }
        })
        .collect();
    (ticks, dropped)
}

fn number_from_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(number_from_value))
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;
    use crate::domain::market::Category;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(10, 15, 0)
            .unwrap()
    }

    fn universe() -> Universe {
        Universe::from_labels([("600000", "HS300"), ("000001", "ZZ500")])
    }

    fn tick(value: Value) -> Result<InstrumentTick, MalformedRecord> {
        RawQuote::from_value(value)?.into_tick(&universe(), at())
    }

    #[test]
    fn full_record() {
        let t = tick(json!({
            "dm": "600000", "mc": "浦发银行", "p": 10.52, "pc": 1.25,
            "v": 123_456, "cje": 129_876_543.5
        }))
        .unwrap();
        assert_eq!(t.code, "600000");
        assert_eq!(t.name, "浦发银行");
        assert!((t.price - 10.52).abs() < f64::EPSILON);
        assert!((t.pct_change - 1.25).abs() < f64::EPSILON);
        assert_eq!(t.volume, 123_456);
        assert!((t.amount - 129_876_543.5).abs() < f64::EPSILON);
        assert_eq!(t.category, Category::Hs300);
        assert_eq!(t.timestamp, at());
    }

    #[test]
    fn numbers_as_strings() {
        let t = tick(json!({"dm": "000001", "p": "11.2", "v": " 5000 ", "cje": "56000000"})).unwrap();
        assert!((t.price - 11.2).abs() < f64::EPSILON);
        assert_eq!(t.volume, 5_000);
        assert_eq!(t.category, Category::Zz500);
    }

    #[test]
    fn missing_numerics_default_to_zero() {
        let t = tick(json!({"dm": "600000"})).unwrap();
        assert!(t.price.abs() < f64::EPSILON);
        assert!(t.pct_change.abs() < f64::EPSILON);
        assert_eq!(t.volume, 0);
        assert!(t.amount.abs() < f64::EPSILON);
    }

    #[test]
    fn blank_or_garbage_numerics_default_to_zero() {
        let t = tick(json!({"dm": "600000", "p": "", "v": "--", "cje": null})).unwrap();
        assert!(t.price.abs() < f64::EPSILON);
        assert_eq!(t.volume, 0);
        assert!(t.amount.abs() < f64::EPSILON);
    }

    #[test]
    fn missing_name_defaults_to_code() {
        assert_eq!(tick(json!({"dm": "600000"})).unwrap().name, "600000");
        assert_eq!(tick(json!({"dm": "600000", "mc": "  "})).unwrap().name, "600000");
    }

    #[test]
    fn alternate_name_key() {
        let t = tick(json!({"dm": "600000", "name": "浦发银行"})).unwrap();
        assert_eq!(t.name, "浦发银行");
    }

    #[test]
    fn zdf_used_when_pc_missing_or_zero() {
        let t = tick(json!({"dm": "600000", "zdf": -2.5})).unwrap();
        assert!((t.pct_change + 2.5).abs() < f64::EPSILON);
        let t = tick(json!({"dm": "600000", "pc": 0, "zdf": 3.0})).unwrap();
        assert!((t.pct_change - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn negative_volume_clamps_to_zero() {
        assert_eq!(tick(json!({"dm": "600000", "v": -10})).unwrap().volume, 0);
    }

    #[test]
    fn suffixed_code_is_normalized_and_tagged() {
        let t = tick(json!({"dm": "600000.SH"})).unwrap();
        assert_eq!(t.code, "600000");
        assert_eq!(t.category, Category::Hs300);
    }

    #[test]
    fn numeric_code_is_accepted() {
        let t = tick(json!({"dm": 600_000})).unwrap();
        assert_eq!(t.code, "600000");
    }

    #[test]
    fn missing_code_is_malformed() {
        assert_eq!(tick(json!({"p": 10.0})), Err(MalformedRecord::MissingCode));
        assert_eq!(tick(json!({"dm": ""})), Err(MalformedRecord::MissingCode));
    }

    #[test]
    fn unknown_member_is_other() {
        assert_eq!(tick(json!({"dm": "300750"})).unwrap().category, Category::Other);
    }

    #[test]
    fn malformed_records_are_dropped_from_batch() {
        let records = vec![
            json!({"dm": "600000", "p": 10.0}),
            json!("not an object"),
            json!({"p": 3.0}),
            json!({"dm": "000001", "p": 11.0}),
        ];
        let (ticks, dropped) = ticks_from_records(records, &universe(), at());
        let codes: Vec<&str> = ticks.iter().map(|t| t.code.as_str()).collect();
        assert_eq!(codes, ["600000", "000001"]);
        assert_eq!(dropped, 2);
    }
}
