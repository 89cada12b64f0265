//! Anomaly Monitor
//!
//! Turns one snapshot into alerts: screen each tick, score its volume ratio
//! against the baseline, and relay every alert to the optional publisher.

use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::application::ports::{AlertPublisher, BaselineProvider};
use crate::domain::detection::{DetectionThresholds, screen, volume_ratio};
use crate::domain::market::{Alert, InstrumentTick};
use crate::domain::schedule::SessionHours;
use crate::infrastructure::metrics;

/// Screens snapshots into alerts.
pub struct AnomalyMonitor {
    baselines: Arc<dyn BaselineProvider>,
    thresholds: DetectionThresholds,
    hours: SessionHours,
    publisher: Option<Arc<dyn AlertPublisher>>,
}

impl AnomalyMonitor {
    /// Create a monitor without a relay publisher.
    #[must_use]
    pub fn new(
        baselines: Arc<dyn BaselineProvider>,
        thresholds: DetectionThresholds,
        hours: SessionHours,
    ) -> Self {
        Self {
            baselines,
            thresholds,
            hours,
            publisher: None,
        }
    }

    /// Relay every detected alert to `publisher` as well.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn AlertPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Screening thresholds in use.
    #[must_use]
    pub const fn thresholds(&self) -> &DetectionThresholds {
        &self.thresholds
    }

    /// Screen and score a snapshot taken at exchange-local time `now`.
    ///
    /// Alerts come back in snapshot order. A publisher failure is counted
    /// and logged, and the remaining ticks are still processed.
    pub fn detect(&self, snapshot: &[InstrumentTick], now: NaiveDateTime) -> Vec<Alert> {
        let elapsed = self.hours.elapsed_minutes(now.time());
        let mut alerts = Vec::new();
        let mut relayed = 0usize;
        let mut publish_failures = 0usize;

        for tick in snapshot {
            if let Err(rejection) = screen(tick, &self.thresholds) {
                metrics::record_tick_rejected(rejection);
                continue;
            }

            let ratio = volume_ratio(tick.volume, elapsed, self.baselines.get(&tick.code));
            let alert = Alert::from_tick(tick, ratio);

            if let Some(publisher) = &self.publisher {
                match publisher.publish(&alert) {
                    Ok(()) => relayed += 1,
                    Err(e) => {
                        publish_failures += 1;
                        tracing::debug!(code = %alert.code, error = %e, "Alert relay failed");
                    }
                }
            }

            alerts.push(alert);
        }

        if publish_failures > 0 {
            metrics::record_relay_failures(publish_failures as u64);
            tracing::warn!(
                failures = publish_failures,
                alerts = alerts.len(),
                "Some alerts could not be relayed"
            );
        }
        metrics::record_alerts_detected(alerts.len() as u64);
        if relayed > 0 {
            metrics::record_alerts_relayed(relayed as u64);
        }

        tracing::debug!(
            ticks = snapshot.len(),
            alerts = alerts.len(),
            elapsed_minutes = elapsed,
            "Snapshot screened"
        );
        alerts
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::NaiveDate;

    use super::*;
    use crate::application::ports::{MockAlertPublisher, PublishError};
    use crate::domain::detection::UNKNOWN_BASELINE;
    use crate::domain::market::Category;

    struct Baselines(HashMap<String, f64>);

    impl BaselineProvider for Baselines {
        fn get(&self, code: &str) -> f64 {
            self.0.get(code).copied().unwrap_or(UNKNOWN_BASELINE)
        }
    }

    fn baselines(entries: &[(&str, f64)]) -> Arc<dyn BaselineProvider> {
        Arc::new(Baselines(
            entries.iter().map(|(c, v)| ((*c).to_string(), *v)).collect(),
        ))
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn tick(code: &str, category: Category, amount: f64, volume: u64) -> InstrumentTick {
        InstrumentTick {
            code: code.to_string(),
            name: format!("name-{code}"),
            price: 10.0,
            pct_change: 2.0,
            volume,
            amount,
            timestamp: at(10, 30),
            category,
            industry: None,
            concept: None,
        }
    }

    fn monitor(baselines: Arc<dyn BaselineProvider>) -> AnomalyMonitor {
        AnomalyMonitor::new(
            baselines,
            DetectionThresholds::default(),
            SessionHours::default(),
        )
    }

    #[test]
    fn scores_against_baseline() {
        // 10:30 is 60 minutes after the open.
        let m = monitor(baselines(&[("600000", 500.0)]));
        let snapshot = [tick("600000", Category::Hs300, 50_000_000.0, 12_000)];
        let alerts = m.detect(&snapshot, at(10, 30));
        assert_eq!(alerts.len(), 1);
        // (12000 / 60) / (500 / 5) = 2.0
        assert!((alerts[0].volume_ratio - 2.0).abs() < 1e-12);
        assert!(alerts[0].reason.starts_with("量比:2.0|"));
    }

    #[test]
    fn missing_baseline_is_neutral() {
        let m = monitor(baselines(&[]));
        let alerts = m.detect(
            &[tick("000001", Category::Zz500, 50_000_000.0, 500)],
            at(10, 30),
        );
        assert!((alerts[0].volume_ratio - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rejected_ticks_are_dropped_in_order() {
        let m = monitor(baselines(&[]));
        let mut bad_price = tick("bad", Category::Hs300, 90_000_000.0, 5_000);
        bad_price.price = 0.0;
        let snapshot = [
            tick("a", Category::Zz2000, 3_000_001.0, 150),
            bad_price,
            tick("b", Category::Other, 90_000_000.0, 5_000),
            tick("c", Category::Zz2000, 2_999_999.0, 150),
            tick("d", Category::Zz1000, 20_000_000.0, 50),
            tick("e", Category::Zz1000, 20_000_000.0, 500),
        ];
        let codes: Vec<String> = m
            .detect(&snapshot, at(14, 0))
            .into_iter()
            .map(|a| a.code)
            .collect();
        assert_eq!(codes, ["a", "e"]);
    }

    #[test]
    fn every_alert_is_relayed() {
        let mut publisher = MockAlertPublisher::new();
        publisher.expect_publish().times(2).returning(|_| Ok(()));
        let m = monitor(baselines(&[])).with_publisher(Arc::new(publisher));
        let snapshot = [
            tick("a", Category::Hs300, 50_000_000.0, 1_000),
            tick("b", Category::Hs300, 60_000_000.0, 1_000),
        ];
        assert_eq!(m.detect(&snapshot, at(10, 0)).len(), 2);
    }

    #[test]
    fn relay_failure_does_not_abort_cycle() {
        let mut publisher = MockAlertPublisher::new();
        publisher
            .expect_publish()
            .times(3)
            .returning(|alert| {
                if alert.code == "b" {
                    Err(PublishError::Transport("channel closed".to_string()))
                } else {
                    Ok(())
                }
            });
        let m = monitor(baselines(&[])).with_publisher(Arc::new(publisher));
        let snapshot = [
            tick("a", Category::Hs300, 50_000_000.0, 1_000),
            tick("b", Category::Hs300, 60_000_000.0, 1_000),
            tick("c", Category::Hs300, 70_000_000.0, 1_000),
        ];
        let codes: Vec<String> = m
            .detect(&snapshot, at(10, 0))
            .into_iter()
            .map(|a| a.code)
            .collect();
        assert_eq!(codes, ["a", "b", "c"]);
    }
}
