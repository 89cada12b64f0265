//! Producer Loop
//!
//! Single background task that decides, once per tick, whether to fetch a
//! snapshot, and publishes the ranked result to subscribers.
//!
//! # States
//!
//! | State | Condition | Action |
//! |---|---|---|
//! | `IdleNoSubscribers` | no subscribers, cache has data | short sleep |
//! | `MarketClosedFresh` | closed, cache fresh | long sleep |
//! | `MarketClosedStaleFetch` | closed, cache empty or stale | one fetch, long sleep |
//! | `ActivePoll` | market open | fetch, fast sleep |
//!
//! Fetches run on the blocking pool so the loop's timers and cancellation
//! stay responsive while a slow vendor request is in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::monitor::AnomalyMonitor;
use crate::application::ports::{BroadcastPort, FanOutReport, SnapshotSource};
use crate::domain::detection::rank_batch;
use crate::domain::schedule::MarketSchedule;
use crate::infrastructure::metrics;

// =============================================================================
// State Machine
// =============================================================================

/// What the producer decided to do on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerState {
    /// Nobody is listening and the cache already holds a batch.
    IdleNoSubscribers,
    /// Market closed and the cached batch is still current.
    MarketClosedFresh,
    /// Market closed but the cache is empty or predates the close.
    MarketClosedStaleFetch,
    /// Market open; polling at the fast interval.
    ActivePoll,
}

impl ProducerState {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IdleNoSubscribers => "idle_no_subscribers",
            Self::MarketClosedFresh => "market_closed_fresh",
            Self::MarketClosedStaleFetch => "market_closed_stale_fetch",
            Self::ActivePoll => "active_poll",
        }
    }

    /// Whether this state runs a fetch cycle.
    #[must_use]
    pub const fn fetches(self) -> bool {
        matches!(self, Self::MarketClosedStaleFetch | Self::ActivePoll)
    }
}

/// Pick the producer state from the current observations.
#[must_use]
pub const fn next_state(
    has_subscribers: bool,
    has_data: bool,
    market_open: bool,
    stale: bool,
) -> ProducerState {
    if !has_subscribers && has_data {
        ProducerState::IdleNoSubscribers
    } else if market_open {
        ProducerState::ActivePoll
    } else if has_data && !stale {
        ProducerState::MarketClosedFresh
    } else {
        ProducerState::MarketClosedStaleFetch
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Cadence and batch bounds for the producer.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Sleep between cycles while the market is open.
    pub poll_interval: Duration,
    /// Recheck interval while idle without subscribers.
    pub idle_interval: Duration,
    /// Sleep while the market is closed.
    pub closed_interval: Duration,
    /// Maximum alerts per category in a published batch.
    pub top_n_per_category: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            idle_interval: Duration::from_secs(1),
            closed_interval: Duration::from_secs(60),
            top_n_per_category: 50,
        }
    }
}

// =============================================================================
// Status Tracking
// =============================================================================

/// Outcome of one fetch cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Ticks returned by the source.
    pub ticks: usize,
    /// Alerts produced by the monitor before ranking.
    pub alerts_detected: usize,
    /// Alerts in the published batch (0 when nothing was published).
    pub published: usize,
    /// Fan-out result, when a batch was published.
    pub fan_out: Option<FanOutReport>,
    /// Error text when the fetch or worker failed.
    pub failure: Option<String>,
    /// Wall time spent on the cycle.
    pub duration: Duration,
}

/// Producer progress shared with the health endpoint.
#[derive(Debug, Default)]
pub struct ProducerStatus {
    state: RwLock<Option<ProducerState>>,
    last_cycle_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    cycles: AtomicU64,
    failed_cycles: AtomicU64,
    consecutive_failures: AtomicU64,
    last_batch_size: AtomicUsize,
}

impl ProducerStatus {
    /// Create empty status.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn set_state(&self, state: ProducerState) {
        *self.state.write() = Some(state);
    }

    fn record_cycle(&self, report: &CycleReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        *self.last_cycle_at.write() = Some(Utc::now());
        if report.published > 0 {
            self.last_batch_size.store(report.published, Ordering::Relaxed);
        }
        if let Some(failure) = &report.failure {
            self.failed_cycles.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
            *self.last_error.write() = Some(failure.clone());
        } else {
            self.consecutive_failures.store(0, Ordering::Relaxed);
        }
    }

    /// State chosen on the most recent tick.
    #[must_use]
    pub fn state(&self) -> Option<ProducerState> {
        *self.state.read()
    }

    /// Completed fetch cycles.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Cycles whose fetch failed.
    #[must_use]
    pub fn failed_cycles(&self) -> u64 {
        self.failed_cycles.load(Ordering::Relaxed)
    }

    /// Failed cycles since the last successful one.
    #[must_use]
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Size of the most recently published batch.
    #[must_use]
    pub fn last_batch_size(&self) -> usize {
        self.last_batch_size.load(Ordering::Relaxed)
    }

    /// When the last fetch cycle completed.
    #[must_use]
    pub fn last_cycle_at(&self) -> Option<DateTime<Utc>> {
        *self.last_cycle_at.read()
    }

    /// Most recent fetch failure.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }
}

// =============================================================================
// Producer Loop
// =============================================================================

/// Background polling loop.
pub struct ProducerLoop {
    config: ProducerConfig,
    schedule: Arc<MarketSchedule>,
    source: Arc<dyn SnapshotSource>,
    monitor: Arc<AnomalyMonitor>,
    broadcast: Arc<dyn BroadcastPort>,
    status: Arc<ProducerStatus>,
    cancel: CancellationToken,
}

impl ProducerLoop {
    /// Create a producer loop.
    #[must_use]
    pub fn new(
        config: ProducerConfig,
        schedule: Arc<MarketSchedule>,
        source: Arc<dyn SnapshotSource>,
        monitor: Arc<AnomalyMonitor>,
        broadcast: Arc<dyn BroadcastPort>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            schedule,
            source,
            monitor,
            broadcast,
            status: Arc::new(ProducerStatus::new()),
            cancel,
        }
    }

    /// Shared status handle for health reporting.
    #[must_use]
    pub fn status(&self) -> Arc<ProducerStatus> {
        Arc::clone(&self.status)
    }

    /// Decide the state for exchange-local time `now`.
    #[must_use]
    pub fn decide(&self, now: NaiveDateTime) -> ProducerState {
        next_state(
            self.broadcast.subscriber_count() > 0,
            self.broadcast.has_data(),
            self.schedule.is_open_local(now),
            self.broadcast.is_stale(now),
        )
    }

    /// Run until cancelled.
    pub async fn run(self) {
        tracing::info!(
            source = self.source.name(),
            poll_ms = self.config.poll_interval.as_millis(),
            top_n = self.config.top_n_per_category,
            "Producer loop started"
        );

        let mut previous: Option<ProducerState> = None;
        while !self.cancel.is_cancelled() {
            let now = self.schedule.local_now();
            let state = self.decide(now);
            self.status.set_state(state);
            metrics::record_producer_tick(state);

            if previous != Some(state) {
                tracing::info!(state = state.as_str(), "Producer state changed");
                previous = Some(state);
            }

            if state.fetches() && self.run_cycle(now).await.is_none() {
                break;
            }

            let pause = match state {
                ProducerState::IdleNoSubscribers => self.config.idle_interval,
                ProducerState::MarketClosedFresh | ProducerState::MarketClosedStaleFetch => {
                    self.config.closed_interval
                }
                ProducerState::ActivePoll => self.config.poll_interval,
            };
            if !self.pause(pause).await {
                break;
            }
        }

        tracing::info!("Producer loop stopped");
    }

    /// Fetch, screen, rank and publish once.
    ///
    /// Returns `None` if cancellation interrupted the fetch. Fetch errors and
    /// worker panics are logged and reported as an empty cycle.
    pub async fn run_cycle(&self, now: NaiveDateTime) -> Option<CycleReport> {
        let started = Instant::now();
        let source = Arc::clone(&self.source);
        let monitor = Arc::clone(&self.monitor);

        let worker = tokio::task::spawn_blocking(move || match source.fetch_snapshot() {
            Ok(ticks) => {
                let alerts = monitor.detect(&ticks, now);
                Ok((ticks.len(), alerts))
            }
            Err(e) => Err(e.to_string()),
        });

        let joined = tokio::select! {
            () = self.cancel.cancelled() => {
                tracing::info!("Snapshot fetch abandoned on shutdown");
                return None;
            }
            joined = worker => joined,
        };
        if self.cancel.is_cancelled() {
            return None;
        }

        let mut report = CycleReport::default();
        let alerts = match joined {
            Ok(Ok((ticks, alerts))) => {
                report.ticks = ticks;
                metrics::record_ticks_fetched(ticks as u64);
                alerts
            }
            Ok(Err(e)) => {
                tracing::warn!(source = self.source.name(), error = %e, "Snapshot fetch failed, treating as empty");
                metrics::record_fetch_failure(self.source.name());
                report.failure = Some(e);
                Vec::new()
            }
            Err(e) => {
                tracing::error!(error = %e, "Fetch cycle worker failed");
                metrics::record_fetch_failure(self.source.name());
                report.failure = Some(e.to_string());
                Vec::new()
            }
        };

        report.alerts_detected = alerts.len();
        let batch = rank_batch(alerts, self.config.top_n_per_category);
        if !batch.is_empty() {
            let fan_out = self.broadcast.publish(&batch, now);
            report.published = batch.len();
            report.fan_out = Some(fan_out);
        }

        report.duration = started.elapsed();
        metrics::record_cycle_duration(report.duration);
        self.status.record_cycle(&report);

        tracing::debug!(
            ticks = report.ticks,
            detected = report.alerts_detected,
            published = report.published,
            elapsed_ms = report.duration.as_millis(),
            "Fetch cycle complete"
        );
        Some(report)
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use chrono::{Duration as ChronoDuration, NaiveDate};
    use parking_lot::Mutex;
    use test_case::test_case;

    use super::*;
    use crate::application::ports::{BaselineProvider, FetchError, MockSnapshotSource};
    use crate::domain::detection::{DetectionThresholds, UNKNOWN_BASELINE};
    use crate::domain::market::{Alert, Category, InstrumentTick};
    use crate::domain::schedule::SessionHours;

    #[derive(Default)]
    struct RecordingBroadcast {
        subscribers: AtomicUsize,
        has_data: AtomicBool,
        stale: AtomicBool,
        batches: Mutex<Vec<Vec<Alert>>>,
    }

    impl BroadcastPort for RecordingBroadcast {
        fn subscriber_count(&self) -> usize {
            self.subscribers.load(Ordering::SeqCst)
        }

        fn has_data(&self) -> bool {
            self.has_data.load(Ordering::SeqCst)
        }

        fn is_stale(&self, _now: NaiveDateTime) -> bool {
            self.stale.load(Ordering::SeqCst)
        }

        fn publish(&self, batch: &[Alert], _at: NaiveDateTime) -> FanOutReport {
            self.batches.lock().push(batch.to_vec());
            self.has_data.store(true, Ordering::SeqCst);
            FanOutReport {
                frames: batch.len(),
                ..FanOutReport::default()
            }
        }
    }

    struct NoBaselines;

    impl BaselineProvider for NoBaselines {
        fn get(&self, _code: &str) -> f64 {
            UNKNOWN_BASELINE
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn tick(code: &str, category: Category, amount: f64) -> InstrumentTick {
        InstrumentTick {
            code: code.to_string(),
            name: code.to_string(),
            price: 10.0,
            pct_change: 0.5,
            volume: 10_000,
            amount,
            timestamp: now(),
            category,
            industry: None,
            concept: None,
        }
    }

    fn monitor() -> Arc<AnomalyMonitor> {
        Arc::new(AnomalyMonitor::new(
            Arc::new(NoBaselines),
            DetectionThresholds::default(),
            SessionHours::default(),
        ))
    }

    fn producer(
        config: ProducerConfig,
        schedule: MarketSchedule,
        source: MockSnapshotSource,
        broadcast: Arc<RecordingBroadcast>,
        cancel: CancellationToken,
    ) -> ProducerLoop {
        ProducerLoop::new(
            config,
            Arc::new(schedule),
            Arc::new(source),
            monitor(),
            broadcast,
            cancel,
        )
    }

    /// A schedule closed around the current date regardless of wall clock.
    fn closed_schedule() -> MarketSchedule {
        let schedule = MarketSchedule::default();
        let today = schedule.local_now().date();
        let holidays: Vec<NaiveDate> = (-1..=1)
            .map(|d| today + ChronoDuration::days(d))
            .collect();
        schedule.with_holidays(holidays)
    }

    #[test_case(false, true, true, false => ProducerState::IdleNoSubscribers ; "idle overrides open market")]
    #[test_case(false, true, false, true => ProducerState::IdleNoSubscribers ; "idle overrides stale cache")]
    #[test_case(false, false, false, false => ProducerState::MarketClosedStaleFetch ; "no data no subscribers fetches once")]
    #[test_case(true, true, false, false => ProducerState::MarketClosedFresh ; "closed with fresh cache")]
    #[test_case(true, true, false, true => ProducerState::MarketClosedStaleFetch ; "closed with stale cache")]
    #[test_case(true, false, false, false => ProducerState::MarketClosedStaleFetch ; "closed with empty cache")]
    #[test_case(true, true, true, false => ProducerState::ActivePoll ; "open with subscribers")]
    #[test_case(false, false, true, false => ProducerState::ActivePoll ; "open without data")]
    fn state_transitions(subs: bool, data: bool, open: bool, stale: bool) -> ProducerState {
        next_state(subs, data, open, stale)
    }

    #[test]
    fn only_fetching_states_fetch() {
        assert!(ProducerState::ActivePoll.fetches());
        assert!(ProducerState::MarketClosedStaleFetch.fetches());
        assert!(!ProducerState::MarketClosedFresh.fetches());
        assert!(!ProducerState::IdleNoSubscribers.fetches());
    }

    #[tokio::test]
    async fn cycle_publishes_ranked_bounded_batch() {
        let mut source = MockSnapshotSource::new();
        source.expect_name().return_const("mock");
        source.expect_fetch_snapshot().times(1).returning(|| {
            Ok(vec![
                tick("z1", Category::Zz2000, 4_000_000.0),
                tick("h1", Category::Hs300, 30_000_000.0),
                tick("z2", Category::Zz2000, 9_000_000.0),
                tick("h2", Category::Hs300, 80_000_000.0),
                tick("z3", Category::Zz2000, 6_000_000.0),
                tick("o1", Category::Other, 900_000_000.0),
            ])
        });
        let broadcast = Arc::new(RecordingBroadcast::default());
        let config = ProducerConfig {
            top_n_per_category: 2,
            ..ProducerConfig::default()
        };
        let p = producer(
            config,
            MarketSchedule::default(),
            source,
            Arc::clone(&broadcast),
            CancellationToken::new(),
        );

        let report = p.run_cycle(now()).await.unwrap();
        assert_eq!(report.ticks, 6);
        assert_eq!(report.alerts_detected, 5);
        assert_eq!(report.published, 4);
        assert!(report.failure.is_none());

        let batches = broadcast.batches.lock();
        let codes: Vec<&str> = batches[0].iter().map(|a| a.code.as_str()).collect();
        assert_eq!(codes, ["h2", "h1", "z2", "z3"]);
        assert_eq!(p.status().cycles(), 1);
        assert_eq!(p.status().last_batch_size(), 4);
    }

    #[tokio::test]
    async fn fetch_failure_is_an_empty_cycle() {
        let mut source = MockSnapshotSource::new();
        source.expect_name().return_const("mock");
        source
            .expect_fetch_snapshot()
            .returning(|| Err(FetchError::Transport("connect timeout".to_string())));
        let broadcast = Arc::new(RecordingBroadcast::default());
        let p = producer(
            ProducerConfig::default(),
            MarketSchedule::default(),
            source,
            Arc::clone(&broadcast),
            CancellationToken::new(),
        );

        let report = p.run_cycle(now()).await.unwrap();
        assert_eq!(report.published, 0);
        assert!(report.failure.unwrap().contains("connect timeout"));
        assert!(broadcast.batches.lock().is_empty());
        assert_eq!(p.status().failed_cycles(), 1);
        assert_eq!(p.status().consecutive_failures(), 1);

        // Failures do not stop later cycles.
        assert!(p.run_cycle(now()).await.is_some());
        assert_eq!(p.status().cycles(), 2);
        assert_eq!(p.status().consecutive_failures(), 2);
    }

    struct ExplodingSource;

    impl SnapshotSource for ExplodingSource {
        fn fetch_snapshot(&self) -> Result<Vec<InstrumentTick>, FetchError> {
            panic!("vendor payload exploded")
        }

        fn name(&self) -> &'static str {
            "exploding"
        }
    }

    #[tokio::test]
    async fn worker_panic_is_contained() {
        let broadcast = Arc::new(RecordingBroadcast::default());
        let p = ProducerLoop::new(
            ProducerConfig::default(),
            Arc::new(MarketSchedule::default()),
            Arc::new(ExplodingSource),
            monitor(),
            Arc::clone(&broadcast) as Arc<dyn BroadcastPort>,
            CancellationToken::new(),
        );

        let report = p.run_cycle(now()).await.unwrap();
        assert!(report.failure.is_some());
        assert!(broadcast.batches.lock().is_empty());
        assert_eq!(p.status().failed_cycles(), 1);
    }

    #[tokio::test]
    async fn nothing_detected_keeps_previous_cache() {
        let mut source = MockSnapshotSource::new();
        source.expect_name().return_const("mock");
        source
            .expect_fetch_snapshot()
            .returning(|| Ok(vec![tick("small", Category::Zz2000, 1_000.0)]));
        let broadcast = Arc::new(RecordingBroadcast::default());
        let p = producer(
            ProducerConfig::default(),
            MarketSchedule::default(),
            source,
            Arc::clone(&broadcast),
            CancellationToken::new(),
        );

        let report = p.run_cycle(now()).await.unwrap();
        assert_eq!(report.alerts_detected, 0);
        assert!(report.fan_out.is_none());
        assert!(broadcast.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn idle_loop_exits_promptly_on_cancel() {
        let mut source = MockSnapshotSource::new();
        source.expect_name().return_const("mock");
        source.expect_fetch_snapshot().never();
        let broadcast = Arc::new(RecordingBroadcast::default());
        broadcast.has_data.store(true, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let config = ProducerConfig {
            idle_interval: Duration::from_secs(3600),
            ..ProducerConfig::default()
        };
        let p = producer(
            config,
            MarketSchedule::default().with_force_open(true),
            source,
            broadcast,
            cancel.clone(),
        );
        let status = p.status();

        let handle = tokio::spawn(p.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(status.state(), Some(ProducerState::IdleNoSubscribers));

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_millis(500), handle).await;
        assert!(result.is_ok(), "producer should stop on cancellation");
    }

    #[tokio::test]
    async fn open_market_polls_repeatedly() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut source = MockSnapshotSource::new();
        source.expect_name().return_const("mock");
        source.expect_fetch_snapshot().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![tick("h1", Category::Hs300, 30_000_000.0)])
        });
        let broadcast = Arc::new(RecordingBroadcast::default());
        broadcast.subscribers.store(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let config = ProducerConfig {
            poll_interval: Duration::from_millis(10),
            ..ProducerConfig::default()
        };
        let p = producer(
            config,
            MarketSchedule::default().with_force_open(true),
            source,
            Arc::clone(&broadcast),
            cancel.clone(),
        );

        let handle = tokio::spawn(p.run());
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert!(broadcast.batches.lock().len() >= 2);
    }

    #[tokio::test]
    async fn closed_market_fetches_closing_snapshot_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut source = MockSnapshotSource::new();
        source.expect_name().return_const("mock");
        source.expect_fetch_snapshot().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![tick("h1", Category::Hs300, 30_000_000.0)])
        });
        let broadcast = Arc::new(RecordingBroadcast::default());
        broadcast.subscribers.store(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let config = ProducerConfig {
            closed_interval: Duration::from_secs(3600),
            ..ProducerConfig::default()
        };
        let p = producer(
            config,
            closed_schedule(),
            source,
            Arc::clone(&broadcast),
            cancel.clone(),
        );
        let status = p.status();

        let handle = tokio::spawn(p.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(status.state(), Some(ProducerState::MarketClosedStaleFetch));
        assert_eq!(broadcast.batches.lock().len(), 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
